//! # pulse - Main Entry Point
//!
//! Headless monitor: loads the capture programs, streams classified events
//! to stdout as JSON lines, and prints a counter summary on exit. Stop with
//! Ctrl-C or `--duration`.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::time::Duration;

use pulse::capture::{CaptureConfig, CaptureManager};
use pulse::cli::Args;
use pulse::preflight;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.to_string().to_lowercase().contains("permission denied") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();

    preflight::run_preflight_checks()?;

    let mut config = CaptureConfig { command: args.command.clone(), ..CaptureConfig::default() };
    if let Some(bytecode) = args.bytecode {
        config.bytecode_path = bytecode;
    }

    let mut manager = CaptureManager::new(config).context("invalid capture configuration")?;
    manager.load_programs().context("failed to load capture programs")?;
    manager.start_event_processing().context("failed to start event processing")?;

    // Drain the channel on a dedicated thread; the receiver iterator ends
    // when stop() closes the channel.
    let rx = manager.event_channel();
    let quiet = args.quiet;
    let printer = std::thread::spawn(move || {
        for event in rx.iter() {
            if !quiet {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => log::warn!("failed to serialize event: {err}"),
                }
            }
        }
    });

    info!("monitoring command family {:?}, Ctrl-C to stop", args.command);
    if args.duration > 0 {
        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(args.duration)) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    } else {
        tokio::signal::ctrl_c().await.context("failed to wait for Ctrl-C")?;
    }

    // Kernel counters disappear with the programs; read them before stop.
    let kernel = manager.kernel_counters().ok();
    manager.stop().await;
    let _ = printer.join();

    let stats = manager.stats();
    eprintln!(
        "processed {} events, dropped {}, errors {}",
        stats.events_processed, stats.events_dropped, stats.processing_errors
    );
    if let Some(kernel) = kernel {
        eprintln!(
            "kernel: {} submitted, {} dropped, {} execs, {} connects, {} http requests",
            kernel.events_processed,
            kernel.events_dropped,
            kernel.exec_calls,
            kernel.connect_calls,
            kernel.http_requests
        );
    }

    Ok(())
}
