//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pulse",
    about = "Watch a CLI's API traffic at the kernel boundary and classify it",
    after_help = "\
EXAMPLES:
    sudo pulse                               Stream classified events as JSON lines
    sudo pulse --duration 60                 Stop after one minute
    sudo pulse --bytecode /usr/lib/pulse.o   Use an installed eBPF object"
)]
pub struct Args {
    /// Command family to monitor
    #[arg(long, default_value = "claude")]
    pub command: String,

    /// Path to the compiled eBPF object (defaults to the xtask build output)
    #[arg(long, value_name = "FILE")]
    pub bytecode: Option<PathBuf>,

    /// Stop after N seconds (0 = run until interrupted)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Suppress per-event output, print the summary only
    #[arg(short, long)]
    pub quiet: bool,
}
