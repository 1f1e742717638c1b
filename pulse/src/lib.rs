//! # pulse - Kernel-Boundary API Activity Capture
//!
//! pulse observes a single CLI process family (`claude` by default) at the
//! syscall boundary with eBPF and classifies its API traffic into user
//! interactions versus background operations, without ever touching payload
//! content. Downstream work-session trackers consume the resulting event
//! stream; pulse itself owns only the capture pipeline.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Monitored CLI process                    │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │ execve / connect / write / exit
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  eBPF Programs (Kernel)                     │
//! │  • Tracepoints: sys_enter_execve, sys_enter_connect,        │
//! │    sys_enter_write, sched_process_exit                      │
//! │  • Maps: tracked pids, (pid, fd) socket correlation,        │
//! │    per-CPU counters                                         │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │ ring buffer records
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   pulse (This Crate)                        │
//! │                                                             │
//! │   ┌─────────┐   ┌────────┐   ┌────────────┐   ┌─────────┐  │
//! │   │ Decoder │──▶│ Filter │──▶│ Classifier │──▶│ Channel │  │
//! │   └─────────┘   └────────┘   └────────────┘   └─────────┘  │
//! │     length        command       method/URI      bounded,   │
//! │     check         + CIDR        rules           drop-full  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`capture`]: the pipeline itself
//!   - `manager`: kernel resource lifecycle and the processing loop
//!   - `decoder`: wire-contract record parsing
//!   - `filter`: relevance rules (command family, known-API CIDR table)
//!   - `classifier`: user-interaction vs background labeling
//!   - `stats`: atomic pipeline counters
//! - [`event`]: the downstream-facing classified event type
//! - [`domain`]: newtypes and the typed error taxonomy
//! - [`preflight`]: privilege and kernel-version checks
//! - [`process_lookup`]: `/proc`-based parent-pid enrichment
//! - [`cli`]: argument parsing for the monitor binary
//!
//! ## Delivery model
//!
//! Best-effort by design. Kernel handlers never block: when the ring buffer
//! is full they drop and count. The userspace loop never blocks on the
//! consumer: when the output channel is full it drops and counts. Statistics
//! expose the drop counters so consumers can reason about gaps.
//!
//! ## Typical Usage
//!
//! ```bash
//! # Build the kernel object, then stream classified events
//! cargo xtask build-ebpf
//! sudo ./target/release/pulse
//! ```

// Expose modules for testing
pub mod capture;
pub mod cli;
pub mod domain;
pub mod event;
pub mod preflight;
pub mod process_lookup;

pub use capture::{CaptureConfig, CaptureManager, RequestClass, StatsSnapshot};
pub use event::{ActivityEvent, ActivityKind, EventPayload};
