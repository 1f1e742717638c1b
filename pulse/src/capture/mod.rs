//! Capture pipeline modules
//!
//! Everything between the kernel ring buffer and the downstream consumer:
//! - Lifecycle management (load, attach, run, stop)
//! - Raw record decoding
//! - Relevance filtering and CIDR correlation
//! - HTTP request classification
//! - Pipeline statistics
//!
//! Only [`manager`] touches the tracing backend; decode, filter and
//! classify are pure and platform-independent, which is also what makes the
//! pipeline testable without a kernel.

pub mod classifier;
pub mod decoder;
pub mod filter;
pub mod manager;
pub mod stats;

// Re-export common types
pub use classifier::{classify, RequestClass};
pub use decoder::decode;
pub use filter::{ApiNetworkTable, Cidr4, RelevanceFilter, DEFAULT_API_RANGES};
pub use manager::{process_raw_record, CaptureConfig, CaptureManager};
pub use stats::{CaptureStats, KernelCounters, StatsSnapshot};
