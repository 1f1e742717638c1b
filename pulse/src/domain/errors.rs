//! Structured error types for pulse
//!
//! Using thiserror for automatic Display implementation and error chaining.

use thiserror::Error;

/// Failures of the capture lifecycle. Startup problems (privileges, load,
/// attach) surface here so the caller can decide whether to degrade to
/// running without capture capability. Per-record problems never appear as
/// errors; they are counted and logged at warning level.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(
        "Permission denied: pulse requires root privileges to load eBPF programs.\n\n\
         Run with: sudo pulse ..."
    )]
    PermissionDenied,

    #[error("Failed to read eBPF bytecode from {path}: {source}")]
    BytecodeRead { path: String, source: std::io::Error },

    #[error("Failed to attach {program} to {category}/{name}: {error}")]
    AttachFailed { program: String, category: String, name: String, error: String },

    #[error("{0} program not found in eBPF object")]
    ProgramNotFound(&'static str),

    #[error("{0} map not found in eBPF object")]
    MapNotFound(&'static str),

    #[error("event processing already running")]
    AlreadyRunning,

    #[error("eBPF programs not loaded")]
    NotLoaded,

    #[error("Invalid CIDR range {0:?}")]
    InvalidNetwork(String),

    #[error(
        "Kernel {found} is too old; pulse requires Linux 5.8 or newer \
         for BPF ring buffer support"
    )]
    UnsupportedKernel { found: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ebpf(#[from] aya::EbpfError),

    #[error(transparent)]
    Program(#[from] aya::programs::ProgramError),

    #[error(transparent)]
    Map(#[from] aya::maps::MapError),
}

/// Per-record decode failures. Always counted and dropped by the processing
/// loop, never propagated to the caller.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record too short: {len} bytes, expected {expected}")]
    Truncated { len: usize, expected: usize },

    #[error("unknown event type {0}")]
    UnknownEventType(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_loaded_display() {
        assert_eq!(CaptureError::NotLoaded.to_string(), "eBPF programs not loaded");
    }

    #[test]
    fn test_attach_error_carries_context() {
        let err = CaptureError::AttachFailed {
            program: "trace_write".to_string(),
            category: "syscalls".to_string(),
            name: "sys_enter_write".to_string(),
            error: "tracefs not mounted".to_string(),
        };
        assert!(err.to_string().contains("trace_write"));
        assert!(err.to_string().contains("sys_enter_write"));
    }

    #[test]
    fn test_truncated_decode_error() {
        let err = DecodeError::Truncated { len: 12, expected: 450 };
        assert!(err.to_string().contains("12"));
        assert!(err.to_string().contains("450"));
    }
}
