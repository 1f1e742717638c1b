//! Downstream-facing classified events
//!
//! [`ActivityEvent`] is what leaves the capture pipeline: a decoded, filtered
//! and (for HTTP) classified view of a raw kernel record. The work-session
//! tracker consumes these from the output channel; everything kernel-shaped
//! (packed layouts, byte buffers) stays behind the decoder.

use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;

use crate::capture::classifier::RequestClass;

/// Event category, mirroring the kernel record discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Exec,
    Connect,
    Exit,
    HttpRequest,
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Exec => "exec",
            Self::Connect => "connect",
            Self::Exit => "exit",
            Self::HttpRequest => "http_request",
        };
        f.write_str(s)
    }
}

/// Type-specific event data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    Exec {
        /// Executable path, empty when the kernel read failed.
        path: String,
        /// Parent pid; zero when neither the kernel nor `/proc` could
        /// resolve it before the parent went away.
        ppid: u32,
    },
    Connect {
        addr: Ipv4Addr,
        port: u16,
        /// Canonical API hostname when `addr` falls in the known-API table.
        #[serde(skip_serializing_if = "Option::is_none")]
        host: Option<String>,
    },
    Exit {
        exit_code: i32,
    },
    HttpRequest {
        method: String,
        uri: String,
        content_length: u32,
        socket_fd: u32,
        addr: Ipv4Addr,
        port: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        host: Option<String>,
        /// Assigned by the classifier stage; `None` only before that stage
        /// has run.
        #[serde(skip_serializing_if = "Option::is_none")]
        classification: Option<RequestClass>,
    },
}

/// A decoded and classified activity event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub pid: u32,
    pub uid: u32,
    /// Process short name as captured in the kernel.
    pub command: String,
    /// Monotonic nanoseconds from the kernel clock at capture time.
    pub timestamp_ns: u64,
    pub payload: EventPayload,
}

impl ActivityEvent {
    /// Classification of an HTTP request event, `None` for other kinds.
    #[must_use]
    pub fn classification(&self) -> Option<RequestClass> {
        match &self.payload {
            EventPayload::HttpRequest { classification, .. } => *classification,
            _ => None,
        }
    }

    /// Destination address for network-shaped events.
    #[must_use]
    pub fn target_addr(&self) -> Option<Ipv4Addr> {
        match &self.payload {
            EventPayload::Connect { addr, .. } | EventPayload::HttpRequest { addr, .. } => {
                Some(*addr)
            }
            _ => None,
        }
    }
}
