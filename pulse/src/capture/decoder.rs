//! Ring-buffer record decoding
//!
//! Interprets raw ring-buffer bytes as the shared [`ActivityRecord`] layout
//! and produces a typed [`ActivityEvent`]. Length is validated before any
//! field access; a short record or an unknown event type is a counted drop,
//! never a panic and never an out-of-bounds read.

use std::net::Ipv4Addr;

use pulse_common::{
    ActivityRecord, ACTIVITY_RECORD_SIZE, EVENT_CONNECT, EVENT_EXEC, EVENT_EXIT,
    EVENT_HTTP_REQUEST,
};

use crate::domain::DecodeError;
use crate::event::{ActivityEvent, ActivityKind, EventPayload};

/// Extract a string from a fixed-size kernel buffer: everything up to the
/// first NUL byte, or the entire buffer when no NUL exists (a name that
/// exactly fills the buffer is not NUL-terminated).
#[must_use]
pub fn extract_str(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Decode one raw ring-buffer record into a typed event.
///
/// # Errors
/// - [`DecodeError::Truncated`] when the record is shorter than the wire
///   contract size.
/// - [`DecodeError::UnknownEventType`] for a discriminant this build does
///   not understand (producer/consumer version skew).
pub fn decode(data: &[u8]) -> Result<ActivityEvent, DecodeError> {
    if data.len() < ACTIVITY_RECORD_SIZE {
        return Err(DecodeError::Truncated { len: data.len(), expected: ACTIVITY_RECORD_SIZE });
    }

    // SAFETY: length checked above; the record is packed so an unaligned
    // read is required, and every bit pattern is a valid ActivityRecord.
    #[allow(unsafe_code)]
    let raw = unsafe { std::ptr::read_unaligned(data.as_ptr().cast::<ActivityRecord>()) };

    let (kind, payload) = match raw.event_type {
        EVENT_EXEC => (
            ActivityKind::Exec,
            EventPayload::Exec { path: extract_str(&raw.path), ppid: raw.ppid },
        ),
        EVENT_CONNECT => (
            ActivityKind::Connect,
            EventPayload::Connect {
                addr: Ipv4Addr::from(raw.target_addr),
                port: raw.target_port,
                host: None,
            },
        ),
        EVENT_EXIT => (ActivityKind::Exit, EventPayload::Exit { exit_code: raw.exit_code }),
        EVENT_HTTP_REQUEST => (
            ActivityKind::HttpRequest,
            EventPayload::HttpRequest {
                method: extract_str(&raw.http_method),
                uri: extract_str(&raw.http_uri),
                content_length: raw.content_length,
                socket_fd: raw.socket_fd,
                addr: Ipv4Addr::from(raw.target_addr),
                port: raw.target_port,
                host: None,
                classification: None,
            },
        ),
        other => return Err(DecodeError::UnknownEventType(other)),
    };

    Ok(ActivityEvent {
        kind,
        pid: raw.pid,
        uid: raw.uid,
        command: extract_str(&raw.comm),
        timestamp_ns: raw.timestamp,
        payload,
    })
}
