//! # Shared Wire Contract (eBPF ↔ Userspace)
//!
//! Defines the fixed-layout event record and the constants shared between the
//! kernel-side capture programs and the userspace decoder. All types use
//! `#[repr(C)]` so the memory layout is identical on both sides of the
//! privilege boundary.
//!
//! ## The contract
//!
//! [`ActivityRecord`] is written byte-for-byte into the ring buffer by the
//! kernel programs and reinterpreted by the userspace decoder. Its size and
//! field order are a wire contract: any change requires recompiling both the
//! eBPF crate and the userspace crate together. A compile-time assertion pins
//! the record size so accidental layout drift fails the build instead of
//! producing garbage decodes.
//!
//! ## Key items
//!
//! - [`ActivityRecord`] - the ring-buffer event record
//! - [`SocketInfo`] - socket-correlation map value
//! - `EVENT_*` constants - record type discriminants
//! - `COUNTER_*` constants - per-CPU counter slots
//! - [`socket_key`] - (pid, fd) correlation-map key encoding

#![no_std]

/// Process short-name buffer length (kernel `TASK_COMM_LEN`).
pub const COMM_LEN: usize = 16;

/// Executable-path buffer length for exec events.
pub const PATH_LEN: usize = 256;

/// HTTP method buffer length ("OPTIONS" plus terminator fits).
pub const HTTP_METHOD_LEN: usize = 8;

/// HTTP request URI buffer length.
pub const HTTP_URI_LEN: usize = 128;

/// Ring buffer capacity in bytes. Producers drop (counted) when full.
pub const RING_CAPACITY_BYTES: u32 = 256 * 1024;

/// Tracked-process identity map capacity.
pub const PROCESS_MAP_CAPACITY: u32 = 1024;

/// Socket-correlation map capacity. Entries are never deleted by the kernel
/// programs; the bounded size provides soft eviction via overwrite, and
/// userspace evicts a process's entries when its exit event is observed.
pub const SOCKET_MAP_CAPACITY: u32 = 2048;

/// Smallest socket write that can plausibly hold an HTTP request line.
pub const HTTP_MIN_WRITE: usize = 16;

/// Largest socket write inspected for HTTP headers. Writes beyond this are
/// body traffic, not request lines.
pub const HTTP_HEADER_WINDOW: usize = 512;

/// Maximum digits parsed out of a Content-Length header value.
pub const CONTENT_LENGTH_MAX_DIGITS: usize = 10;

/// Short name the kernel-side exec filter compares against. The comparison is
/// a fixed-length prefix match, so `claude` and `claude-code` both pass the
/// kernel fast path; userspace applies the authoritative family match.
pub const MONITORED_COMM: &[u8; 6] = b"claude";

// ============================================================================
// Event type discriminants
// ============================================================================

/// Process exec observed (`sys_enter_execve`).
pub const EVENT_EXEC: u32 = 1;

/// Outbound IPv4 connect observed (`sys_enter_connect`).
pub const EVENT_CONNECT: u32 = 2;

/// Tracked process exited (`sched_process_exit`).
pub const EVENT_EXIT: u32 = 3;

/// HTTP-shaped request parsed out of a socket write (`sys_enter_write`).
pub const EVENT_HTTP_REQUEST: u32 = 4;

// ============================================================================
// Per-CPU counter slots
// ============================================================================

/// Events successfully submitted to the ring buffer.
pub const COUNTER_EVENTS_PROCESSED: u32 = 0;

/// Events dropped because ring-buffer space could not be reserved.
pub const COUNTER_EVENTS_DROPPED: u32 = 1;

/// Exec handler invocations that passed the comm filter.
pub const COUNTER_EXEC_CALLS: u32 = 2;

/// Connect handler invocations from tracked processes.
pub const COUNTER_CONNECT_CALLS: u32 = 3;

/// Socket writes successfully parsed as HTTP requests.
pub const COUNTER_HTTP_REQUESTS: u32 = 4;

/// Number of counter slots in the per-CPU array.
pub const COUNTER_SLOTS: u32 = 5;

// ============================================================================
// Wire record
// ============================================================================

/// Expected byte size of [`ActivityRecord`]. The decoder rejects any
/// ring-buffer record shorter than this.
pub const ACTIVITY_RECORD_SIZE: usize = 450;

/// Event record sent from the kernel programs to userspace via ring buffer.
///
/// Packed with no padding so the byte size is exactly the sum of the fields.
/// Numeric fields are written with unaligned stores on the kernel side and
/// read with an unaligned copy on the userspace side.
///
/// Field population by `event_type`:
///
/// | field              | EXEC | CONNECT | EXIT | HTTP_REQUEST |
/// |--------------------|------|---------|------|--------------|
/// | `target_addr/port` |      | yes     |      | yes          |
/// | `exit_code`        |      |         | yes  |              |
/// | `path`             | yes  |         |      |              |
/// | `http_method/uri`  |      |         |      | yes          |
/// | `content_length`   |      |         |      | yes          |
/// | `socket_fd`        |      |         |      | yes          |
///
/// `comm` is populated for every type but is not guaranteed NUL-terminated
/// when the process name fills the buffer. `target_addr` and `target_port`
/// are converted to host byte order at capture time.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct ActivityRecord {
    /// Monotonic nanoseconds from `bpf_ktime_get_ns()` at capture time.
    pub timestamp: u64,
    /// Process ID (TGID) that triggered the event.
    pub pid: u32,
    /// Parent process ID. Zero when not resolvable in kernel context;
    /// userspace enriches exec events from `/proc` best-effort.
    pub ppid: u32,
    /// Owning user ID.
    pub uid: u32,
    /// One of the `EVENT_*` discriminants.
    pub event_type: u32,
    /// IPv4 destination address, host byte order. CONNECT / HTTP_REQUEST.
    pub target_addr: u32,
    /// Destination port, host byte order. CONNECT / HTTP_REQUEST.
    pub target_port: u16,
    /// Process exit code. EXIT only, zero otherwise.
    pub exit_code: i32,
    /// Process short name. Not guaranteed NUL-terminated if truncated.
    pub comm: [u8; COMM_LEN],
    /// Executable path from the execve filename argument. EXEC only,
    /// best-effort, silently truncated on overflow.
    pub path: [u8; PATH_LEN],
    /// HTTP method string. HTTP_REQUEST only.
    pub http_method: [u8; HTTP_METHOD_LEN],
    /// HTTP request URI. HTTP_REQUEST only.
    pub http_uri: [u8; HTTP_URI_LEN],
    /// Parsed Content-Length header value, zero if absent. HTTP_REQUEST only.
    pub content_length: u32,
    /// Socket file descriptor the request was written to. HTTP_REQUEST only.
    pub socket_fd: u32,
}

// Layout drift fails the build of whichever side recompiles first.
const _: () = assert!(core::mem::size_of::<ActivityRecord>() == ACTIVITY_RECORD_SIZE);

/// Socket-correlation map value: where a tracked process connected to.
///
/// Created by the connect handler when a tracked process dials a plausible
/// API endpoint; consulted by the write handler to attribute HTTP parses to
/// a destination.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SocketInfo {
    /// Connect timestamp, monotonic nanoseconds.
    pub connect_time: u64,
    /// Process that owns the socket.
    pub pid: u32,
    /// IPv4 destination, host byte order.
    pub target_addr: u32,
    /// Destination port, host byte order.
    pub target_port: u16,
    /// Explicit tail padding so the struct has no uninitialized bytes.
    #[allow(clippy::pub_underscore_fields)]
    pub _pad: [u8; 6],
}

const _: () = assert!(core::mem::size_of::<SocketInfo>() == 24);

/// Correlation-map key: socket fd scoped by owning pid, so fd reuse in an
/// unrelated process can never alias a tracked connection.
#[inline]
pub const fn socket_key(pid: u32, fd: u32) -> u64 {
    ((pid as u64) << 32) | fd as u64
}

#[cfg(feature = "user")]
use aya::Pod;

// These unsafe impls are required for eBPF <-> userspace communication.
// Pod asserts the types can be reinterpreted as plain bytes.
#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for ActivityRecord {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for SocketInfo {}
