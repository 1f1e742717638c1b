//! # eBPF Kernel-Side Capture Programs
//!
//! Tracepoint programs that observe the `claude` CLI at the syscall boundary
//! and stream fixed-layout [`ActivityRecord`]s to userspace.
//!
//! ## Programs
//!
//! - **Tracepoint**: `syscalls/sys_enter_execve` - detect monitored launches
//! - **Tracepoint**: `syscalls/sys_enter_connect` - outbound IPv4 connects
//! - **Tracepoint**: `sched/sched_process_exit` - identity-map cleanup
//! - **Tracepoint**: `syscalls/sys_enter_write` - HTTP request-line parsing
//!
//! ## Maps (Shared with Userspace)
//!
//! - `EVENTS` - Ring buffer (256KB) for the event stream
//! - `TRACKED_PIDS` - pid -> first-seen timestamp for monitored processes
//! - `SOCKETS` - (pid, fd) -> destination for correlated connections
//! - `COUNTERS` - per-CPU health counters
//! - `HTTP_SCRATCH` - per-CPU header window, keeps the BPF stack small
//!
//! Handlers never block and never retry: if ring-buffer space cannot be
//! reserved the event is dropped and counted. All reads of user memory go
//! through `bpf_probe_read_user*` and fail safely.
//!
//! ## Build
//!
//! Always compiled in release mode for the BPF target:
//! ```bash
//! cargo xtask build-ebpf --release
//! ```

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use aya_ebpf::{
    helpers::{
        bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_get_current_uid_gid,
        bpf_ktime_get_ns, bpf_probe_read_user_buf, bpf_probe_read_user_str_bytes,
    },
    macros::{map, tracepoint},
    maps::{HashMap, PerCpuArray, RingBuf},
    programs::TracePointContext,
};
use pulse_common::{
    socket_key, ActivityRecord, SocketInfo, ACTIVITY_RECORD_SIZE, COMM_LEN,
    CONTENT_LENGTH_MAX_DIGITS, COUNTER_CONNECT_CALLS, COUNTER_EVENTS_DROPPED,
    COUNTER_EVENTS_PROCESSED, COUNTER_EXEC_CALLS, COUNTER_HTTP_REQUESTS, COUNTER_SLOTS,
    EVENT_CONNECT, EVENT_EXEC, EVENT_EXIT, EVENT_HTTP_REQUEST, HTTP_HEADER_WINDOW,
    HTTP_METHOD_LEN, HTTP_MIN_WRITE, HTTP_URI_LEN, MONITORED_COMM, PROCESS_MAP_CAPACITY,
    RING_CAPACITY_BYTES, SOCKET_MAP_CAPACITY,
};

// ============================================================================
// Constants
// ============================================================================

/// `AF_INET` from `<sys/socket.h>`; only IPv4 destinations are captured.
const AF_INET: u16 = 2;

/// Coarse kernel-side gate for correlation entries. Authoritative network
/// classification happens in userspace against the CIDR table.
const HTTPS_PORT: u16 = 443;
const HTTP_PORT: u16 = 80;

/// Syscall tracepoint argument offsets: 8 bytes of common fields, 8 bytes of
/// syscall id, then six 8-byte argument slots.
/// Layout from `/sys/kernel/debug/tracing/events/syscalls/sys_enter_*/format`.
const SYSCALL_ARG0: usize = 16;
const SYSCALL_ARG1: usize = 24;
const SYSCALL_ARG2: usize = 32;

/// `sched/sched_process_exit` payload offsets: comm[16] at 8, pid at 24.
/// Layout from `/sys/kernel/debug/tracing/events/sched/sched_process_exit/format`.
const SCHED_EXIT_COMM: usize = 8;
const SCHED_EXIT_PID: usize = 24;

// ============================================================================
// eBPF Maps - Shared data structures between kernel and userspace
// ============================================================================

/// Ring buffer carrying [`ActivityRecord`]s to the single userspace reader.
#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(RING_CAPACITY_BYTES, 0);

/// Map: pid -> first-seen timestamp (ns).
///
/// Populated by the exec handler when the process name matches the monitored
/// family; deleted by the exit handler. Membership is the fast-path filter
/// every other handler checks first.
#[map]
static TRACKED_PIDS: HashMap<u32, u64> = HashMap::with_max_entries(PROCESS_MAP_CAPACITY, 0);

/// Map: (pid << 32 | fd) -> [`SocketInfo`].
///
/// Created when a tracked process connects to a plausible API endpoint.
/// Consulted by the write handler to decide whether a write is worth an HTTP
/// parse attempt. The kernel never deletes entries; the bounded capacity
/// provides soft eviction and userspace evicts on process exit.
#[map]
static SOCKETS: HashMap<u64, SocketInfo> = HashMap::with_max_entries(SOCKET_MAP_CAPACITY, 0);

/// Per-CPU health counters, see the `COUNTER_*` slots in `pulse-common`.
#[map]
static COUNTERS: PerCpuArray<u64> = PerCpuArray::with_max_entries(COUNTER_SLOTS, 0);

/// Per-CPU copy of the inspected write. 512 bytes does not fit on the BPF
/// stack next to the parse buffers, so the window is staged here.
#[map]
static HTTP_SCRATCH: PerCpuArray<HttpScratch> = PerCpuArray::with_max_entries(1, 0);

#[repr(C)]
struct HttpScratch {
    data: [u8; HTTP_HEADER_WINDOW],
}

// ============================================================================
// Helpers
// ============================================================================

/// Counter increments never block and never fail the calling handler.
#[inline(always)]
fn bump(counter: u32) {
    if let Some(slot) = COUNTERS.get_ptr_mut(counter) {
        unsafe { *slot += 1 };
    }
}

/// Fixed-length comparison against the monitored command family. Unrolled,
/// no dynamic length, so the verifier sees a constant-cost check.
#[inline(always)]
fn comm_matches(comm: &[u8; COMM_LEN]) -> bool {
    comm[0] == MONITORED_COMM[0]
        && comm[1] == MONITORED_COMM[1]
        && comm[2] == MONITORED_COMM[2]
        && comm[3] == MONITORED_COMM[3]
        && comm[4] == MONITORED_COMM[4]
        && comm[5] == MONITORED_COMM[5]
}

/// Zero a freshly reserved record and stamp the fields common to every event
/// type. Numeric fields of the packed record are written with unaligned
/// stores; byte arrays are assigned directly (alignment 1).
///
/// # Safety
/// `ev` must point at `ACTIVITY_RECORD_SIZE` writable bytes.
#[inline(always)]
unsafe fn init_record(ev: *mut ActivityRecord, event_type: u32, pid: u32, timestamp: u64) {
    core::ptr::write_bytes(ev.cast::<u8>(), 0, ACTIVITY_RECORD_SIZE);
    (*ev).timestamp = timestamp;
    (*ev).pid = pid;
    (*ev).event_type = event_type;
}

// ============================================================================
// Exec handler
// ============================================================================

#[tracepoint]
pub fn trace_execve(ctx: TracePointContext) -> u32 {
    match try_trace_execve(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_trace_execve(ctx: &TracePointContext) -> Result<(), i64> {
    let comm = bpf_get_current_comm()?;

    // Fast path: everything that is not the monitored family returns here,
    // with no map writes and no event.
    if !comm_matches(&comm) {
        return Ok(());
    }

    let pid = (unsafe { bpf_get_current_pid_tgid() } >> 32) as u32;
    let uid = unsafe { bpf_get_current_uid_gid() } as u32;
    let ts = unsafe { bpf_ktime_get_ns() };

    bump(COUNTER_EXEC_CALLS);

    // Track before reserving ring-buffer space: identity bookkeeping must
    // not depend on successful event emission.
    let _ = unsafe { TRACKED_PIDS.insert(&pid, &ts, 0) };

    let Some(mut entry) = EVENTS.reserve::<ActivityRecord>(0) else {
        bump(COUNTER_EVENTS_DROPPED);
        return Ok(());
    };

    let ev = entry.as_mut_ptr();
    unsafe {
        init_record(ev, EVENT_EXEC, pid, ts);
        (*ev).uid = uid;
        (*ev).comm = comm;

        // Best-effort executable path; truncation and read failure are fine.
        let filename: *const u8 = match ctx.read_at(SYSCALL_ARG0) {
            Ok(p) => p,
            Err(_) => core::ptr::null(),
        };
        if !filename.is_null() {
            let _ = bpf_probe_read_user_str_bytes(filename, &mut (*ev).path);
        }
    }

    entry.submit(0);
    bump(COUNTER_EVENTS_PROCESSED);
    Ok(())
}

// ============================================================================
// Connect handler
// ============================================================================

#[tracepoint]
pub fn trace_connect(ctx: TracePointContext) -> u32 {
    match try_trace_connect(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_trace_connect(ctx: &TracePointContext) -> Result<(), i64> {
    let pid = (unsafe { bpf_get_current_pid_tgid() } >> 32) as u32;

    // Fast path: only tracked processes are worth a sockaddr read.
    if unsafe { TRACKED_PIDS.get(&pid) }.is_none() {
        return Ok(());
    }

    bump(COUNTER_CONNECT_CALLS);

    let sockfd: i32 = unsafe { ctx.read_at(SYSCALL_ARG0)? };
    let addr_ptr: *const u8 = unsafe { ctx.read_at(SYSCALL_ARG1)? };
    if addr_ptr.is_null() {
        return Ok(());
    }

    // struct sockaddr_in prefix: family(2), port(2, BE), addr(4, BE).
    let mut sa = [0u8; 8];
    unsafe { bpf_probe_read_user_buf(addr_ptr, &mut sa)? };

    let family = u16::from_ne_bytes([sa[0], sa[1]]);
    if family != AF_INET {
        return Ok(());
    }

    // Convert to host byte order at capture time; the decoder and the CIDR
    // table only ever see host-order values.
    let port = u16::from_be_bytes([sa[2], sa[3]]);
    let addr = u32::from_be_bytes([sa[4], sa[5], sa[6], sa[7]]);

    let ts = unsafe { bpf_ktime_get_ns() };
    let uid = unsafe { bpf_get_current_uid_gid() } as u32;
    let comm = bpf_get_current_comm().unwrap_or([0u8; COMM_LEN]);

    // Coarse pre-filter: remember sockets that might carry API traffic so
    // the write handler can attribute later HTTP parses to a destination.
    if port == HTTPS_PORT || port == HTTP_PORT {
        let info = SocketInfo {
            connect_time: ts,
            pid,
            target_addr: addr,
            target_port: port,
            _pad: [0u8; 6],
        };
        let _ = unsafe { SOCKETS.insert(&socket_key(pid, sockfd as u32), &info, 0) };
    }

    let Some(mut entry) = EVENTS.reserve::<ActivityRecord>(0) else {
        bump(COUNTER_EVENTS_DROPPED);
        return Ok(());
    };

    let ev = entry.as_mut_ptr();
    unsafe {
        init_record(ev, EVENT_CONNECT, pid, ts);
        (*ev).uid = uid;
        (*ev).target_addr = addr;
        (*ev).target_port = port;
        (*ev).comm = comm;
    }

    entry.submit(0);
    bump(COUNTER_EVENTS_PROCESSED);
    Ok(())
}

// ============================================================================
// Exit handler
// ============================================================================

#[tracepoint]
pub fn trace_exit(ctx: TracePointContext) -> u32 {
    match try_trace_exit(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_trace_exit(ctx: &TracePointContext) -> Result<(), i64> {
    let pid: i32 = unsafe { ctx.read_at(SCHED_EXIT_PID)? };
    let pid = pid as u32;

    if unsafe { TRACKED_PIDS.get(&pid) }.is_none() {
        return Ok(());
    }

    // Cleanup happens before and regardless of event emission.
    let _ = unsafe { TRACKED_PIDS.remove(&pid) };

    let comm: [u8; COMM_LEN] =
        unsafe { ctx.read_at(SCHED_EXIT_COMM) }.unwrap_or([0u8; COMM_LEN]);
    let ts = unsafe { bpf_ktime_get_ns() };

    let Some(mut entry) = EVENTS.reserve::<ActivityRecord>(0) else {
        bump(COUNTER_EVENTS_DROPPED);
        return Ok(());
    };

    let ev = entry.as_mut_ptr();
    unsafe {
        // The exit code is not part of this tracepoint's payload; the field
        // stays zero.
        init_record(ev, EVENT_EXIT, pid, ts);
        (*ev).comm = comm;
    }

    entry.submit(0);
    bump(COUNTER_EVENTS_PROCESSED);
    Ok(())
}

// ============================================================================
// Write handler - HTTP request-line parsing
// ============================================================================

#[tracepoint]
pub fn trace_write(ctx: TracePointContext) -> u32 {
    match try_trace_write(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_trace_write(ctx: &TracePointContext) -> Result<(), i64> {
    let pid = (unsafe { bpf_get_current_pid_tgid() } >> 32) as u32;

    if unsafe { TRACKED_PIDS.get(&pid) }.is_none() {
        return Ok(());
    }

    let fd: i32 = unsafe { ctx.read_at(SYSCALL_ARG0)? };
    let buf: *const u8 = unsafe { ctx.read_at(SYSCALL_ARG1)? };
    let count: u64 = unsafe { ctx.read_at(SYSCALL_ARG2)? };

    // Only writes on sockets we correlated to a plausible API connect.
    let sock = match unsafe { SOCKETS.get(&socket_key(pid, fd as u32)) } {
        Some(info) => *info,
        None => return Ok(()),
    };

    // Header-sized writes only; anything else is body or noise.
    let len = count as usize;
    if len < HTTP_MIN_WRITE || len > HTTP_HEADER_WINDOW {
        return Ok(());
    }
    if buf.is_null() {
        return Ok(());
    }

    let Some(scratch) = HTTP_SCRATCH.get_ptr_mut(0) else {
        return Ok(());
    };
    let data = unsafe { &mut (*scratch).data };
    unsafe { bpf_probe_read_user_buf(buf, &mut data[..len])? };

    // Any parse failure discards the attempt without emitting an event;
    // there is no partial or malformed HTTP record.
    let mut method = [0u8; HTTP_METHOD_LEN];
    let method_len = parse_method(data, len, &mut method);
    if method_len < 3 {
        return Ok(());
    }

    let mut uri = [0u8; HTTP_URI_LEN];
    let uri_len = parse_uri(data, len, method_len, &mut uri);
    if uri_len < 1 {
        return Ok(());
    }

    let content_length = parse_content_length(data, len);

    bump(COUNTER_HTTP_REQUESTS);
    let ts = unsafe { bpf_ktime_get_ns() };
    let uid = unsafe { bpf_get_current_uid_gid() } as u32;
    let comm = bpf_get_current_comm().unwrap_or([0u8; COMM_LEN]);

    let Some(mut entry) = EVENTS.reserve::<ActivityRecord>(0) else {
        bump(COUNTER_EVENTS_DROPPED);
        return Ok(());
    };

    let ev = entry.as_mut_ptr();
    unsafe {
        init_record(ev, EVENT_HTTP_REQUEST, pid, ts);
        (*ev).uid = uid;
        (*ev).target_addr = sock.target_addr;
        (*ev).target_port = sock.target_port;
        (*ev).socket_fd = fd as u32;
        (*ev).content_length = content_length;
        (*ev).http_method = method;
        (*ev).http_uri = uri;
        (*ev).comm = comm;
    }

    entry.submit(0);
    bump(COUNTER_EVENTS_PROCESSED);
    Ok(())
}

/// Scan for the space terminating the HTTP method within the first
/// [`HTTP_METHOD_LEN`] bytes. Returns the method length, or 0 when no
/// plausible method is found. Never reads past `len`.
#[inline(always)]
fn parse_method(
    data: &[u8; HTTP_HEADER_WINDOW],
    len: usize,
    out: &mut [u8; HTTP_METHOD_LEN],
) -> usize {
    let mut i = 0;
    while i < HTTP_METHOD_LEN && i < len {
        let c = data[i];
        if c == b' ' {
            return i;
        }
        out[i] = c;
        i += 1;
    }
    0
}

/// Scan for the space terminating the request URI, starting after the method
/// and its separating space. Returns the URI length, or 0 on failure. URIs
/// that do not terminate within [`HTTP_URI_LEN`] bytes are rejected rather
/// than truncated.
#[inline(always)]
fn parse_uri(
    data: &[u8; HTTP_HEADER_WINDOW],
    len: usize,
    method_len: usize,
    out: &mut [u8; HTTP_URI_LEN],
) -> usize {
    let start = method_len + 1;
    let mut i = 0;
    while i < HTTP_URI_LEN && start + i < len {
        let c = data[start + i];
        if c == b' ' {
            return i;
        }
        out[i] = c;
        i += 1;
    }
    0
}

/// Find a `Content-Length: ` header in the inspected window and parse up to
/// [`CONTENT_LENGTH_MAX_DIGITS`] decimal digits. Returns 0 when the header
/// is absent or unparsable.
#[inline(always)]
fn parse_content_length(data: &[u8; HTTP_HEADER_WINDOW], len: usize) -> u32 {
    const NEEDLE: &[u8; 16] = b"Content-Length: ";

    if len < NEEDLE.len() {
        return 0;
    }

    let mut i = 0;
    while i + NEEDLE.len() <= len {
        let mut matched = true;
        let mut j = 0;
        while j < NEEDLE.len() {
            if data[i + j] != NEEDLE[j] {
                matched = false;
                break;
            }
            j += 1;
        }

        if matched {
            let mut value: u32 = 0;
            let mut k = 0;
            while k < CONTENT_LENGTH_MAX_DIGITS && i + NEEDLE.len() + k < len {
                let c = data[i + NEEDLE.len() + k];
                if !c.is_ascii_digit() {
                    break;
                }
                value = value.wrapping_mul(10).wrapping_add(u32::from(c - b'0'));
                k += 1;
            }
            return value;
        }

        i += 1;
    }

    0
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
