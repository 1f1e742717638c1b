//! End-to-end pipeline tests: raw ring-buffer bytes through decode, filter,
//! classification and the bounded output channel, without a kernel.

use std::net::Ipv4Addr;

use crossbeam_channel::bounded;

use pulse::capture::{process_raw_record, CaptureStats, RelevanceFilter, DEFAULT_API_RANGES};
use pulse::capture::RequestClass;
use pulse::event::{ActivityEvent, ActivityKind, EventPayload};
use pulse_common::{
    ActivityRecord, ACTIVITY_RECORD_SIZE, EVENT_CONNECT, EVENT_EXEC, EVENT_EXIT,
    EVENT_HTTP_REQUEST,
};

// SAFETY: all-zero bytes are a valid ActivityRecord.
#[allow(unsafe_code)]
fn zeroed_record() -> ActivityRecord {
    unsafe { std::mem::zeroed() }
}

#[allow(unsafe_code)]
fn to_bytes(record: &ActivityRecord) -> Vec<u8> {
    let bytes = unsafe {
        std::slice::from_raw_parts(std::ptr::from_ref(record).cast::<u8>(), ACTIVITY_RECORD_SIZE)
    };
    bytes.to_vec()
}

fn exec_record(comm: &[u8], pid: u32) -> Vec<u8> {
    let mut record = zeroed_record();
    record.event_type = EVENT_EXEC;
    record.pid = pid;
    record.ppid = pid.wrapping_sub(1);
    record.uid = 1000;
    record.timestamp = 100;
    record.comm[..comm.len()].copy_from_slice(comm);
    record.path[..21].copy_from_slice(b"/usr/local/bin/claude");
    to_bytes(&record)
}

fn connect_record(comm: &[u8], pid: u32, addr: Ipv4Addr, port: u16) -> Vec<u8> {
    let mut record = zeroed_record();
    record.event_type = EVENT_CONNECT;
    record.pid = pid;
    record.uid = 1000;
    record.timestamp = 200;
    record.target_addr = u32::from(addr);
    record.target_port = port;
    record.comm[..comm.len()].copy_from_slice(comm);
    to_bytes(&record)
}

fn http_record(comm: &[u8], pid: u32, addr: Ipv4Addr, method: &[u8], uri: &[u8]) -> Vec<u8> {
    let mut record = zeroed_record();
    record.event_type = EVENT_HTTP_REQUEST;
    record.pid = pid;
    record.uid = 1000;
    record.timestamp = 300;
    record.target_addr = u32::from(addr);
    record.target_port = 443;
    record.content_length = 1024;
    record.socket_fd = 7;
    record.comm[..comm.len()].copy_from_slice(comm);
    record.http_method[..method.len()].copy_from_slice(method);
    record.http_uri[..uri.len()].copy_from_slice(uri);
    to_bytes(&record)
}

fn exit_record(comm: &[u8], pid: u32) -> Vec<u8> {
    let mut record = zeroed_record();
    record.event_type = EVENT_EXIT;
    record.pid = pid;
    record.timestamp = 400;
    record.comm[..comm.len()].copy_from_slice(comm);
    to_bytes(&record)
}

fn filter() -> RelevanceFilter {
    RelevanceFilter::new("claude", DEFAULT_API_RANGES).unwrap()
}

fn drain(rx: &crossbeam_channel::Receiver<ActivityEvent>) -> Vec<ActivityEvent> {
    rx.try_iter().collect()
}

const API_ADDR: Ipv4Addr = Ipv4Addr::new(52, 84, 1, 1);

#[test]
fn test_user_interaction_scenario() {
    let filter = filter();
    let stats = CaptureStats::default();
    let (tx, rx) = bounded(16);

    for data in [
        exec_record(b"claude", 4242),
        connect_record(b"claude", 4242, API_ADDR, 443),
        http_record(b"claude", 4242, API_ADDR, b"POST", b"/v1/messages"),
    ] {
        process_raw_record(&data, &filter, &stats, &tx);
    }

    let events = drain(&rx);
    assert_eq!(events.len(), 3);

    let http: Vec<&ActivityEvent> =
        events.iter().filter(|e| e.kind == ActivityKind::HttpRequest).collect();
    assert_eq!(http.len(), 1, "exactly one classified HTTP event expected");

    match &http[0].payload {
        EventPayload::HttpRequest { method, uri, classification, host, .. } => {
            assert_eq!(method, "POST");
            assert_eq!(uri, "/v1/messages");
            assert_eq!(*classification, Some(RequestClass::UserInteraction));
            assert_eq!(host.as_deref(), Some("api.anthropic.com"));
        }
        other => panic!("expected HttpRequest payload, got {other:?}"),
    }

    let snap = stats.snapshot();
    assert_eq!(snap.events_processed, 3);
    assert_eq!(snap.events_dropped, 0, "drop counters must be unchanged");
}

#[test]
fn test_background_operation_scenario() {
    let filter = filter();
    let stats = CaptureStats::default();
    let (tx, rx) = bounded(16);

    for data in [
        exec_record(b"claude", 4242),
        connect_record(b"claude", 4242, API_ADDR, 443),
        http_record(b"claude", 4242, API_ADDR, b"GET", b"/health"),
    ] {
        process_raw_record(&data, &filter, &stats, &tx);
    }

    let events = drain(&rx);
    let http: Vec<&ActivityEvent> =
        events.iter().filter(|e| e.kind == ActivityKind::HttpRequest).collect();
    assert_eq!(http.len(), 1);
    assert_eq!(http[0].classification(), Some(RequestClass::Background));
    assert_eq!(stats.snapshot().events_dropped, 0);
}

#[test]
fn test_foreign_command_never_reaches_channel() {
    let filter = filter();
    let stats = CaptureStats::default();
    let (tx, rx) = bounded(16);

    for comm in [&b"python"[..], b"bash"] {
        process_raw_record(&exec_record(comm, 77), &filter, &stats, &tx);
        process_raw_record(
            &http_record(comm, 77, API_ADDR, b"POST", b"/v1/messages"),
            &filter,
            &stats,
            &tx,
        );
    }

    assert!(drain(&rx).is_empty());
    let snap = stats.snapshot();
    assert_eq!(snap.events_processed, 0);
    assert_eq!(snap.events_dropped, 4);
}

#[test]
fn test_connect_outside_api_table_is_dropped() {
    let filter = filter();
    let stats = CaptureStats::default();
    let (tx, rx) = bounded(16);

    process_raw_record(
        &connect_record(b"claude", 4242, Ipv4Addr::new(192, 168, 1, 1), 443),
        &filter,
        &stats,
        &tx,
    );

    assert!(drain(&rx).is_empty());
    assert_eq!(stats.snapshot().events_dropped, 1);
}

#[test]
fn test_truncated_record_counted_not_panicking() {
    let filter = filter();
    let stats = CaptureStats::default();
    let (tx, rx) = bounded(16);

    process_raw_record(&[0u8; 10], &filter, &stats, &tx);
    process_raw_record(&[], &filter, &stats, &tx);

    assert!(drain(&rx).is_empty());
    assert_eq!(stats.snapshot().events_dropped, 2);
}

#[test]
fn test_unknown_event_type_is_dropped() {
    let filter = filter();
    let stats = CaptureStats::default();
    let (tx, rx) = bounded(16);

    let mut record = zeroed_record();
    record.event_type = 99;
    record.comm[..6].copy_from_slice(b"claude");
    process_raw_record(&to_bytes(&record), &filter, &stats, &tx);

    assert!(drain(&rx).is_empty());
    assert_eq!(stats.snapshot().events_dropped, 1);
}

#[test]
fn test_relevant_exit_requests_socket_eviction() {
    let filter = filter();
    let stats = CaptureStats::default();
    let (tx, rx) = bounded(16);

    let evict = process_raw_record(&exit_record(b"claude", 4242), &filter, &stats, &tx);
    assert_eq!(evict, Some(4242));

    // A foreign process exit neither forwards nor evicts.
    let evict = process_raw_record(&exit_record(b"python", 7), &filter, &stats, &tx);
    assert_eq!(evict, None);

    let events = drain(&rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ActivityKind::Exit);
}

#[test]
fn test_full_channel_drops_without_blocking() {
    let filter = filter();
    let stats = CaptureStats::default();
    let (tx, rx) = bounded(1);

    process_raw_record(&exec_record(b"claude", 1), &filter, &stats, &tx);
    process_raw_record(&exec_record(b"claude", 2), &filter, &stats, &tx);

    let snap = stats.snapshot();
    assert_eq!(snap.events_processed, 1);
    assert_eq!(snap.events_dropped, 1);
    assert_eq!(drain(&rx).len(), 1);
}

#[test]
fn test_disconnected_channel_counts_drops() {
    let filter = filter();
    let stats = CaptureStats::default();
    let (tx, rx) = bounded(4);
    drop(rx);

    process_raw_record(&exec_record(b"claude", 1), &filter, &stats, &tx);
    assert_eq!(stats.snapshot().events_dropped, 1);
}
