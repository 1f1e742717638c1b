//! Capture lifecycle management
//!
//! [`CaptureManager`] owns the full lifecycle of the kernel resources:
//! loading the compiled eBPF object, attaching the four tracepoint programs
//! in a fixed order (with full unwind on partial failure), running the
//! single decode / filter / classify loop, and tearing everything down in
//! strict reverse order on stop.
//!
//! ## Pipeline
//!
//! ```text
//! kernel programs -> ring buffer -> decode -> filter -> classify -> channel
//! ```
//!
//! Exactly one task drains the ring buffer; ring-buffer reads are already
//! serialized so the pipeline needs no internal concurrency. The bounded
//! output channel is the only consumer-facing backpressure point: sends are
//! non-blocking and drop-on-full so a slow consumer can never stall capture.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aya::maps::{HashMap as AyaHashMap, MapData, PerCpuArray, RingBuf};
use aya::programs::TracePoint;
use aya::Ebpf;
use aya_log::EbpfLogger;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{info, warn};
use tokio::io::unix::AsyncFd;
use tokio::task::JoinHandle;

use pulse_common::{
    SocketInfo, COUNTER_CONNECT_CALLS, COUNTER_EVENTS_DROPPED, COUNTER_EVENTS_PROCESSED,
    COUNTER_EXEC_CALLS, COUNTER_HTTP_REQUESTS,
};

use crate::capture::classifier::classify;
use crate::capture::decoder;
use crate::capture::filter::{RelevanceFilter, API_HOSTNAME, DEFAULT_API_RANGES};
use crate::capture::stats::{CaptureStats, KernelCounters, StatsSnapshot};
use crate::domain::CaptureError;
use crate::event::{ActivityEvent, EventPayload};
use crate::preflight;
use crate::process_lookup;

/// Fixed wake-up for the blocking ring-buffer read, bounding how quickly a
/// stop request is observed when no events arrive.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Output channel capacity in events.
const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Program name, tracepoint category, tracepoint name. Attachment happens in
/// this order and teardown in exact reverse.
const TRACE_POINTS: [(&str, &str, &str); 4] = [
    ("trace_execve", "syscalls", "sys_enter_execve"),
    ("trace_connect", "syscalls", "sys_enter_connect"),
    ("trace_exit", "sched", "sched_process_exit"),
    ("trace_write", "syscalls", "sys_enter_write"),
];

/// Capture configuration supplied by the embedding application.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Command family to monitor.
    pub command: String,
    /// Known-API CIDR ranges, see [`DEFAULT_API_RANGES`].
    pub api_ranges: Vec<String>,
    /// Compiled eBPF object to load.
    pub bytecode_path: PathBuf,
    /// Output channel capacity.
    pub channel_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            api_ranges: DEFAULT_API_RANGES.iter().map(ToString::to_string).collect(),
            bytecode_path: PathBuf::from("target/bpfel-unknown-none/release/pulse-ebpf"),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

struct AttachedProgram {
    program: &'static str,
    link: aya::programs::trace_point::TracePointLinkId,
}

/// Owner of the kernel capture resources and the event-processing loop.
pub struct CaptureManager {
    filter: Arc<RelevanceFilter>,
    stats: Arc<CaptureStats>,
    config: CaptureConfig,
    ebpf: Option<Ebpf>,
    attached: Vec<AttachedProgram>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    tx: Option<Sender<ActivityEvent>>,
    rx: Receiver<ActivityEvent>,
}

impl CaptureManager {
    /// Build a manager from configuration. Fails on an invalid CIDR range so
    /// configuration typos surface at startup.
    pub fn new(config: CaptureConfig) -> Result<Self, CaptureError> {
        let filter = RelevanceFilter::new(&config.command, &config.api_ranges)?;
        let (tx, rx) = bounded(config.channel_capacity);
        Ok(Self {
            filter: Arc::new(filter),
            stats: Arc::new(CaptureStats::default()),
            config,
            ebpf: None,
            attached: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            tx: Some(tx),
            rx,
        })
    }

    /// Load the compiled eBPF object and attach all tracepoint programs.
    ///
    /// Requires root. On any attachment failure every already-attached
    /// program is detached (reverse order) before the error is returned, so
    /// a failed load never leaves partial kernel state behind.
    pub fn load_programs(&mut self) -> Result<(), CaptureError> {
        preflight::check_privileges()?;
        preflight::bump_memlock_rlimit();

        let path = &self.config.bytecode_path;
        let bytecode = std::fs::read(path).map_err(|source| CaptureError::BytecodeRead {
            path: path.display().to_string(),
            source,
        })?;

        let mut ebpf = Ebpf::load(&bytecode)?;
        if let Err(err) = EbpfLogger::init(&mut ebpf) {
            warn!("Failed to initialize eBPF logger: {err}");
        }
        self.attached = Self::attach_all(&mut ebpf)?;
        self.stats.set_programs_attached(self.attached.len());
        self.ebpf = Some(ebpf);

        info!("eBPF programs loaded, {} tracepoints attached", self.attached.len());
        Ok(())
    }

    fn attach_all(ebpf: &mut Ebpf) -> Result<Vec<AttachedProgram>, CaptureError> {
        let mut attached = Vec::with_capacity(TRACE_POINTS.len());
        for (program, category, name) in TRACE_POINTS {
            match Self::attach_one(ebpf, program, category, name) {
                Ok(link) => attached.push(AttachedProgram { program, link }),
                Err(err) => {
                    // No partial attachment state may survive a failure.
                    Self::detach_all(ebpf, &mut attached);
                    return Err(err);
                }
            }
        }
        Ok(attached)
    }

    fn attach_one(
        ebpf: &mut Ebpf,
        program: &'static str,
        category: &str,
        name: &str,
    ) -> Result<aya::programs::trace_point::TracePointLinkId, CaptureError> {
        let attach_err = |error: String| CaptureError::AttachFailed {
            program: program.to_string(),
            category: category.to_string(),
            name: name.to_string(),
            error,
        };

        let tracepoint: &mut TracePoint = ebpf
            .program_mut(program)
            .ok_or(CaptureError::ProgramNotFound(program))?
            .try_into()
            .map_err(|e: aya::programs::ProgramError| attach_err(e.to_string()))?;
        tracepoint.load().map_err(|e| attach_err(e.to_string()))?;
        let link = tracepoint.attach(category, name).map_err(|e| attach_err(e.to_string()))?;
        info!("Attached tracepoint: {category}/{name}");
        Ok(link)
    }

    /// Detach in reverse attachment order. Failures are logged, not
    /// propagated; there is nothing useful a caller could do with them.
    fn detach_all(ebpf: &mut Ebpf, attached: &mut Vec<AttachedProgram>) {
        while let Some(entry) = attached.pop() {
            let Some(program) = ebpf.program_mut(entry.program) else {
                continue;
            };
            match TryInto::<&mut TracePoint>::try_into(program) {
                Ok(tracepoint) => {
                    if let Err(err) = tracepoint.detach(entry.link) {
                        warn!("Failed to detach {}: {err}", entry.program);
                    }
                }
                Err(err) => warn!("Failed to detach {}: {err}", entry.program),
            }
        }
    }

    /// Start the single background processing loop.
    ///
    /// # Errors
    /// [`CaptureError::AlreadyRunning`] if the loop is active,
    /// [`CaptureError::NotLoaded`] if [`Self::load_programs`] has not
    /// succeeded.
    pub fn start_event_processing(&mut self) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }
        let ebpf = self.ebpf.as_mut().ok_or(CaptureError::NotLoaded)?;

        let events = ebpf.take_map("EVENTS").ok_or(CaptureError::MapNotFound("EVENTS"))?;
        let ring = RingBuf::try_from(events)?;
        let sockets = ebpf.take_map("SOCKETS").ok_or(CaptureError::MapNotFound("SOCKETS"))?;
        let sockets: AyaHashMap<MapData, u64, SocketInfo> = AyaHashMap::try_from(sockets)?;

        let tx = self.tx.clone().ok_or(CaptureError::AlreadyRunning)?;
        self.running.store(true, Ordering::Release);
        self.worker = Some(tokio::spawn(process_events(
            ring,
            sockets,
            Arc::clone(&self.filter),
            Arc::clone(&self.stats),
            tx,
            Arc::clone(&self.running),
        )));

        info!("capture event processing started");
        Ok(())
    }

    /// Stop processing and tear down kernel state.
    ///
    /// Teardown order is the strict reverse of startup: the loop exits and
    /// the ring-buffer reader closes with it, then tracepoints detach in
    /// reverse attachment order, then the program object is released, then
    /// the output channel closes. Idempotent; a second call is a no-op.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::Release);

        if let Some(worker) = self.worker.take() {
            // Teardown must never run concurrently with the read loop.
            if let Err(err) = worker.await {
                warn!("event processing task failed: {err}");
                self.stats.record_error();
            }
        }

        if let Some(mut ebpf) = self.ebpf.take() {
            Self::detach_all(&mut ebpf, &mut self.attached);
            drop(ebpf);
            self.stats.set_programs_attached(0);
            info!("capture stopped, kernel programs detached");
        }

        // Dropping the last sender closes the channel for consumers.
        self.tx = None;
    }

    /// Receive-only view of the classified event stream. The channel closes
    /// after [`Self::stop`] completes.
    #[must_use]
    pub fn event_channel(&self) -> Receiver<ActivityEvent> {
        self.rx.clone()
    }

    /// Point-in-time snapshot of the userspace pipeline counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Kernel-side counters summed across CPUs. Available while programs are
    /// loaded.
    pub fn kernel_counters(&self) -> Result<KernelCounters, CaptureError> {
        let ebpf = self.ebpf.as_ref().ok_or(CaptureError::NotLoaded)?;
        let map = ebpf.map("COUNTERS").ok_or(CaptureError::MapNotFound("COUNTERS"))?;
        let counters: PerCpuArray<_, u64> = PerCpuArray::try_from(map)?;

        let sum = |slot: u32| -> u64 {
            counters.get(&slot, 0).map(|values| values.iter().sum()).unwrap_or(0)
        };

        Ok(KernelCounters {
            events_processed: sum(COUNTER_EVENTS_PROCESSED),
            events_dropped: sum(COUNTER_EVENTS_DROPPED),
            exec_calls: sum(COUNTER_EXEC_CALLS),
            connect_calls: sum(COUNTER_CONNECT_CALLS),
            http_requests: sum(COUNTER_HTTP_REQUESTS),
        })
    }
}

/// The single ring-buffer drain loop. Strictly sequential: decode, filter,
/// classify, forward, one record at a time. Blocks on ring-buffer readiness
/// with a fixed wake-up so a stop request is observed even when the
/// monitored process is idle.
async fn process_events(
    ring: RingBuf<MapData>,
    mut sockets: AyaHashMap<MapData, u64, SocketInfo>,
    filter: Arc<RelevanceFilter>,
    stats: Arc<CaptureStats>,
    tx: Sender<ActivityEvent>,
    running: Arc<AtomicBool>,
) {
    let mut async_fd = match AsyncFd::new(ring) {
        Ok(fd) => fd,
        Err(err) => {
            warn!("failed to register ring buffer with the reactor: {err}");
            stats.record_error();
            return;
        }
    };

    while running.load(Ordering::Acquire) {
        tokio::select! {
            guard = async_fd.readable_mut() => {
                let mut guard = match guard {
                    Ok(guard) => guard,
                    Err(err) => {
                        // Reader closed underneath us: normal termination.
                        warn!("ring buffer read error: {err}");
                        stats.record_error();
                        break;
                    }
                };
                let ring = guard.get_inner_mut();
                while let Some(item) = ring.next() {
                    if let Some(exited_pid) = process_raw_record(&item, &filter, &stats, &tx) {
                        evict_process_sockets(&mut sockets, exited_pid);
                    }
                }
                guard.clear_ready();
            }
            () = tokio::time::sleep(STOP_POLL_INTERVAL) => {}
        }
    }
    // The ring-buffer reader drops here, before any tracepoint detaches.
}

/// Run one raw ring-buffer record through decode, filter, classification and
/// the output channel.
///
/// Per-record failures are counted and logged at warning level, never
/// propagated. Returns the pid when the record was a relevant exit event, so
/// the caller can evict that process's socket correlations.
pub fn process_raw_record(
    data: &[u8],
    filter: &RelevanceFilter,
    stats: &CaptureStats,
    tx: &Sender<ActivityEvent>,
) -> Option<u32> {
    let mut event = match decoder::decode(data) {
        Ok(event) => event,
        Err(err) => {
            warn!("dropping undecodable record: {err}");
            stats.record_dropped();
            return None;
        }
    };

    // The kernel cannot portably resolve the parent pid; fill it from /proc
    // while the process is likely still alive.
    if let EventPayload::Exec { ppid, .. } = &mut event.payload {
        if *ppid == 0 {
            *ppid = process_lookup::parent_pid(event.pid).unwrap_or(0);
        }
    }

    if !filter.is_relevant(&event) {
        stats.record_dropped();
        return None;
    }

    match &mut event.payload {
        EventPayload::Connect { addr, host, .. } => {
            if filter.is_api_address(*addr) {
                *host = Some(API_HOSTNAME.to_string());
            }
        }
        EventPayload::HttpRequest { addr, host, method, uri, classification, .. } => {
            if filter.is_api_address(*addr) {
                *host = Some(API_HOSTNAME.to_string());
            }
            *classification = Some(classify(method, uri));
        }
        _ => {}
    }

    let exited_pid = match event.payload {
        EventPayload::Exit { .. } => Some(event.pid),
        _ => None,
    };

    match tx.try_send(event) {
        Ok(()) => stats.record_processed(),
        Err(TrySendError::Full(_)) => {
            warn!("Event channel full, dropping event");
            stats.record_dropped();
        }
        Err(TrySendError::Disconnected(_)) => stats.record_dropped(),
    }

    exited_pid
}

/// Delete a process's socket-correlation entries after its exit event.
/// Without this the kernel map only ever sheds entries by capacity overwrite.
fn evict_process_sockets(sockets: &mut AyaHashMap<MapData, u64, SocketInfo>, pid: u32) {
    let keys: Vec<u64> = sockets
        .iter()
        .filter_map(Result::ok)
        .map(|(key, _)| key)
        .filter(|key| (key >> 32) as u32 == pid)
        .collect();
    for key in keys {
        let _ = sockets.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();
        assert_eq!(config.command, "claude");
        assert_eq!(config.channel_capacity, 1000);
        assert!(!config.api_ranges.is_empty());
    }

    #[test]
    fn test_new_rejects_invalid_ranges() {
        let config = CaptureConfig {
            api_ranges: vec!["10.0.0.0/8".to_string(), "garbage".to_string()],
            ..CaptureConfig::default()
        };
        assert!(CaptureManager::new(config).is_err());
    }

    #[tokio::test]
    async fn test_start_without_load_fails() {
        let mut manager = CaptureManager::new(CaptureConfig::default()).unwrap();
        assert!(matches!(manager.start_event_processing(), Err(CaptureError::NotLoaded)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut manager = CaptureManager::new(CaptureConfig::default()).unwrap();
        manager.stop().await;
        manager.stop().await;
        assert_eq!(manager.stats().programs_attached, 0);
    }

    #[tokio::test]
    async fn test_channel_closes_after_stop() {
        let mut manager = CaptureManager::new(CaptureConfig::default()).unwrap();
        let rx = manager.event_channel();
        manager.stop().await;
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_kernel_counters_require_load() {
        let manager = CaptureManager::new(CaptureConfig::default()).unwrap();
        assert!(matches!(manager.kernel_counters(), Err(CaptureError::NotLoaded)));
    }
}
