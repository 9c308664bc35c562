use std::{
    collections::BTreeMap,
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant, SystemTime},
};

use parking_lot::Mutex;

use crate::{error::ErrorKind, metrics::TrafficMetrics, telemetry::get_meter};

/// Pending packets a worker buffer holds before merging into the shared aggregate.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
    Icmp,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Udp, Protocol::Tcp, Protocol::Icmp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
            Protocol::Icmp => "icmp",
        }
    }

    fn index(&self) -> usize {
        match self {
            Protocol::Udp => 0,
            Protocol::Tcp => 1,
            Protocol::Icmp => 2,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    pub timestamp: SystemTime,
    pub unit_id: u64,
    pub src: Option<SocketAddr>,
    pub dst: SocketAddr,
    pub size: usize,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCounts {
    pub transient: u64,
    pub setup: u64,
    pub invariant: u64,
}

impl ErrorCounts {
    pub fn get(&self, kind: ErrorKind) -> u64 {
        match kind {
            ErrorKind::Transient => self.transient,
            ErrorKind::Setup => self.setup,
            ErrorKind::Invariant => self.invariant,
        }
    }

    fn add(&mut self, kind: ErrorKind, count: u64) {
        match kind {
            ErrorKind::Transient => self.transient += count,
            ErrorKind::Setup => self.setup += count,
            ErrorKind::Invariant => self.invariant += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.transient + self.setup + self.invariant
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub errors: u64,
}

/// Counters that are always current, independent of detail buffering.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LiveCounters {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub errors: ErrorCounts,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub errors: ErrorCounts,
    pub per_protocol: BTreeMap<&'static str, u64>,
    pub units: BTreeMap<u64, UnitStats>,
    pub records: Vec<PacketRecord>,
    pub elapsed: Duration,
}

impl RunStats {
    pub fn average_bitrate_bps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64().max(0.001);
        self.bytes_sent as f64 * 8.0 / secs
    }

    pub fn average_pps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64().max(0.001);
        self.packets_sent as f64 / secs
    }
}

#[derive(Debug, Default)]
struct Aggregate {
    /// One chunk per merge.
    records: Vec<Arc<[PacketRecord]>>,
    units: BTreeMap<u64, UnitStats>,
}

/// Run-wide statistics sink.
///
/// Totals are atomics bumped on every packet. Per-packet records and per-unit
/// statistics are collected in [`RecorderBuffer`]s owned by each worker and merged
/// into the shared aggregate under one short lock.
pub struct Recorder {
    record_details: bool,
    flush_threshold: usize,
    started: Instant,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    per_protocol: [AtomicU64; 3],
    errors: [AtomicU64; 3],
    shared: Mutex<Aggregate>,
    metrics: TrafficMetrics,
}

impl Recorder {
    pub fn new(record_details: bool) -> Self {
        Self::with_threshold(record_details, DEFAULT_FLUSH_THRESHOLD)
    }

    pub fn with_threshold(record_details: bool, flush_threshold: usize) -> Self {
        Self {
            record_details,
            flush_threshold: flush_threshold.max(1),
            started: Instant::now(),
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            per_protocol: Default::default(),
            errors: Default::default(),
            shared: Mutex::new(Aggregate::default()),
            metrics: TrafficMetrics::new(&get_meter()),
        }
    }

    pub fn record_details(&self) -> bool {
        self.record_details
    }

    pub fn buffer(self: &Arc<Self>, unit_id: u64) -> RecorderBuffer {
        RecorderBuffer {
            recorder: self.clone(),
            unit_id,
            records: Vec::new(),
            pending: 0,
            unit: UnitStats::default(),
            sent: [(0, 0); 3],
            errors: ErrorCounts::default(),
        }
    }

    pub fn counters(&self) -> LiveCounters {
        LiveCounters {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            errors: self.error_counts(),
            elapsed: self.started.elapsed(),
        }
    }

    fn error_counts(&self) -> ErrorCounts {
        let mut counts = ErrorCounts::default();
        for kind in ErrorKind::ALL {
            counts.add(kind, self.errors[kind.index()].load(Ordering::Relaxed));
        }
        counts
    }

    /// Point-in-time copy of everything recorded so far. Only chunk handles
    /// are cloned under the lock.
    pub fn snapshot(&self) -> RunStats {
        let (units, chunks) = {
            let shared = self.shared.lock();
            (shared.units.clone(), shared.records.clone())
        };
        RunStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            errors: self.error_counts(),
            per_protocol: Protocol::ALL
                .iter()
                .map(|p| (p.as_str(), self.per_protocol[p.index()].load(Ordering::Relaxed)))
                .collect(),
            units,
            records: chunks.iter().flat_map(|chunk| chunk.iter().cloned()).collect(),
            elapsed: self.started.elapsed(),
        }
    }

    fn merge(&self, buffer: &mut RecorderBuffer) {
        let chunk: Option<Arc<[PacketRecord]>> =
            (!buffer.records.is_empty()).then(|| std::mem::take(&mut buffer.records).into());
        {
            let mut shared = self.shared.lock();
            shared.records.extend(chunk);
            let unit = shared.units.entry(buffer.unit_id).or_default();
            unit.packets_sent += buffer.unit.packets_sent;
            unit.bytes_sent += buffer.unit.bytes_sent;
            unit.errors += buffer.unit.errors;
        }

        for protocol in Protocol::ALL {
            let (packets, bytes) = buffer.sent[protocol.index()];
            self.metrics.record_sent(protocol, packets, bytes);
        }
        for kind in ErrorKind::ALL {
            self.metrics.record_errors(kind, buffer.errors.get(kind));
        }
    }
}

/// Per-worker accumulation buffer. Not shared; flushed into the owning
/// [`Recorder`] at the threshold, on [`RecorderBuffer::flush`], and on drop.
pub struct RecorderBuffer {
    recorder: Arc<Recorder>,
    unit_id: u64,
    records: Vec<PacketRecord>,
    pending: usize,
    unit: UnitStats,
    sent: [(u64, u64); 3],
    errors: ErrorCounts,
}

impl RecorderBuffer {
    pub fn record_details(&self) -> bool {
        self.recorder.record_details
    }

    pub fn record_packet(&mut self, record: Option<PacketRecord>, size: usize, protocol: Protocol) {
        let recorder = &self.recorder;
        recorder.packets_sent.fetch_add(1, Ordering::Relaxed);
        recorder.bytes_sent.fetch_add(size as u64, Ordering::Relaxed);
        recorder.per_protocol[protocol.index()].fetch_add(1, Ordering::Relaxed);

        if let Some(record) = record.filter(|_| recorder.record_details) {
            self.records.push(record);
        }
        self.unit.packets_sent += 1;
        self.unit.bytes_sent += size as u64;
        let sent = &mut self.sent[protocol.index()];
        sent.0 += 1;
        sent.1 += size as u64;

        self.pending += 1;
        if self.pending >= recorder.flush_threshold {
            self.flush();
        }
    }

    pub fn record_error(&mut self, kind: ErrorKind) {
        self.recorder.errors[kind.index()].fetch_add(1, Ordering::Relaxed);
        self.unit.errors += 1;
        self.errors.add(kind, 1);
        self.pending += 1;
        if self.pending >= self.recorder.flush_threshold {
            self.flush();
        }
    }

    /// Number of entries waiting for the next merge.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn flush(&mut self) {
        if self.pending == 0 {
            return;
        }
        let recorder = self.recorder.clone();
        recorder.merge(self);
        self.pending = 0;
        self.unit = UnitStats::default();
        self.sent = [(0, 0); 3];
        self.errors = ErrorCounts::default();
    }
}

impl Drop for RecorderBuffer {
    fn drop(&mut self) {
        self.flush();
    }
}
