use opentelemetry::{
    KeyValue,
    metrics::{Counter, Gauge, Meter},
};

use crate::{error::ErrorKind, recorder::Protocol};

#[derive(Debug)]
pub struct TrafficMetrics {
    packets: Counter<u64>,
    bytes: Counter<u64>,
    errors: Counter<u64>,
}

impl TrafficMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            packets: meter.u64_counter("uetraffic_packets_sent_total").build(),
            bytes: meter.u64_counter("uetraffic_bytes_sent_total").build(),
            errors: meter.u64_counter("uetraffic_send_errors_total").build(),
        }
    }

    pub fn record_sent(&self, protocol: Protocol, packets: u64, bytes: u64) {
        if packets == 0 {
            return;
        }
        let attrs = [KeyValue::new("protocol", protocol.as_str())];
        self.packets.add(packets, &attrs);
        self.bytes.add(bytes, &attrs);
    }

    pub fn record_errors(&self, kind: ErrorKind, count: u64) {
        if count == 0 {
            return;
        }
        self.errors
            .add(count, &[KeyValue::new("kind", kind.as_str())]);
    }
}

#[derive(Debug)]
pub struct WorkerMetrics {
    running: Gauge<u64>,
    stopped: Counter<u64>,
}

impl WorkerMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            running: meter.u64_gauge("uetraffic_workers_running").build(),
            stopped: meter.u64_counter("uetraffic_workers_stopped_total").build(),
        }
    }

    pub fn record_running(&self, total: u64) {
        self.running.record(total, &[]);
    }

    pub fn record_stopped(&self, reason: &str) {
        self.stopped
            .add(1, &[KeyValue::new("reason", reason.to_string())]);
    }
}
