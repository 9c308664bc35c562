use std::{net::Ipv4Addr, time::Duration};

use log::{debug, error, info, warn};

use crate::{
    error::SendError,
    profile::{TrafficClass, UnitProfile},
    recorder::{LiveCounters, RunStats},
    target::TargetEndpoint,
};

pub struct SimLogger;

impl SimLogger {
    // ===== Startup =====

    pub fn targets_expanded(addresses: usize, ports: usize) {
        info!(
            "Expanded targets: {addresses} addresses x {ports} ports = {} endpoints",
            addresses * ports
        );
    }

    pub fn units_generated(total: usize, per_class: &[(TrafficClass, usize)]) {
        let breakdown: Vec<String> = per_class
            .iter()
            .map(|(class, count)| format!("{class}={count}"))
            .collect();
        info!("Generated {total} units ({})", breakdown.join(", "));
    }

    pub fn unit_skipped(unit_id: u64, reason: &str) {
        warn!("Skipping unit {unit_id}: {reason}");
    }

    pub fn source_address(addr: Ipv4Addr, detected: bool) {
        if detected {
            info!("Using detected source address {addr}");
        } else {
            debug!("Using configured source address {addr}");
        }
    }

    // ===== Workers =====

    pub fn worker_started(profile: &UnitProfile) {
        debug!(
            "Unit {} ({}) started at {:.2} pkt/s",
            profile.id, profile.traffic_class, profile.packet_arrival_rate
        );
    }

    pub fn worker_finished(unit_id: u64, sent: u64) {
        debug!("Unit {unit_id} finished after {sent} packets");
    }

    pub fn worker_cancelled(unit_id: u64, sent: u64) {
        debug!("Unit {unit_id} cancelled after {sent} packets");
    }

    pub fn worker_failed(unit_id: u64, err: &SendError) {
        error!("Unit {unit_id} stopped: {err}");
    }

    pub fn transient_error(unit_id: u64, target: &TargetEndpoint, err: &SendError) {
        debug!("Unit {unit_id} send to {target} failed: {err}");
    }

    pub fn port_unavailable(unit_id: u64, err: &SendError) {
        warn!("Unit {unit_id}: {err}");
    }

    // ===== Probe =====

    pub fn probe_reply(unit_id: u64, target: Ipv4Addr, rtt: Duration) {
        info!(
            "[unit {unit_id}] reply from {target}: rtt={:.2}ms",
            rtt.as_secs_f64() * 1000.0
        );
    }

    pub fn probe_no_reply(unit_id: u64, target: Ipv4Addr, err: &dyn std::fmt::Display) {
        warn!("[unit {unit_id}] no reply from {target}: {err}");
    }

    // ===== Reporting =====

    pub fn progress(now: &LiveCounters, previous: &LiveCounters) {
        let window = now
            .elapsed
            .saturating_sub(previous.elapsed)
            .as_secs_f64()
            .max(0.001);
        let pps = now.packets_sent.saturating_sub(previous.packets_sent) as f64 / window;
        let bps = now.bytes_sent.saturating_sub(previous.bytes_sent) as f64 * 8.0 / window;
        info!(
            "[{:>6.1}s] sent={} bytes={} rate={:.1} pkt/s {:.3} Mbit/s errors={}",
            now.elapsed.as_secs_f64(),
            now.packets_sent,
            now.bytes_sent,
            pps,
            bps / 1_000_000.0,
            now.errors.total()
        );
    }

    pub fn run_summary(stats: &RunStats, failed: &[(u64, String)]) {
        info!(
            "Run finished in {:.2}s: {} packets, {} bytes, avg {:.1} pkt/s {:.3} Mbit/s",
            stats.elapsed.as_secs_f64(),
            stats.packets_sent,
            stats.bytes_sent,
            stats.average_pps(),
            stats.average_bitrate_bps() / 1_000_000.0
        );
        for (protocol, count) in stats.per_protocol.iter().filter(|(_, c)| **c > 0) {
            info!("  {protocol}: {count} packets");
        }
        info!(
            "  errors: transient={} setup={} invariant={}",
            stats.errors.transient, stats.errors.setup, stats.errors.invariant
        );
        for (unit_id, unit) in &stats.units {
            debug!(
                "  unit {unit_id}: {} packets, {} bytes, {} errors",
                unit.packets_sent, unit.bytes_sent, unit.errors
            );
        }
        for (unit_id, reason) in failed {
            error!("  unit {unit_id} stopped early: {reason}");
        }
    }
}
