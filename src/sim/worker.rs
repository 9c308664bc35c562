use std::{collections::HashSet, fmt, sync::Arc, time::SystemTime};

use rand::{SeedableRng, rngs::StdRng};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::{Instant, sleep_until},
};

use super::{RunSettings, schedule::Pacer};
use crate::{
    error::SendError,
    logging::SimLogger,
    profile::{TrafficClass, UnitProfile},
    recorder::{PacketRecord, Recorder, RecorderBuffer},
    sender::PacketSender,
    target::TargetDistributor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug)]
pub enum StopReason {
    /// Duration or packet budget exhausted.
    Completed,
    Cancelled,
    Failed(SendError),
}

impl StopReason {
    pub fn label(&self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::Cancelled => "cancelled",
            StopReason::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Failed(err) => write!(f, "failed: {err}"),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug)]
pub struct WorkerReport {
    pub unit_id: u64,
    pub traffic_class: TrafficClass,
    pub state: WorkerState,
    pub reason: StopReason,
    pub attempts: u64,
    pub packets_sent: u64,
}

impl WorkerReport {
    /// Report for a unit whose sender could not be built.
    pub fn setup_failed(profile: &UnitProfile, err: SendError) -> Self {
        Self {
            unit_id: profile.id,
            traffic_class: profile.traffic_class,
            state: WorkerState::Stopped,
            reason: StopReason::Failed(err),
            attempts: 0,
            packets_sent: 0,
        }
    }

    pub fn failed(&self) -> bool {
        matches!(self.reason, StopReason::Failed(_))
    }
}

/// Resolves on the run-level stop signal. Never resolves once every sender is gone.
pub(crate) async fn stop_signal(stop: &mut broadcast::Receiver<()>) {
    loop {
        match stop.recv().await {
            Ok(()) | Err(RecvError::Lagged(_)) => return,
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

/// Drives one unit: paces, batches and dispatches its sends and records them.
pub struct Worker<S> {
    profile: UnitProfile,
    sender: S,
    distributor: Arc<TargetDistributor>,
    buffer: RecorderBuffer,
    settings: RunSettings,
    pacer: Pacer,
    rng: StdRng,
    state: WorkerState,
    attempts: u64,
    sent: u64,
    warned_ports: HashSet<u16>,
}

impl<S: PacketSender> Worker<S> {
    pub fn new(
        profile: UnitProfile,
        sender: S,
        distributor: Arc<TargetDistributor>,
        recorder: &Arc<Recorder>,
        settings: RunSettings,
    ) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ profile.id),
            None => StdRng::from_entropy(),
        };
        Self {
            pacer: Pacer::new(&profile),
            buffer: recorder.buffer(profile.id),
            profile,
            sender,
            distributor,
            settings,
            rng,
            state: WorkerState::Idle,
            attempts: 0,
            sent: 0,
            warned_ports: HashSet::new(),
        }
    }

    fn remaining(&self) -> u64 {
        match self.settings.packets_per_unit {
            Some(cap) => cap.saturating_sub(self.attempts),
            None => u64::MAX,
        }
    }

    pub async fn run(mut self, mut stop: broadcast::Receiver<()>) -> WorkerReport {
        let origin = Instant::now();
        let deadline = self.settings.duration.map(|d| origin + d);
        self.state = WorkerState::Running;
        SimLogger::worker_started(&self.profile);

        let reason = loop {
            if expired(deadline) {
                break StopReason::Completed;
            }
            // Accumulate the waits of one batch, then send it back to back.
            let mut batch = 0usize;
            let mut last = None;
            let budget = (self.settings.batch_size as u64).min(self.remaining());
            while (batch as u64) < budget {
                let Some(at) = origin.checked_add(self.pacer.peek()) else {
                    break;
                };
                if deadline.is_some_and(|d| at >= d) {
                    break;
                }
                self.pacer.advance(&mut self.rng);
                last = Some(at);
                batch += 1;
            }
            let Some(wake) = last else {
                break StopReason::Completed;
            };

            tokio::select! {
                biased;
                _ = stop_signal(&mut stop) => break StopReason::Cancelled,
                _ = sleep_until(wake) => {}
            }

            if let Err(err) = self.dispatch(batch, deadline).await {
                SimLogger::worker_failed(self.profile.id, &err);
                break StopReason::Failed(err);
            }
        };

        self.state = WorkerState::Stopping;
        self.buffer.flush();
        self.state = WorkerState::Stopped;

        match &reason {
            StopReason::Completed => SimLogger::worker_finished(self.profile.id, self.sent),
            StopReason::Cancelled => SimLogger::worker_cancelled(self.profile.id, self.sent),
            StopReason::Failed(_) => {}
        }
        WorkerReport {
            unit_id: self.profile.id,
            traffic_class: self.profile.traffic_class,
            state: self.state,
            reason,
            attempts: self.attempts,
            packets_sent: self.sent,
        }
    }

    /// Sends up to `batch` packets. Sends that would start at or after
    /// `deadline` are dropped; cancellation does not cut a batch short.
    async fn dispatch(&mut self, batch: usize, deadline: Option<Instant>) -> Result<(), SendError> {
        let protocol = self.sender.protocol();
        for _ in 0..batch {
            if expired(deadline) {
                break;
            }
            let target = self.distributor.next_target();
            let size = self.profile.packet_size.sample(&mut self.rng);
            let payload_len = self.settings.payload_len(size);
            self.attempts += 1;

            match self.sender.send(target, payload_len).await {
                Ok(sent) => {
                    self.sent += 1;
                    let record = self.buffer.record_details().then(|| PacketRecord {
                        timestamp: SystemTime::now(),
                        unit_id: self.profile.id,
                        src: sent.src,
                        dst: target.socket_addr(),
                        size: sent.bytes,
                        protocol,
                    });
                    self.buffer.record_packet(record, sent.bytes, protocol);
                }
                Err(err) => {
                    self.buffer.record_error(err.kind());
                    if err.is_fatal() {
                        return Err(err);
                    }
                    match &err {
                        SendError::PortUnavailable { port, .. } => {
                            if self.warned_ports.insert(*port) {
                                SimLogger::port_unavailable(self.profile.id, &err);
                            }
                        }
                        _ => SimLogger::transient_error(self.profile.id, &target, &err),
                    }
                }
            }
        }
        Ok(())
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}
