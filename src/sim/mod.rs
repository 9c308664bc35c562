pub mod schedule;
pub mod worker;

use std::{fmt, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{sync::broadcast, task::JoinHandle};

pub use worker::{StopReason, Worker, WorkerReport, WorkerState};

use crate::{
    error::{ConfigError, RunError, SendError},
    logging::SimLogger,
    metrics::WorkerMetrics,
    profile::UnitProfile,
    recorder::{Recorder, RunStats},
    sender::PacketSender,
    target::TargetDistributor,
    telemetry::get_meter,
};

pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Run-wide knobs shared by every worker.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub batch_size: usize,
    pub duration: Option<Duration>,
    pub packets_per_unit: Option<u64>,
    /// Subtracted from every sampled size to get the payload length.
    pub header_len: usize,
    pub report_interval: Option<Duration>,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            duration: None,
            packets_per_unit: None,
            header_len: 0,
            report_interval: None,
            seed: None,
        }
    }
}

impl RunSettings {
    pub fn payload_len(&self, size: usize) -> usize {
        size.saturating_sub(self.header_len)
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub stats: RunStats,
    pub reports: Vec<WorkerReport>,
    /// Units never started because their arrival rate is not positive.
    pub skipped: Vec<u64>,
}

impl RunSummary {
    pub fn failures(&self) -> Vec<(u64, String)> {
        self.reports
            .iter()
            .filter_map(|r| match &r.reason {
                StopReason::Failed(err) => Some((r.unit_id, err.to_string())),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errors = &self.stats.errors;
        write!(
            f,
            "{} packets / {} bytes in {:.2}s, errors: transient={} setup={} invariant={}, {} of {} workers failed",
            self.stats.packets_sent,
            self.stats.bytes_sent,
            self.stats.elapsed.as_secs_f64(),
            errors.transient,
            errors.setup,
            errors.invariant,
            self.reports.iter().filter(|r| r.failed()).count(),
            self.reports.len()
        )
    }
}

/// Runs one worker per active unit against a shared distributor and recorder.
pub struct Simulation {
    distributor: Arc<TargetDistributor>,
    profiles: Vec<UnitProfile>,
    recorder: Arc<Recorder>,
    settings: RunSettings,
    metrics: WorkerMetrics,
}

impl Simulation {
    pub fn new(
        distributor: Arc<TargetDistributor>,
        profiles: Vec<UnitProfile>,
        recorder: Arc<Recorder>,
        settings: RunSettings,
    ) -> Self {
        Self {
            distributor,
            profiles,
            recorder,
            settings,
            metrics: WorkerMetrics::new(&get_meter()),
        }
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    /// Run until every worker stopped. `open_sender` is called once per unit,
    /// on that unit's task, to build the sender it exclusively owns.
    pub async fn run<F, S>(
        self,
        open_sender: F,
        stop: &broadcast::Sender<()>,
    ) -> Result<RunSummary, RunError>
    where
        F: Fn(&UnitProfile) -> Result<S, SendError> + Send + Sync + 'static,
        S: PacketSender + 'static,
    {
        self.start(open_sender, stop)?.finish().await
    }

    /// Spawn one worker per active unit. Every worker is subscribed to `stop`
    /// before this returns, so a stop sent afterwards reaches all of them.
    pub fn start<F, S>(
        self,
        open_sender: F,
        stop: &broadcast::Sender<()>,
    ) -> Result<RunningSimulation, RunError>
    where
        F: Fn(&UnitProfile) -> Result<S, SendError> + Send + Sync + 'static,
        S: PacketSender + 'static,
    {
        let open_sender = Arc::new(open_sender);
        let mut skipped = Vec::new();
        let mut handles: Vec<(UnitProfile, JoinHandle<WorkerReport>)> = Vec::new();

        for profile in self.profiles {
            if !profile.is_active() {
                SimLogger::unit_skipped(profile.id, "arrival rate is not positive");
                skipped.push(profile.id);
                continue;
            }
            let stop = stop.subscribe();
            let open_sender = open_sender.clone();
            let distributor = self.distributor.clone();
            let recorder = self.recorder.clone();
            let settings = self.settings.clone();
            let unit = profile.clone();
            let handle = tokio::spawn(async move {
                let sender = match open_sender(&unit) {
                    Ok(sender) => sender,
                    Err(err) => {
                        SimLogger::worker_failed(unit.id, &err);
                        recorder.buffer(unit.id).record_error(err.kind());
                        return WorkerReport::setup_failed(&unit, err);
                    }
                };
                Worker::new(unit, sender, distributor, &recorder, settings)
                    .run(stop)
                    .await
            });
            handles.push((profile, handle));
        }

        if handles.is_empty() {
            return Err(ConfigError::NoUsableUnits.into());
        }
        self.metrics.record_running(handles.len() as u64);

        let reporter = self
            .settings
            .report_interval
            .map(|every| spawn_reporter(self.recorder.clone(), every));

        Ok(RunningSimulation {
            handles,
            skipped,
            recorder: self.recorder,
            metrics: self.metrics,
            reporter,
        })
    }
}

/// Workers of a started [`Simulation`].
pub struct RunningSimulation {
    handles: Vec<(UnitProfile, JoinHandle<WorkerReport>)>,
    skipped: Vec<u64>,
    recorder: Arc<Recorder>,
    metrics: WorkerMetrics,
    reporter: Option<JoinHandle<()>>,
}

impl RunningSimulation {
    /// Wait for every worker and summarize the run.
    pub async fn finish(self) -> Result<RunSummary, RunError> {
        let (profiles, handles): (Vec<_>, Vec<_>) = self.handles.into_iter().unzip();
        let reports: Vec<WorkerReport> = join_all(handles)
            .await
            .into_iter()
            .zip(profiles)
            .map(|(joined, profile)| {
                joined.unwrap_or_else(|err| {
                    WorkerReport::setup_failed(
                        &profile,
                        SendError::Invariant(format!("worker task aborted: {err}")),
                    )
                })
            })
            .collect();

        if let Some(reporter) = self.reporter {
            reporter.abort();
        }
        self.metrics.record_running(0);
        for report in &reports {
            self.metrics.record_stopped(report.reason.label());
        }

        let summary = RunSummary {
            stats: self.recorder.snapshot(),
            reports,
            skipped: self.skipped,
        };
        SimLogger::run_summary(&summary.stats, &summary.failures());

        if summary.reports.iter().all(WorkerReport::failed) {
            return Err(RunError::AllWorkersFailed(summary.reports.len()));
        }
        Ok(summary)
    }
}

fn spawn_reporter(recorder: Arc<Recorder>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        let mut previous = recorder.counters();
        loop {
            ticker.tick().await;
            let now = recorder.counters();
            SimLogger::progress(&now, &previous);
            previous = now;
        }
    })
}
