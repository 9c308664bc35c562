use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, Exp};

use crate::profile::{ArrivalProcess, BurstSpec, UnitProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Burst disabled.
    Steady,
    On,
    Off,
}

/// Send timeline of one unit, as offsets from the worker's start.
///
/// The burst cycle starts with its ON phase at offset zero. Sends that would
/// fall into an OFF phase are moved to the start of the next ON phase.
#[derive(Debug, Clone)]
pub struct Pacer {
    rate: f64,
    process: ArrivalProcess,
    burst: BurstSpec,
    next: Duration,
}

impl Pacer {
    pub fn new(profile: &UnitProfile) -> Self {
        Self {
            rate: profile.packet_arrival_rate,
            process: profile.arrival_process,
            burst: profile.burst,
            next: Duration::ZERO,
        }
    }

    fn cycle(&self) -> Option<(u128, u128)> {
        if !self.burst.enabled {
            return None;
        }
        let on = self.burst.on_duration.as_nanos();
        let cycle = on + self.burst.off_duration.as_nanos();
        (on > 0 && cycle > 0).then_some((on, cycle))
    }

    pub fn phase_at(&self, at: Duration) -> Phase {
        match self.cycle() {
            None => Phase::Steady,
            Some((on, cycle)) if at.as_nanos() % cycle < on => Phase::On,
            Some(_) => Phase::Off,
        }
    }

    pub fn effective_rate(&self, at: Duration) -> f64 {
        match self.phase_at(at) {
            Phase::Steady => self.rate,
            Phase::On => self.rate * self.burst.multiplier,
            Phase::Off => 0.0,
        }
    }

    /// Start of the next ON phase when `at` is inside an OFF phase.
    fn skip_off(&self, at: Duration) -> Duration {
        match self.cycle() {
            Some((on, cycle)) => {
                let pos = at.as_nanos() % cycle;
                if pos < on {
                    at
                } else {
                    at.saturating_add(nanos(cycle - pos))
                }
            }
            None => at,
        }
    }

    /// Offset of the next scheduled send, without consuming it.
    pub fn peek(&self) -> Duration {
        self.next
    }

    /// Consume the next scheduled send and return its offset.
    pub fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let at = self.skip_off(self.next);
        let rate = self.effective_rate(at);
        let gap = match self.process {
            ArrivalProcess::Constant => 1.0 / rate,
            ArrivalProcess::Poisson => match Exp::new(rate) {
                Ok(exp) => exp.sample(rng),
                Err(_) => 1.0 / rate,
            },
        };
        let gap = Duration::try_from_secs_f64(gap).unwrap_or(Duration::MAX);
        self.next = self.skip_off(at.saturating_add(gap));
        at
    }
}

fn nanos(n: u128) -> Duration {
    Duration::new((n / 1_000_000_000) as u64, (n % 1_000_000_000) as u32)
}
