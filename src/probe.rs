//! `--check`: one ICMP echo per unit to see which units can reach the targets.

use std::{io, net::Ipv4Addr, time::Duration};

use futures::future::join_all;

use crate::{
    error::SendError,
    logging::SimLogger,
    profile::UnitProfile,
    sender::{EchoSender, RawTransport},
};

/// Payload bytes of a probe echo request.
pub const PROBE_PAYLOAD_LEN: usize = 32;

#[derive(Debug)]
pub struct ProbeOutcome {
    pub unit_id: u64,
    pub target: Ipv4Addr,
    pub result: Result<Duration, SendError>,
}

impl ProbeOutcome {
    pub fn reachable(&self) -> bool {
        self.result.is_ok()
    }
}

/// Probe `target` once from every unit concurrently. `open` creates the raw
/// transport of a unit, bound to its interface when it has one.
pub async fn check_connectivity<F, T>(
    units: &[UnitProfile],
    target: Ipv4Addr,
    open: F,
    timeout: Duration,
) -> Vec<ProbeOutcome>
where
    F: Fn(&UnitProfile) -> io::Result<T>,
    T: RawTransport,
{
    let probes = units.iter().map(|unit| {
        let transport = open(unit);
        async move {
            let result = match transport {
                Ok(transport) => {
                    EchoSender::new(transport)
                        .probe(target, PROBE_PAYLOAD_LEN, timeout)
                        .await
                }
                Err(err) => Err(SendError::Setup(err)),
            };
            match &result {
                Ok(rtt) => SimLogger::probe_reply(unit.id, target, *rtt),
                Err(err) => SimLogger::probe_no_reply(unit.id, target, err),
            }
            ProbeOutcome {
                unit_id: unit.id,
                target,
                result,
            }
        }
    });
    join_all(probes).await
}
