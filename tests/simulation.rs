//! End-to-end runs of the simulation engine against in-memory transports.

use std::{collections::BTreeMap, io, net::Ipv4Addr, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use ue_traffic::{
    config::SimConfig,
    error::SendError,
    profile::UnitProfile,
    recorder::{Protocol, Recorder},
    sender::{AttackMode, PacketSender, PacketType, RawTransport, Sent, TcpSender},
    sim::{Simulation, StopReason},
    target::TargetEndpoint,
    wire::{self, parse_tcp_packet, tcp_checksum, TcpFlags, IPV4_HEADER_LEN},
};

const SRC: Ipv4Addr = Ipv4Addr::new(10, 45, 0, 2);

/// Raw transport that keeps every datagram and never receives anything.
#[derive(Clone, Default)]
struct Capture {
    sent: Arc<Mutex<Vec<(Ipv4Addr, Vec<u8>)>>>,
}

#[async_trait]
impl RawTransport for Capture {
    async fn send_to(&mut self, packet: &[u8], dst: Ipv4Addr) -> io::Result<usize> {
        self.sent.lock().push((dst, packet.to_vec()));
        Ok(packet.len())
    }

    async fn recv(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        std::future::pending().await
    }
}

fn syn_flood_config() -> SimConfig {
    r#"
[simulation]
packet_type = "tcp"
tcp_attack_mode = "syn"
target_subnets = ["10.0.0.0/30"]
target_ports = "443"
packets_per_unit = 10
record_packet_details = true
report_interval_sec = 0

[allocation]
total_count = 1
mode = "count"
distribution = { high_traffic = 1 }

[profiles.high_traffic]
packet_arrival_rate = 1000.0
packet_size = { min = 64, max = 64 }
"#
    .parse()
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn syn_flood_over_a_slash_30() {
    let plan = syn_flood_config().plan_with(|_| true).unwrap();
    assert_eq!(
        plan.distributor.addresses(),
        &[Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
    );
    assert_eq!(plan.sender.packet_type, PacketType::Tcp);
    assert_eq!(plan.profiles.len(), 1);

    let capture = Capture::default();
    let recorder = Arc::new(Recorder::new(plan.record_packet_details));
    let simulation = Simulation::new(plan.distributor, plan.profiles, recorder, plan.run);
    let transport = capture.clone();
    let (stop, _) = broadcast::channel(1);

    let summary = simulation
        .run(
            move |_: &UnitProfile| Ok(TcpSender::new(transport.clone(), SRC, AttackMode::Syn)),
            &stop,
        )
        .await
        .unwrap();

    let sent = capture.sent.lock();
    assert_eq!(sent.len(), 10);
    let mut per_target: BTreeMap<Ipv4Addr, usize> = BTreeMap::new();
    for (dst, packet) in sent.iter() {
        *per_target.entry(*dst).or_default() += 1;
        assert_eq!(wire::checksum(&packet[..IPV4_HEADER_LEN]), 0);
        assert_eq!(tcp_checksum(SRC, *dst, &packet[IPV4_HEADER_LEN..]), 0);

        let segment = parse_tcp_packet(packet).unwrap();
        assert_eq!(segment.dst, *dst);
        assert_eq!(segment.dst_port, 443);
        assert_eq!(segment.flags, TcpFlags::SYN);
        assert_eq!(segment.payload_len, 0);
    }
    assert_eq!(per_target[&Ipv4Addr::new(10, 0, 0, 1)], 5);
    assert_eq!(per_target[&Ipv4Addr::new(10, 0, 0, 2)], 5);

    assert_eq!(summary.stats.packets_sent, 10);
    assert_eq!(summary.stats.per_protocol["tcp"], 10);
    assert_eq!(summary.stats.records.len(), 10);
    assert!(matches!(summary.reports[0].reason, StopReason::Completed));
}

/// Counts sends without touching the network.
struct Counting;

#[async_trait]
impl PacketSender for Counting {
    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }

    async fn send(&mut self, _target: TargetEndpoint, payload_len: usize) -> Result<Sent, SendError> {
        Ok(Sent {
            src: None,
            bytes: payload_len,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn recorder_conserves_every_packet() {
    let config: SimConfig = r#"
[simulation]
target_subnets = ["10.9.0.0/29"]
target_ports = "5000-5003"
packets_per_unit = 250
batch_size = 16
record_packet_details = true
report_interval_sec = 0

[allocation]
total_count = 12
[allocation.distribution]
high = 0.5
mid = 0.25
low = 0.25

[profiles.high]
packet_arrival_rate = 500.0
arrival_process = "poisson"
packet_size = { min = 64, max = 64 }
[profiles.mid]
packet_arrival_rate = 200.0
packet_size = { min = 64, max = 64 }
[profiles.low]
packet_arrival_rate = 100.0
packet_size = { min = 64, max = 64 }
[profiles.low.burst]
enabled = true
on_duration_sec = 0.5
off_duration_sec = 0.5
burst_multiplier = 2.0
"#
    .parse()
    .unwrap();
    let plan = config.plan_with(|_| true).unwrap();
    assert_eq!(plan.profiles.len(), 12);

    let recorder = Arc::new(Recorder::new(true));
    let simulation = Simulation::new(plan.distributor, plan.profiles, recorder, plan.run);
    let (stop, _) = broadcast::channel(1);
    let summary = simulation
        .run(|_: &UnitProfile| Ok(Counting), &stop)
        .await
        .unwrap();

    assert_eq!(summary.stats.packets_sent, 12 * 250);
    assert_eq!(summary.stats.bytes_sent, 12 * 250 * 64);
    assert_eq!(summary.stats.records.len(), 12 * 250);
    assert_eq!(summary.stats.units.len(), 12);
    assert!(summary.stats.units.values().all(|unit| unit.packets_sent == 250));
    assert_eq!(summary.stats.errors.total(), 0);
}
