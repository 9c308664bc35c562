pub mod echo;
pub mod iface;
pub mod raw;
pub mod tcp;
pub mod udp;

use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use echo::{EchoSender, DEFAULT_PROBE_TIMEOUT};
pub use iface::SimulatorType;
pub use raw::{RawKind, RawSocket, RawTransport};
pub use tcp::TcpSender;
pub use udp::UdpSender;

use crate::{
    error::SendError,
    logging::SimLogger,
    profile::UnitProfile,
    recorder::Protocol,
    target::TargetEndpoint,
    wire::{ICMP_HEADER_LEN, IPV4_HEADER_LEN, TCP_HEADER_LEN, UDP_HEADER_LEN},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PacketType {
    #[default]
    Udp,
    Tcp,
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttackMode {
    #[default]
    Syn,
    LazyMimicTls,
}

/// How the local port of a flow is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourcePort {
    /// Random ephemeral port per TCP flow, one kernel-chosen port for UDP.
    #[default]
    Random,
    /// Local port equals the target port.
    Match,
}

/// A packet that left through a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sent {
    pub src: Option<SocketAddr>,
    /// Size of the IPv4 datagrams put on the wire, headers included. For raw
    /// TCP this sums every datagram of the exchange.
    pub bytes: usize,
}

/// Transmits packets of one kind. Each instance and its sockets belong to a single worker.
#[async_trait]
pub trait PacketSender: Send {
    fn protocol(&self) -> Protocol;

    async fn send(&mut self, target: TargetEndpoint, payload_len: usize) -> Result<Sent, SendError>;
}

#[async_trait]
impl<S: PacketSender + ?Sized> PacketSender for Box<S> {
    fn protocol(&self) -> Protocol {
        (**self).protocol()
    }

    async fn send(&mut self, target: TargetEndpoint, payload_len: usize) -> Result<Sent, SendError> {
        (**self).send(target, payload_len).await
    }
}

/// Everything needed to build the sender of any unit.
#[derive(Debug, Clone)]
pub struct SenderSettings {
    pub packet_type: PacketType,
    pub attack_mode: AttackMode,
    pub source_port: SourcePort,
    pub source_ip: Option<Ipv4Addr>,
    pub handshake_timeout: Duration,
    pub simulator: SimulatorType,
    /// Address used to discover the local source address when none is configured.
    pub probe_address: Ipv4Addr,
    /// Number of distinct target ports.
    pub port_count: usize,
}

impl SenderSettings {
    pub fn protocol(&self) -> Protocol {
        match self.packet_type {
            PacketType::Udp => Protocol::Udp,
            PacketType::Tcp => Protocol::Tcp,
            PacketType::Ping => Protocol::Icmp,
        }
    }

    /// IPv4 plus transport header length of one packet.
    pub fn header_len(&self) -> usize {
        IPV4_HEADER_LEN
            + match self.packet_type {
                PacketType::Udp => UDP_HEADER_LEN,
                PacketType::Tcp => TCP_HEADER_LEN,
                PacketType::Ping => ICMP_HEADER_LEN,
            }
    }

    pub fn interface(&self, unit_id: u64) -> Option<String> {
        self.simulator.interface_name(unit_id)
    }

    /// Open the sockets for one unit.
    pub fn build(&self, unit: &UnitProfile) -> Result<Box<dyn PacketSender>, SendError> {
        let iface = self.interface(unit.id);
        let iface = iface.as_deref();
        match self.packet_type {
            PacketType::Udp => Ok(Box::new(UdpSender::new(
                iface,
                self.source_port,
                self.port_count,
            ))),
            PacketType::Tcp => {
                let transport = RawSocket::open(RawKind::Tcp, iface).map_err(SendError::Setup)?;
                let src = match self.source_ip {
                    Some(ip) => {
                        SimLogger::source_address(ip, false);
                        ip
                    }
                    None => {
                        let ip = raw::detect_source_ip(self.probe_address, iface)
                            .map_err(SendError::Setup)?;
                        SimLogger::source_address(ip, true);
                        ip
                    }
                };
                Ok(Box::new(
                    TcpSender::new(transport, src, self.attack_mode)
                        .with_source_port(self.source_port)
                        .with_handshake_timeout(self.handshake_timeout),
                ))
            }
            PacketType::Ping => {
                let transport = RawSocket::open(RawKind::Icmp, iface).map_err(SendError::Setup)?;
                Ok(Box::new(EchoSender::new(transport)))
            }
        }
    }
}
