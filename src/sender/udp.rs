use std::{
    collections::{HashMap, HashSet},
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
};

use async_trait::async_trait;
use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use tokio::net::UdpSocket;

use super::{PacketSender, Sent, SourcePort};
use crate::{
    error::SendError,
    recorder::Protocol,
    target::TargetEndpoint,
    wire::{IPV4_HEADER_LEN, UDP_HEADER_LEN},
};

/// Largest payload of a single UDP datagram over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// UDP sender keeping one socket per local bind port.
///
/// With [`SourcePort::Match`] the local port equals the target port, so there
/// is one socket per distinct target port. With [`SourcePort::Random`] a single
/// kernel-chosen port serves every target.
pub struct UdpSender {
    iface: Option<String>,
    source_port: SourcePort,
    port_count: usize,
    sockets: HashMap<u16, UdpSocket>,
    failed: HashSet<u16>,
    binds: usize,
    filler: Vec<u8>,
}

impl UdpSender {
    pub fn new(iface: Option<&str>, source_port: SourcePort, port_count: usize) -> Self {
        Self {
            iface: iface.map(str::to_string),
            source_port,
            port_count: port_count.max(1),
            sockets: HashMap::new(),
            failed: HashSet::new(),
            binds: 0,
            filler: Vec::new(),
        }
    }

    /// Bind syscalls issued so far.
    pub fn bind_count(&self) -> usize {
        self.binds
    }

    pub fn pooled_ports(&self) -> usize {
        self.sockets.len()
    }

    pub fn local_addr(&self, key: u16) -> Option<SocketAddr> {
        self.sockets.get(&key).and_then(|s| s.local_addr().ok())
    }

    fn key_for(&self, target: &TargetEndpoint) -> u16 {
        match self.source_port {
            SourcePort::Match => target.port,
            SourcePort::Random => 0,
        }
    }

    fn open(&mut self, port: u16) -> io::Result<UdpSocket> {
        self.binds += 1;
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SockProtocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_reuse_port(true)?;
        if let Some(iface) = &self.iface {
            socket.bind_device(Some(iface.as_bytes()))?;
        }
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
        socket.set_nonblocking(true)?;
        UdpSocket::from_std(socket.into())
    }

    fn ensure_socket(&mut self, key: u16) -> Result<(), SendError> {
        if self.failed.contains(&key) {
            return Err(self.unavailable(key, io::ErrorKind::AddrNotAvailable.into()));
        }
        if !self.sockets.contains_key(&key) {
            match self.open(key) {
                Ok(socket) => {
                    self.sockets.insert(key, socket);
                }
                Err(err) => {
                    self.failed.insert(key);
                    return Err(self.unavailable(key, err));
                }
            }
        }
        Ok(())
    }

    fn unavailable(&self, port: u16, source: io::Error) -> SendError {
        let usable = match self.source_port {
            SourcePort::Match => self.port_count,
            SourcePort::Random => 1,
        };
        if self.failed.len() >= usable {
            SendError::Setup(source)
        } else {
            SendError::PortUnavailable { port, source }
        }
    }
}

#[async_trait]
impl PacketSender for UdpSender {
    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }

    async fn send(&mut self, target: TargetEndpoint, payload_len: usize) -> Result<Sent, SendError> {
        let payload_len = payload_len.min(MAX_UDP_PAYLOAD);
        if self.filler.len() < payload_len {
            self.filler.resize(payload_len, 0);
        }
        let key = self.key_for(&target);
        self.ensure_socket(key)?;

        let socket = self
            .sockets
            .get(&key)
            .ok_or_else(|| SendError::Invariant(format!("socket for port {key} vanished")))?;
        let bytes = socket
            .send_to(&self.filler[..payload_len], target.socket_addr())
            .await
            .map_err(SendError::from_send_io)?;
        Ok(Sent {
            src: socket.local_addr().ok(),
            bytes: bytes + UDP_HEADER_LEN + IPV4_HEADER_LEN,
        })
    }
}
