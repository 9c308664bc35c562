use std::{net::Ipv4Addr, time::Duration};

use async_trait::async_trait;
use tokio::time::Instant;

use super::{PacketSender, RawTransport, Sent};
use crate::{
    error::SendError,
    recorder::Protocol,
    target::TargetEndpoint,
    wire::{build_icmp_echo, parse_echo_reply, IPV4_HEADER_LEN},
};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// ICMP echo sender. The target port is ignored.
pub struct EchoSender<T> {
    transport: T,
    identifier: u16,
    sequence: u16,
    filler: Vec<u8>,
    recv_buf: Vec<u8>,
}

impl<T: RawTransport> EchoSender<T> {
    pub fn new(transport: T) -> Self {
        Self::with_identifier(transport, rand::random())
    }

    pub fn with_identifier(transport: T, identifier: u16) -> Self {
        Self {
            transport,
            identifier,
            sequence: 0,
            filler: Vec::new(),
            recv_buf: vec![0u8; u16::MAX as usize],
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn transmit(&mut self, dst: Ipv4Addr, payload_len: usize) -> Result<(u16, usize), SendError> {
        if self.filler.len() < payload_len {
            self.filler.resize(payload_len, 0);
        }
        self.sequence = self.sequence.wrapping_add(1);
        let message = build_icmp_echo(self.identifier, self.sequence, &self.filler[..payload_len]);
        let bytes = self
            .transport
            .send_to(&message, dst)
            .await
            .map_err(SendError::from_send_io)?;
        Ok((self.sequence, bytes))
    }

    /// Send one echo request and wait for its reply; returns the round-trip time.
    pub async fn probe(
        &mut self,
        dst: Ipv4Addr,
        payload_len: usize,
        timeout: Duration,
    ) -> Result<Duration, SendError> {
        let started = Instant::now();
        let (sequence, _) = self.transmit(dst, payload_len).await?;
        tokio::time::timeout(timeout, self.await_reply(dst, sequence))
            .await
            .map_err(|_| SendError::Timeout(timeout))??;
        Ok(started.elapsed())
    }

    async fn await_reply(&mut self, dst: Ipv4Addr, sequence: u16) -> Result<(), SendError> {
        loop {
            let n = self
                .transport
                .recv(&mut self.recv_buf)
                .await
                .map_err(SendError::Transient)?;
            match parse_echo_reply(&self.recv_buf[..n]) {
                Some(reply)
                    if reply.src == dst
                        && reply.identifier == self.identifier
                        && reply.sequence == sequence =>
                {
                    return Ok(());
                }
                _ => continue,
            }
        }
    }
}

#[async_trait]
impl<T: RawTransport> PacketSender for EchoSender<T> {
    fn protocol(&self) -> Protocol {
        Protocol::Icmp
    }

    async fn send(&mut self, target: TargetEndpoint, payload_len: usize) -> Result<Sent, SendError> {
        let (_, bytes) = self.transmit(target.address, payload_len).await?;
        Ok(Sent {
            src: None,
            bytes: bytes + IPV4_HEADER_LEN,
        })
    }
}
