//! Byte-level packet construction and parsing.
//!
//! Everything here is pure: builders take header fields and return the encoded
//! bytes, parsers take received bytes and never allocate.

use std::{fmt, net::Ipv4Addr, ops::BitOr};

use bytes::{BufMut, Bytes, BytesMut};
use rand::RngCore;

pub const IPV4_HEADER_LEN: usize = 20;
pub const TCP_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;
pub const ICMP_HEADER_LEN: usize = 8;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;

pub const DEFAULT_TTL: u8 = 64;
pub const DEFAULT_WINDOW: u16 = 64240;

const IPV4_DONT_FRAGMENT: u16 = 0x4000;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_ECHO_REQUEST: u8 = 8;

/// TLS record header bytes: handshake content type, legacy version 3.1.
pub const TLS_MIMIC_MAGIC: [u8; 3] = [0x16, 0x03, 0x01];
pub const TLS_MIMIC_HEADER_LEN: usize = 5;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("packet of {0} bytes exceeds the IPv4 total length limit")]
    TooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const FIN: TcpFlags = TcpFlags(0x01);
    pub const SYN: TcpFlags = TcpFlags(0x02);
    pub const RST: TcpFlags = TcpFlags(0x04);
    pub const PSH: TcpFlags = TcpFlags(0x08);
    pub const ACK: TcpFlags = TcpFlags(0x10);
    pub const URG: TcpFlags = TcpFlags(0x20);

    pub const fn from_byte(byte: u8) -> Self {
        TcpFlags(byte)
    }

    pub const fn to_byte(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: TcpFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TcpFlags {
    type Output = TcpFlags;

    fn bitor(self, rhs: TcpFlags) -> TcpFlags {
        TcpFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (TcpFlags::FIN, "FIN"),
            (TcpFlags::SYN, "SYN"),
            (TcpFlags::RST, "RST"),
            (TcpFlags::PSH, "PSH"),
            (TcpFlags::ACK, "ACK"),
            (TcpFlags::URG, "URG"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "[{}]", set.join("|"))
    }
}

/// Add `data` to a running one's-complement sum as big-endian 16-bit words.
/// An odd trailing byte is padded with zero.
fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Internet checksum (RFC 1071).
pub fn checksum(data: &[u8]) -> u16 {
    fold(sum_words(data, 0))
}

/// TCP checksum over the IPv4 pseudo-header and the full segment.
pub fn tcp_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> u16 {
    let mut sum = sum_words(&src.octets(), 0);
    sum = sum_words(&dst.octets(), sum);
    sum += IPPROTO_TCP as u32;
    sum += segment.len() as u32;
    fold(sum_words(segment, sum))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub identification: u16,
    pub ttl: u8,
}

impl Ipv4Header {
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, identification: u16) -> Self {
        Self {
            src,
            dst,
            protocol,
            identification,
            ttl: DEFAULT_TTL,
        }
    }

    /// Encode the header for a datagram carrying `payload_len` bytes.
    pub fn encode(&self, payload_len: usize) -> Result<[u8; IPV4_HEADER_LEN], WireError> {
        let total = IPV4_HEADER_LEN + payload_len;
        let total_len = u16::try_from(total).map_err(|_| WireError::TooLarge(total))?;

        let mut header = [0u8; IPV4_HEADER_LEN];
        header[0] = 0x45;
        header[2..4].copy_from_slice(&total_len.to_be_bytes());
        header[4..6].copy_from_slice(&self.identification.to_be_bytes());
        header[6..8].copy_from_slice(&IPV4_DONT_FRAGMENT.to_be_bytes());
        header[8] = self.ttl;
        header[9] = self.protocol;
        header[12..16].copy_from_slice(&self.src.octets());
        header[16..20].copy_from_slice(&self.dst.octets());
        let csum = checksum(&header);
        header[10..12].copy_from_slice(&csum.to_be_bytes());
        Ok(header)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
}

impl TcpHeader {
    pub fn new(src_port: u16, dst_port: u16, seq: u32, ack: u32, flags: TcpFlags) -> Self {
        Self {
            src_port,
            dst_port,
            seq,
            ack,
            flags,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Encode a complete IPv4 datagram carrying one TCP segment, ready for an
/// `IP_HDRINCL` raw socket.
pub fn build_tcp_packet(
    ip: &Ipv4Header,
    tcp: &TcpHeader,
    payload: &[u8],
) -> Result<Bytes, WireError> {
    let segment_len = TCP_HEADER_LEN + payload.len();
    let ip_header = ip.encode(segment_len)?;

    let mut buf = BytesMut::with_capacity(IPV4_HEADER_LEN + segment_len);
    buf.put_slice(&ip_header);
    buf.put_u16(tcp.src_port);
    buf.put_u16(tcp.dst_port);
    buf.put_u32(tcp.seq);
    buf.put_u32(tcp.ack);
    buf.put_u8(((TCP_HEADER_LEN / 4) as u8) << 4);
    buf.put_u8(tcp.flags.to_byte());
    buf.put_u16(tcp.window);
    buf.put_u16(0); // checksum
    buf.put_u16(0); // urgent pointer
    buf.put_slice(payload);

    let csum = tcp_checksum(ip.src, ip.dst, &buf[IPV4_HEADER_LEN..]);
    let at = IPV4_HEADER_LEN + 16;
    buf[at..at + 2].copy_from_slice(&csum.to_be_bytes());
    Ok(buf.freeze())
}

/// Encode an ICMP echo request message (without IP header).
pub fn build_icmp_echo(identifier: u16, sequence: u16, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(ICMP_HEADER_LEN + payload.len());
    buf.put_u8(ICMP_ECHO_REQUEST);
    buf.put_u8(0);
    buf.put_u16(0);
    buf.put_u16(identifier);
    buf.put_u16(sequence);
    buf.put_slice(payload);
    let csum = checksum(&buf);
    buf[2..4].copy_from_slice(&csum.to_be_bytes());
    buf.freeze()
}

/// Payload shaped like a TLS record header followed by `body_len` random bytes.
/// Only the magic and the length field are meaningful.
pub fn mimic_tls_payload<R: RngCore + ?Sized>(body_len: u16, rng: &mut R) -> Bytes {
    let body_len_usize = body_len as usize;
    let mut buf = BytesMut::with_capacity(TLS_MIMIC_HEADER_LEN + body_len_usize);
    buf.put_slice(&TLS_MIMIC_MAGIC);
    buf.put_u16(body_len);
    buf.resize(TLS_MIMIC_HEADER_LEN + body_len_usize, 0);
    rng.fill_bytes(&mut buf[TLS_MIMIC_HEADER_LEN..]);
    buf.freeze()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTcp {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub payload_len: usize,
}

fn ipv4_payload(packet: &[u8], protocol: u8) -> Option<(Ipv4Addr, Ipv4Addr, &[u8])> {
    if packet.len() < IPV4_HEADER_LEN || packet[0] >> 4 != 4 || packet[9] != protocol {
        return None;
    }
    let ihl = ((packet[0] & 0x0f) as usize) * 4;
    let total = u16::from_be_bytes([packet[2], packet[3]]) as usize;
    if ihl < IPV4_HEADER_LEN || total < ihl || packet.len() < total {
        return None;
    }
    let src = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let dst = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
    Some((src, dst, &packet[ihl..total]))
}

/// Parse an IPv4 datagram carrying TCP, as read from a raw socket.
pub fn parse_tcp_packet(packet: &[u8]) -> Option<ParsedTcp> {
    let (src, dst, segment) = ipv4_payload(packet, IPPROTO_TCP)?;
    if segment.len() < TCP_HEADER_LEN {
        return None;
    }
    let data_offset = ((segment[12] >> 4) as usize) * 4;
    if data_offset < TCP_HEADER_LEN || segment.len() < data_offset {
        return None;
    }
    Some(ParsedTcp {
        src,
        dst,
        src_port: u16::from_be_bytes([segment[0], segment[1]]),
        dst_port: u16::from_be_bytes([segment[2], segment[3]]),
        seq: u32::from_be_bytes([segment[4], segment[5], segment[6], segment[7]]),
        ack: u32::from_be_bytes([segment[8], segment[9], segment[10], segment[11]]),
        flags: TcpFlags::from_byte(segment[13]),
        payload_len: segment.len() - data_offset,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub src: Ipv4Addr,
    pub identifier: u16,
    pub sequence: u16,
}

/// Parse an IPv4 datagram carrying an ICMP echo reply.
pub fn parse_echo_reply(packet: &[u8]) -> Option<EchoReply> {
    let (src, _, message) = ipv4_payload(packet, IPPROTO_ICMP)?;
    if message.len() < ICMP_HEADER_LEN || message[0] != ICMP_ECHO_REPLY {
        return None;
    }
    Some(EchoReply {
        src,
        identifier: u16::from_be_bytes([message[4], message[5]]),
        sequence: u16::from_be_bytes([message[6], message[7]]),
    })
}
