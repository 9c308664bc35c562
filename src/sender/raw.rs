use std::{
    io::{self, Read},
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    os::fd::AsRawFd,
};

use async_trait::async_trait;
use socket2::{Domain, Protocol as SockProtocol, SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;

/// Datagram path used by the raw-socket senders.
///
/// [`RawSocket`] is the kernel implementation; tests substitute an in-memory one.
#[async_trait]
pub trait RawTransport: Send {
    /// Send one datagram to `dst`.
    async fn send_to(&mut self, packet: &[u8], dst: Ipv4Addr) -> io::Result<usize>;

    /// Receive one datagram including its IPv4 header.
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    /// TCP with `IP_HDRINCL`: callers hand over complete IPv4 datagrams.
    Tcp,
    /// ICMP: callers hand over the ICMP message, the kernel adds the IPv4 header.
    Icmp,
}

/// Open a blocking raw socket of the given kind, optionally bound to an interface.
pub fn open_raw(kind: RawKind, iface: Option<&str>) -> io::Result<Socket> {
    let protocol = match kind {
        RawKind::Tcp => SockProtocol::TCP,
        RawKind::Icmp => SockProtocol::ICMPV4,
    };
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(protocol))?;
    if kind == RawKind::Tcp {
        set_header_included(&socket)?;
    }
    if let Some(iface) = iface {
        socket.bind_device(Some(iface.as_bytes()))?;
    }
    Ok(socket)
}

fn set_header_included(socket: &Socket) -> io::Result<()> {
    let enable: libc::c_int = 1;
    // SAFETY: valid fd owned by `socket`, option value is a c_int that outlives the call.
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_HDRINCL,
            &enable as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Fails when the process may not open raw sockets.
pub fn check_raw_permission(kind: RawKind) -> io::Result<()> {
    open_raw(kind, None).map(drop)
}

/// Kernel raw socket driven by the tokio reactor. Closed when dropped.
pub struct RawSocket {
    fd: AsyncFd<Socket>,
}

impl RawSocket {
    pub fn open(kind: RawKind, iface: Option<&str>) -> io::Result<Self> {
        let socket = open_raw(kind, iface)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            fd: AsyncFd::new(socket)?,
        })
    }
}

#[async_trait]
impl RawTransport for RawSocket {
    async fn send_to(&mut self, packet: &[u8], dst: Ipv4Addr) -> io::Result<usize> {
        let addr = SockAddr::from(SocketAddrV4::new(dst, 0));
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| inner.get_ref().send_to(packet, &addr)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| {
                let mut socket: &Socket = inner.get_ref();
                socket.read(&mut buf[..])
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

/// Local address the kernel would use to reach `probe`, found by connecting a
/// UDP socket (no packet is sent).
pub fn detect_source_ip(probe: Ipv4Addr, iface: Option<&str>) -> io::Result<Ipv4Addr> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SockProtocol::UDP))?;
    if let Some(iface) = iface {
        socket.bind_device(Some(iface.as_bytes()))?;
    }
    socket.connect(&SockAddr::from(SocketAddrV4::new(probe, 9)))?;
    match socket.local_addr()?.as_socket() {
        Some(SocketAddr::V4(addr)) if !addr.ip().is_unspecified() => Ok(*addr.ip()),
        _ => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no IPv4 source address towards {probe}"),
        )),
    }
}
