//! Re-injection toward the backends.
//!
//! Each family has its own concrete pipeline: IPv4 wraps the captured
//! datagram in a self-built IP-in-IP header, IPv6 hands the bare ICMPv6
//! message to the kernel. Both send through the `Transmit` trait so the
//! fan-out logic can be tested without raw sockets.

mod ipv4;
mod ipv6;

pub use ipv4::Ipv4Injector;
pub use ipv6::Ipv6Injector;

use std::io;
use std::net::{IpAddr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::warn;

use crate::error::{InjectError, TransformError};
use crate::Family;

/// Raw IPv4 with a caller-supplied header. Send only.
#[cfg(target_os = "linux")]
const IPPROTO_RAW: i32 = libc::IPPROTO_RAW;
#[cfg(not(target_os = "linux"))]
const IPPROTO_RAW: i32 = 255;

/// Outcome of relaying one frame to every backend of its family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Sends issued.
    pub attempted: usize,
    /// Sends that returned an error.
    pub failed: usize,
}

/// A datagram transmit path.
pub trait Transmit: Send {
    /// Send `buf` as one datagram to `dst`.
    fn send_to(&mut self, buf: &[u8], dst: IpAddr) -> io::Result<usize>;
}

/// Per-family pipeline: transform a captured frame and fan it out.
pub trait Forward: Send {
    /// The family this pipeline serves.
    fn family(&self) -> Family;

    /// Relay `frame` to every backend.
    ///
    /// Backend failures are logged and reflected in the returned
    /// `Delivery`; only a frame that cannot be transformed is an error.
    fn forward(&mut self, frame: &[u8]) -> Result<Delivery, TransformError>;
}

/// Raw transmit socket backed by `socket2`.
pub struct RawSocket {
    socket: Socket,
}

impl RawSocket {
    /// Raw IPv4 socket; every datagram written carries its own header.
    pub fn ipv4() -> Result<Self, InjectError> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(IPPROTO_RAW)))
            .map_err(|source| InjectError::Socket {
                family: Family::Ipv4,
                source,
            })?;

        Ok(Self { socket })
    }

    /// Raw ICMPv6 socket; the kernel builds the IPv6 header and checksum.
    pub fn icmpv6() -> Result<Self, InjectError> {
        let socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6)).map_err(
            |source| InjectError::Socket {
                family: Family::Ipv6,
                source,
            },
        )?;

        if let Err(e) = block_icmpv6_input(&socket) {
            warn!(error = %e, "unable to filter ICMPv6 input on transmit socket");
        }

        Ok(Self { socket })
    }
}

impl Transmit for RawSocket {
    fn send_to(&mut self, buf: &[u8], dst: IpAddr) -> io::Result<usize> {
        self.socket.send_to(buf, &SocketAddr::new(dst, 0).into())
    }
}

/// The transmit socket is never read; drop every inbound ICMPv6 type so
/// its receive queue stays empty.
#[cfg(target_os = "linux")]
fn block_icmpv6_input(socket: &Socket) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    // <netinet/icmp6.h>; libc does not export it for Linux.
    const ICMP6_FILTER: libc::c_int = 1;
    let block_all = [u32::MAX; 8];

    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_ICMPV6,
            ICMP6_FILTER,
            block_all.as_ptr() as *const libc::c_void,
            std::mem::size_of_val(&block_all) as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn block_icmpv6_input(_socket: &Socket) -> io::Result<()> {
    Ok(())
}
