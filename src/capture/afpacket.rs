//! Linux capture on `AF_PACKET` raw sockets.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

use tracing::{debug, info};

use super::filter::{self, Instruction};
use super::{interface_index, FrameSource, SNAP_LEN};
use crate::error::CaptureError;
use crate::Family;

const ETH_P_IP: u16 = 0x0800;
const ETH_P_IPV6: u16 = 0x86dd;

/// `PACKET_IGNORE_OUTGOING` from `<linux/if_packet.h>` (Linux 4.20+).
const PACKET_IGNORE_OUTGOING: libc::c_int = 23;

/// Upper bound on a single blocking read, so stop requests are noticed.
pub const READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Filtered, non-promiscuous capture bound to a single interface.
pub struct AfPacketCapture {
    fd: OwnedFd,
    buffer: Vec<u8>,
    interface: String,
}

impl AfPacketCapture {
    /// Open a capture for `family` on `interface`.
    ///
    /// The socket is created with protocol 0 so it receives nothing until
    /// it is bound, which happens only after the filter is attached.
    pub fn new(interface: &str, family: Family) -> Result<Self, CaptureError> {
        let if_index = interface_index(interface)?;

        let fd = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW | libc::SOCK_CLOEXEC, 0) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::PermissionDenied {
                return Err(CaptureError::InsufficientPermissions(interface.to_string()));
            }
            return Err(CaptureError::Open {
                interface: interface.to_string(),
                source: err,
            });
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        attach_filter(&fd, &filter::program(family)).map_err(|source| CaptureError::Filter {
            interface: interface.to_string(),
            source,
        })?;

        set_read_timeout(&fd, READ_TIMEOUT).map_err(|source| CaptureError::Open {
            interface: interface.to_string(),
            source,
        })?;

        let protocol = match family {
            Family::Ipv4 => ETH_P_IP,
            Family::Ipv6 => ETH_P_IPV6,
        };
        // Our own relays leave through this interface and would match the
        // filter again. Older kernels lack the option; `next_frame` drops
        // outgoing frames either way.
        if let Err(e) = ignore_outgoing(&fd) {
            debug!(interface = %interface, error = %e, "PACKET_IGNORE_OUTGOING unavailable");
        }

        bind(&fd, if_index, protocol).map_err(|source| CaptureError::Open {
            interface: interface.to_string(),
            source,
        })?;

        info!(
            interface = %interface,
            family = %family,
            if_index,
            "capture opened"
        );

        Ok(Self {
            fd,
            buffer: vec![0u8; SNAP_LEN],
            interface: interface.to_string(),
        })
    }
}

impl FrameSource for AfPacketCapture {
    fn next_frame(&mut self) -> Result<Option<&[u8]>, CaptureError> {
        let mut from: libc::sockaddr_ll = unsafe { mem::zeroed() };
        let mut from_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
        let n = unsafe {
            libc::recvfrom(
                self.fd.as_raw_fd(),
                self.buffer.as_mut_ptr() as *mut libc::c_void,
                self.buffer.len(),
                0,
                &mut from as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                &mut from_len,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                    Ok(None)
                }
                _ => Err(CaptureError::Read {
                    interface: self.interface.clone(),
                    source: err,
                }),
            };
        }

        if !is_inbound(from.sll_pkttype) {
            return Ok(None);
        }

        debug!(interface = %self.interface, len = n, "frame captured");
        Ok(Some(&self.buffer[..n as usize]))
    }

    fn interface_name(&self) -> &str {
        &self.interface
    }
}

/// Whether a frame of this `sll_pkttype` arrived from the wire.
///
/// Frames sent by this host are reported back as `PACKET_OUTGOING`.
fn is_inbound(pkttype: u8) -> bool {
    pkttype != libc::PACKET_OUTGOING as u8
}

fn ignore_outgoing(fd: &OwnedFd) -> io::Result<()> {
    let enable: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_PACKET,
            PACKET_IGNORE_OUTGOING,
            &enable as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn attach_filter(fd: &OwnedFd, program: &[Instruction]) -> io::Result<()> {
    let mut insns: Vec<libc::sock_filter> = program
        .iter()
        .map(|ins| libc::sock_filter {
            code: ins.code,
            jt: ins.jt,
            jf: ins.jf,
            k: ins.k,
        })
        .collect();

    let fprog = libc::sock_fprog {
        len: insns.len() as libc::c_ushort,
        filter: insns.as_mut_ptr(),
    };

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ATTACH_FILTER,
            &fprog as *const libc::sock_fprog as *const libc::c_void,
            mem::size_of::<libc::sock_fprog>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_read_timeout(fd: &OwnedFd, timeout: Duration) -> io::Result<()> {
    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &tv as *const libc::timeval as *const libc::c_void,
            mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn bind(fd: &OwnedFd, if_index: u32, protocol: u16) -> io::Result<()> {
    let mut sll: libc::sockaddr_ll = unsafe { mem::zeroed() };
    sll.sll_family = libc::AF_PACKET as u16;
    sll.sll_protocol = protocol.to_be();
    sll.sll_ifindex = if_index as i32;

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_from_the_wire_are_inbound() {
        for pkttype in [
            libc::PACKET_HOST,
            libc::PACKET_BROADCAST,
            libc::PACKET_MULTICAST,
            libc::PACKET_OTHERHOST,
        ] {
            assert!(is_inbound(pkttype as u8), "pkttype {pkttype}");
        }
    }

    #[test]
    fn test_own_transmissions_are_dropped() {
        assert!(!is_inbound(libc::PACKET_OUTGOING as u8));
    }
}
