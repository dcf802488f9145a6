//! Frame transform.
//!
//! Turns a captured Ethernet frame into the bytes an injector sends.
//! IPv4 keeps the whole datagram for encapsulation; IPv6 keeps only
//! the ICMPv6 message, since the kernel rebuilds the IPv6 header.

use std::net::Ipv6Addr;

use pnet::packet::ethernet::EthernetPacket;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;

use crate::error::TransformError;

/// Ethernet II header length.
pub const ETHERNET_HEADER_LEN: usize = 14;

/// Minimum IPv4 header length (no options).
pub const IPV4_MIN_HEADER_LEN: usize = 20;

/// Fixed IPv6 header length.
pub const IPV6_HEADER_LEN: usize = 40;

/// A packet-too-big message with the sender it came from.
#[derive(Debug, PartialEq, Eq)]
pub struct Icmpv6Message<'a> {
    /// Source of the captured IPv6 packet (the router that sent the error).
    pub source: Ipv6Addr,
    /// The ICMPv6 message, starting at its type byte.
    pub message: &'a [u8],
}

/// Strip the link-layer header.
pub fn strip_link(frame: &[u8]) -> Result<&[u8], TransformError> {
    if EthernetPacket::new(frame).is_none() {
        return Err(TransformError::FrameTooShort {
            expected: ETHERNET_HEADER_LEN,
            actual: frame.len(),
        });
    }
    Ok(&frame[ETHERNET_HEADER_LEN..])
}

/// The IPv4 datagram carried by `frame`, header included.
pub fn ipv4_datagram(frame: &[u8]) -> Result<&[u8], TransformError> {
    let ip = strip_link(frame)?;

    let packet = Ipv4Packet::new(ip).ok_or(TransformError::FrameTooShort {
        expected: ETHERNET_HEADER_LEN + IPV4_MIN_HEADER_LEN,
        actual: frame.len(),
    })?;
    if packet.get_version() != 4 {
        return Err(TransformError::WrongVersion {
            expected: 4,
            actual: packet.get_version(),
        });
    }

    Ok(ip)
}

/// The ICMPv6 message carried by `frame`, IPv6 header removed.
pub fn icmpv6_message(frame: &[u8]) -> Result<Icmpv6Message<'_>, TransformError> {
    let ip = strip_link(frame)?;

    let packet = Ipv6Packet::new(ip).ok_or(TransformError::FrameTooShort {
        expected: ETHERNET_HEADER_LEN + IPV6_HEADER_LEN,
        actual: frame.len(),
    })?;
    if packet.get_version() != 6 {
        return Err(TransformError::WrongVersion {
            expected: 6,
            actual: packet.get_version(),
        });
    }

    Ok(Icmpv6Message {
        source: packet.get_source(),
        message: &ip[IPV6_HEADER_LEN..],
    })
}
