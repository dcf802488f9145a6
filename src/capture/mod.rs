//! Packet capture.
//!
//! This module defines the `FrameSource` trait the relay workers read
//! from, the kernel-side filter programs, and the Linux `AF_PACKET`
//! implementation. Workers only ever depend on the trait, so tests can
//! feed them frames from memory.

pub mod filter;

#[cfg(target_os = "linux")]
mod afpacket;

#[cfg(target_os = "linux")]
pub use afpacket::AfPacketCapture;

use pnet::datalink;

use crate::error::CaptureError;
use crate::Family;

/// Maximum number of bytes kept per frame.
///
/// A full Ethernet frame: link header, network header, and the quoted
/// original packet inside the ICMP error all fit.
pub const SNAP_LEN: usize = 1514;

/// A source of link-layer frames matching one family's filter.
pub trait FrameSource: Send {
    /// Block until the next frame arrives.
    ///
    /// Returns `Ok(None)` when the read timed out without a frame. The
    /// returned slice is only valid until the next call.
    fn next_frame(&mut self) -> Result<Option<&[u8]>, CaptureError>;

    /// Get the name of the interface being captured.
    fn interface_name(&self) -> &str;
}

/// Open a filtered capture for `family` on the named interface.
#[cfg(target_os = "linux")]
pub fn open(interface: &str, family: Family) -> Result<Box<dyn FrameSource>, CaptureError> {
    Ok(Box::new(AfPacketCapture::new(interface, family)?))
}

#[cfg(not(target_os = "linux"))]
pub fn open(interface: &str, _family: Family) -> Result<Box<dyn FrameSource>, CaptureError> {
    Err(CaptureError::Unsupported(interface.to_string()))
}

/// Resolve an interface name to its kernel index.
pub fn interface_index(interface_name: &str) -> Result<u32, CaptureError> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == interface_name)
        .map(|iface| iface.index)
        .ok_or_else(|| CaptureError::InterfaceNotFound(interface_name.to_string()))
}

/// List all available network interfaces.
pub fn list_interfaces() -> Vec<String> {
    datalink::interfaces()
        .into_iter()
        .map(|iface| {
            let status = if iface.is_up() { "UP" } else { "DOWN" };
            let ips: Vec<_> = iface.ips.iter().map(|ip| ip.to_string()).collect();
            format!(
                "{}: {} [{}]",
                iface.name,
                status,
                if ips.is_empty() {
                    "no IP".to_string()
                } else {
                    ips.join(", ")
                }
            )
        })
        .collect()
}
