//! IPv4 pipeline: IP-in-IP encapsulation of the captured datagram.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::MutableIpv4Packet;
use tracing::{debug, error};

use super::{Delivery, Forward, Transmit};
use crate::error::TransformError;
use crate::transform::{self, IPV4_MIN_HEADER_LEN};
use crate::{Backends, Family};

/// Hop limit of the encapsulating header.
pub const OUTER_TTL: u8 = 64;

/// Largest datagram that still fits a 1500 byte MTU once encapsulated.
///
/// Header-included raw sockets are never fragmented by the kernel.
pub const MAX_ENCAPSULATED_LEN: usize = 1500 - IPV4_MIN_HEADER_LEN;

/// Relays "fragmentation needed" datagrams to the IPv4 backends.
///
/// The whole captured datagram (router header, ICMP error and quoted
/// original packet) becomes the payload of a fresh outer header, so the
/// backend decapsulates it and processes the ICMP error as its own.
/// Datagrams longer than [`MAX_ENCAPSULATED_LEN`] are rejected; router
/// ICMP errors are normally 576 bytes or less.
pub struct Ipv4Injector<T> {
    interface: String,
    backends: Arc<Backends>,
    transmit: T,
    /// Outer header followed by the payload; reused for every frame.
    buf: Vec<u8>,
}

impl<T: Transmit> Ipv4Injector<T> {
    pub fn new(interface: impl Into<String>, backends: Arc<Backends>, transmit: T) -> Self {
        let mut buf = vec![0u8; IPV4_MIN_HEADER_LEN];
        if let Some(mut header) = MutableIpv4Packet::new(&mut buf) {
            header.set_version(4);
            header.set_header_length((IPV4_MIN_HEADER_LEN / 4) as u8);
            header.set_ttl(OUTER_TTL);
            header.set_next_level_protocol(IpNextHeaderProtocols::Ipv4);
            // Source, identification and checksum are filled in by the kernel.
        }

        Self {
            interface: interface.into(),
            backends,
            transmit,
            buf,
        }
    }

    /// Place `payload` behind the outer header and set the total length.
    fn encapsulate(&mut self, payload: &[u8]) -> Result<(), TransformError> {
        if payload.len() > MAX_ENCAPSULATED_LEN {
            return Err(TransformError::PayloadTooLarge(payload.len()));
        }
        let total_length = u16::try_from(IPV4_MIN_HEADER_LEN + payload.len())
            .map_err(|_| TransformError::PayloadTooLarge(payload.len()))?;

        self.buf.truncate(IPV4_MIN_HEADER_LEN);
        self.buf.extend_from_slice(payload);
        if let Some(mut header) = MutableIpv4Packet::new(&mut self.buf[..IPV4_MIN_HEADER_LEN]) {
            header.set_total_length(total_length);
        }
        Ok(())
    }

    fn set_destination(&mut self, destination: Ipv4Addr) {
        if let Some(mut header) = MutableIpv4Packet::new(&mut self.buf[..IPV4_MIN_HEADER_LEN]) {
            header.set_destination(destination);
        }
    }
}

impl<T: Transmit> Forward for Ipv4Injector<T> {
    fn family(&self) -> Family {
        Family::Ipv4
    }

    fn forward(&mut self, frame: &[u8]) -> Result<Delivery, TransformError> {
        let datagram = transform::ipv4_datagram(frame)?;
        self.encapsulate(datagram)?;

        let backends = Arc::clone(&self.backends);
        let mut delivery = Delivery::default();

        for &backend in &backends.ipv4 {
            self.set_destination(backend);
            delivery.attempted += 1;

            if let Err(e) = self.transmit.send_to(&self.buf, IpAddr::V4(backend)) {
                delivery.failed += 1;
                error!(
                    interface = %self.interface,
                    backend = %backend,
                    error = %e,
                    "unable to relay packet"
                );
            }
        }

        debug!(
            interface = %self.interface,
            len = datagram.len(),
            attempted = delivery.attempted,
            failed = delivery.failed,
            "relayed fragmentation needed"
        );
        Ok(delivery)
    }
}

#[cfg(test)]
mod tests {
    use pnet::packet::ipv4::Ipv4Packet;
    use pnet::packet::Packet;

    use super::*;
    use crate::inject::testing::RecordingTransmit;

    fn frame(datagram: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend_from_slice(datagram);
        frame
    }

    fn frag_needed_datagram() -> Vec<u8> {
        let mut ip = vec![
            0x45, 0x00, 0x00, 0x38, 0x12, 0x34, 0x00, 0x00, 0x3e, 0x01, 0xab, 0xcd, //
            198, 51, 100, 1, // router
            192, 0, 2, 80, // anycast address
        ];
        ip.extend_from_slice(&[0x03, 0x04, 0x00, 0x00, 0x00, 0x00, 0x05, 0x78]);
        ip.extend_from_slice(&[
            0x45, 0x00, 0x05, 0xdc, 0x00, 0x00, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00, //
            192, 0, 2, 80, // anycast address
            203, 0, 113, 50, // client
        ]);
        ip.extend_from_slice(&[0x01, 0xbb, 0xc3, 0x50, 0, 0, 0, 1]);
        ip
    }

    fn backends(addrs: &[&str]) -> Arc<Backends> {
        Arc::new(addrs.iter().map(|a| a.parse::<IpAddr>().unwrap()).collect())
    }

    #[test]
    fn test_outer_header() {
        let transmit = RecordingTransmit::default();
        let mut injector =
            Ipv4Injector::new("eth0", backends(&["203.0.113.9"]), transmit.clone());
        let datagram = frag_needed_datagram();

        let delivery = injector.forward(&frame(&datagram)).unwrap();
        assert_eq!(delivery, Delivery { attempted: 1, failed: 0 });

        let sent = transmit.sent();
        assert_eq!(sent.len(), 1);
        let (dst, bytes) = &sent[0];
        assert_eq!(*dst, "203.0.113.9".parse::<IpAddr>().unwrap());

        let outer = Ipv4Packet::new(bytes).unwrap();
        assert_eq!(outer.get_version(), 4);
        assert_eq!(outer.get_header_length(), 5);
        assert_eq!(outer.get_ttl(), OUTER_TTL);
        assert_eq!(outer.get_next_level_protocol(), IpNextHeaderProtocols::Ipv4);
        assert_eq!(outer.get_destination(), Ipv4Addr::new(203, 0, 113, 9));
        assert_eq!(outer.get_source(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(
            usize::from(outer.get_total_length()),
            IPV4_MIN_HEADER_LEN + datagram.len()
        );
        assert_eq!(outer.payload(), datagram.as_slice());
    }

    #[test]
    fn test_fan_out_changes_only_destination() {
        let transmit = RecordingTransmit::default();
        let mut injector = Ipv4Injector::new(
            "eth0",
            backends(&["203.0.113.9", "2001:db8::9", "203.0.113.10"]),
            transmit.clone(),
        );
        let datagram = frag_needed_datagram();

        let delivery = injector.forward(&frame(&datagram)).unwrap();
        assert_eq!(delivery.attempted, 2);

        let sent = transmit.sent();
        assert_eq!(sent.len(), 2);
        let first = Ipv4Packet::new(&sent[0].1).unwrap();
        let second = Ipv4Packet::new(&sent[1].1).unwrap();
        assert_eq!(first.get_destination(), Ipv4Addr::new(203, 0, 113, 9));
        assert_eq!(second.get_destination(), Ipv4Addr::new(203, 0, 113, 10));
        assert_eq!(first.get_total_length(), second.get_total_length());
        assert_eq!(first.payload(), second.payload());
    }

    #[test]
    fn test_length_follows_each_frame() {
        let transmit = RecordingTransmit::default();
        let mut injector =
            Ipv4Injector::new("eth0", backends(&["203.0.113.9"]), transmit.clone());

        let long = frag_needed_datagram();
        let short = &long[..48];
        injector.forward(&frame(&long)).unwrap();
        injector.forward(&frame(short)).unwrap();

        let sent = transmit.sent();
        let second = Ipv4Packet::new(&sent[1].1).unwrap();
        assert_eq!(usize::from(second.get_total_length()), IPV4_MIN_HEADER_LEN + 48);
        assert_eq!(second.payload(), short);
        assert_eq!(sent[1].1.len(), IPV4_MIN_HEADER_LEN + 48);
    }

    #[test]
    fn test_backend_failure_does_not_abort_frame() {
        let failing: IpAddr = "203.0.113.9".parse().unwrap();
        let transmit = RecordingTransmit::failing_for(&[failing]);
        let mut injector = Ipv4Injector::new(
            "eth0",
            backends(&["203.0.113.9", "203.0.113.10"]),
            transmit.clone(),
        );

        let delivery = injector.forward(&frame(&frag_needed_datagram())).unwrap();
        assert_eq!(delivery, Delivery { attempted: 2, failed: 1 });
        assert_eq!(transmit.sent().len(), 2);
    }

    #[test]
    fn test_malformed_frame_sends_nothing() {
        let transmit = RecordingTransmit::default();
        let mut injector =
            Ipv4Injector::new("eth0", backends(&["203.0.113.9"]), transmit.clone());

        assert!(injector.forward(&[0u8; 8]).is_err());
        assert!(transmit.sent().is_empty());
    }

    #[test]
    fn test_payload_limit_fits_ethernet_mtu() {
        let transmit = RecordingTransmit::default();
        let mut injector =
            Ipv4Injector::new("eth0", backends(&["203.0.113.9"]), transmit.clone());

        let mut datagram = frag_needed_datagram();
        datagram.resize(MAX_ENCAPSULATED_LEN, 0);
        injector.forward(&frame(&datagram)).unwrap();
        assert_eq!(transmit.sent()[0].1.len(), 1500);

        datagram.push(0);
        assert_eq!(
            injector.forward(&frame(&datagram)),
            Err(TransformError::PayloadTooLarge(MAX_ENCAPSULATED_LEN + 1))
        );
        assert_eq!(transmit.sent().len(), 1);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut injector =
            Ipv4Injector::new("eth0", backends(&["203.0.113.9"]), RecordingTransmit::default());

        let mut datagram = frag_needed_datagram();
        datagram.resize(usize::from(u16::MAX), 0);
        assert_eq!(
            injector.forward(&frame(&datagram)),
            Err(TransformError::PayloadTooLarge(usize::from(u16::MAX)))
        );
    }
}
