//! IPv6 pipeline: the bare ICMPv6 message over an ICMPv6 socket.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, error};

use super::{Delivery, Forward, Transmit};
use crate::error::TransformError;
use crate::transform;
use crate::{Backends, Family};

/// Relays "packet too big" messages to the IPv6 backends.
///
/// Unlike the IPv4 path the captured IPv6 header is dropped and the
/// kernel builds a new one from this host, so the backend sees the
/// message as coming from the relay, not from the original router.
pub struct Ipv6Injector<T> {
    interface: String,
    backends: Arc<Backends>,
    transmit: T,
}

impl<T: Transmit> Ipv6Injector<T> {
    pub fn new(interface: impl Into<String>, backends: Arc<Backends>, transmit: T) -> Self {
        Self {
            interface: interface.into(),
            backends,
            transmit,
        }
    }
}

impl<T: Transmit> Forward for Ipv6Injector<T> {
    fn family(&self) -> Family {
        Family::Ipv6
    }

    fn forward(&mut self, frame: &[u8]) -> Result<Delivery, TransformError> {
        let icmp = transform::icmpv6_message(frame)?;
        let mut delivery = Delivery::default();

        for &backend in &self.backends.ipv6 {
            delivery.attempted += 1;

            if let Err(e) = self.transmit.send_to(icmp.message, IpAddr::V6(backend)) {
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
            source = %icmp.source,
            len = icmp.message.len(),
            attempted = delivery.attempted,
            failed = delivery.failed,
            "relayed packet too big"
        );
        Ok(delivery)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use super::*;
    use crate::inject::testing::RecordingTransmit;

    fn packet_too_big_frame() -> (Vec<u8>, Vec<u8>) {
        // type 2, code 0, checksum, MTU 1280, then the quoted packet
        let mut message = vec![0x02, 0x00, 0xbe, 0xef, 0x00, 0x00, 0x05, 0x00];
        message.extend_from_slice(&[0x60, 0, 0, 0, 0x05, 0xb0, 6, 64]);
        message.extend_from_slice(&[0xaa; 32]);

        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&[0x86, 0xdd]);
        frame.extend_from_slice(&[0x60, 0, 0, 0]);
        frame.extend_from_slice(&(message.len() as u16).to_be_bytes());
        frame.extend_from_slice(&[58, 64]);
        frame.extend_from_slice(&"2001:db8:1::1".parse::<Ipv6Addr>().unwrap().octets());
        frame.extend_from_slice(&"2001:db8:ffff::80".parse::<Ipv6Addr>().unwrap().octets());
        frame.extend_from_slice(&message);
        (frame, message)
    }

    fn backends(addrs: &[&str]) -> Arc<Backends> {
        Arc::new(addrs.iter().map(|a| a.parse::<IpAddr>().unwrap()).collect())
    }

    #[test]
    fn test_sends_message_unchanged() {
        let transmit = RecordingTransmit::default();
        let mut injector = Ipv6Injector::new("eth0", backends(&["2001:db8::9"]), transmit.clone());
        let (frame, message) = packet_too_big_frame();

        let delivery = injector.forward(&frame).unwrap();
        assert_eq!(delivery, Delivery { attempted: 1, failed: 0 });

        let sent = transmit.sent();
        assert_eq!(sent, vec![("2001:db8::9".parse::<IpAddr>().unwrap(), message)]);
    }

    #[test]
    fn test_only_ipv6_backends_receive() {
        let transmit = RecordingTransmit::default();
        let mut injector = Ipv6Injector::new(
            "eth0",
            backends(&["203.0.113.9", "2001:db8::9", "2001:db8::a"]),
            transmit.clone(),
        );
        let (frame, _) = packet_too_big_frame();

        let delivery = injector.forward(&frame).unwrap();
        assert_eq!(delivery.attempted, 2);

        let destinations: Vec<_> = transmit.sent().into_iter().map(|(dst, _)| dst).collect();
        assert_eq!(
            destinations,
            vec![
                "2001:db8::9".parse::<IpAddr>().unwrap(),
                "2001:db8::a".parse::<IpAddr>().unwrap()
            ]
        );
    }

    #[test]
    fn test_backend_failure_continues() {
        let failing: IpAddr = "2001:db8::9".parse().unwrap();
        let transmit = RecordingTransmit::failing_for(&[failing]);
        let mut injector = Ipv6Injector::new(
            "eth0",
            backends(&["2001:db8::9", "2001:db8::a"]),
            transmit.clone(),
        );
        let (frame, _) = packet_too_big_frame();

        let delivery = injector.forward(&frame).unwrap();
        assert_eq!(delivery, Delivery { attempted: 2, failed: 1 });
    }

    #[test]
    fn test_unparseable_frame_sends_nothing() {
        let transmit = RecordingTransmit::default();
        let mut injector = Ipv6Injector::new("eth0", backends(&["2001:db8::9"]), transmit.clone());

        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&[0x86, 0xdd, 0x60, 0x00]);
        assert!(injector.forward(&frame).is_err());
        assert!(transmit.sent().is_empty());
    }
}
