//! Relay manager: one relay per configured interface.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::RelayError;
use crate::relay::{Relay, RelayStats};
use crate::{Backends, Family};

/// Owns every running relay of the process.
pub struct RelayManager {
    relays: Vec<Relay>,
}

impl RelayManager {
    /// Create and start a relay on each interface.
    pub fn start(interfaces: &[String], backends: Backends) -> Result<Self, RelayError> {
        Self::start_with(interfaces, backends, Relay::start)
    }

    /// Like [`RelayManager::start`], starting each relay with `start`.
    ///
    /// The first failure stops the relays already running and is returned.
    pub fn start_with<F>(
        interfaces: &[String],
        backends: Backends,
        mut start: F,
    ) -> Result<Self, RelayError>
    where
        F: FnMut(&mut Relay) -> Result<(), RelayError>,
    {
        if backends.is_empty() {
            warn!("no backends configured, nothing will be relayed");
        }

        let backends = Arc::new(backends);
        let mut manager = Self { relays: Vec::new() };

        for interface in interfaces {
            let mut relay = Relay::new(interface.as_str(), Arc::clone(&backends));
            if let Err(e) = start(&mut relay) {
                manager.stop();
                manager.wait_for_stop();
                return Err(e);
            }
            manager.relays.push(relay);
        }

        if manager.relays.is_empty() {
            return Err(RelayError::NoRelays);
        }

        info!(
            relays = manager.relays.len(),
            ipv4_backends = backends.count(Family::Ipv4),
            ipv6_backends = backends.count(Family::Ipv6),
            "all relays started"
        );
        Ok(manager)
    }

    /// Counter handles for every relay, in interface order.
    pub fn stats(&self) -> Vec<RelayStats> {
        self.relays.iter().map(Relay::stats).collect()
    }

    pub fn relays(&self) -> &[Relay] {
        &self.relays
    }

    pub fn stop(&self) {
        for relay in &self.relays {
            relay.stop();
        }
    }

    pub fn wait_for_stop(&mut self) {
        for relay in &mut self.relays {
            relay.wait_for_stop();
        }
        info!("all relays stopped");
    }
}
