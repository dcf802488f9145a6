//! Backend addresses split by family.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::Family;

/// The relay targets, classified once at configuration time.
///
/// Order follows the configuration file. Duplicates are kept as given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Backends {
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
}

impl Backends {
    /// Create an empty backend set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an address to the list matching its family.
    pub fn push(&mut self, addr: IpAddr) {
        match addr {
            IpAddr::V4(v4) => self.ipv4.push(v4),
            IpAddr::V6(v6) => {
                // ::ffff:a.b.c.d is an IPv4 host reachable only over IPv4
                match v6.to_ipv4_mapped() {
                    Some(v4) => self.ipv4.push(v4),
                    None => self.ipv6.push(v6),
                }
            }
        }
    }

    /// Number of backends configured for `family`.
    pub fn count(&self, family: Family) -> usize {
        match family {
            Family::Ipv4 => self.ipv4.len(),
            Family::Ipv6 => self.ipv6.len(),
        }
    }

    /// Whether `family` has at least one backend.
    pub fn has(&self, family: Family) -> bool {
        self.count(family) > 0
    }

    pub fn is_empty(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }
}

impl FromIterator<IpAddr> for Backends {
    fn from_iter<T: IntoIterator<Item = IpAddr>>(iter: T) -> Self {
        let mut backends = Backends::new();
        for addr in iter {
            backends.push(addr);
        }
        backends
    }
}
