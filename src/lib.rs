//! ICMP packet-too-big relay.
//!
//! Captures ICMP "Fragmentation Needed" and ICMPv6 "Packet Too Big"
//! messages arriving at an anycast edge and re-injects them toward every
//! backend, so each backend's kernel sees the PMTUD signal that was meant
//! for it.
//!
//! The crate is organised in layers:
//! - `capture`: filtered link-layer frame sources
//! - `transform`: frame to payload conversion per family
//! - `inject`: raw transmit sockets and backend fan-out
//! - `relay`: per-interface workers, counters and shutdown
//! - `manager`: one relay per configured interface
//! - `metrics`: Prometheus exposition of the counters

pub mod capture;
pub mod config;
pub mod domain;
pub mod error;
pub mod inject;
pub mod manager;
pub mod metrics;
pub mod relay;
pub mod transform;

pub use config::{Config, ConfigError};
pub use domain::{Backends, Family};
pub use error::{CaptureError, InjectError, RelayError, TransformError};
pub use manager::RelayManager;
pub use metrics::MetricsError;
pub use relay::{Relay, RelayStats};
