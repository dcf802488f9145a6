//! Per-interface relay.
//!
//! A `Relay` owns up to two workers (IPv4, IPv6) for one interface.
//! Each worker is a plain thread running a blocking capture loop; they
//! share only the immutable backend list, the stop signal and the
//! atomic counters.
//!
//! ```text
//!  wire ──► capture ──► transform ──► injector ──► backends
//!              ▲                                     │
//!              └──────────── stop signal ────────────┘ (between reads)
//! ```

mod counters;
mod stop;
mod worker;

pub use counters::Counters;
pub use stop::StopSignal;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use crate::capture::{self, FrameSource};
use crate::error::RelayError;
use crate::inject::{Forward, Ipv4Injector, Ipv6Injector, RawSocket};
use crate::{Backends, Family};

use worker::Worker;

/// The resources one worker runs on.
pub struct Pipeline {
    pub source: Box<dyn FrameSource>,
    pub forwarder: Box<dyn Forward>,
}

/// Cloneable read handle on a relay's counters, for metrics.
#[derive(Debug, Clone)]
pub struct RelayStats {
    interface: Arc<str>,
    counters: Arc<Counters>,
}

impl RelayStats {
    pub fn interface_name(&self) -> &str {
        &self.interface
    }

    pub fn packets_forwarded(&self, family: Family) -> u64 {
        self.counters.get(family)
    }
}

/// Relays PMTUD signals seen on one interface.
pub struct Relay {
    interface: Arc<str>,
    backends: Arc<Backends>,
    counters: Arc<Counters>,
    stop: StopSignal,
    active: Arc<AtomicUsize>,
    workers: Vec<JoinHandle<()>>,
    started: bool,
}

impl Relay {
    /// Create a relay. No socket is opened until [`Relay::start`].
    pub fn new(interface: impl Into<String>, backends: Arc<Backends>) -> Self {
        Self {
            interface: Arc::from(interface.into()),
            backends,
            counters: Arc::new(Counters::new()),
            stop: StopSignal::new(),
            active: Arc::new(AtomicUsize::new(0)),
            workers: Vec::new(),
            started: false,
        }
    }

    /// Get the interface name the relay is listening on.
    pub fn interface_name(&self) -> &str {
        &self.interface
    }

    /// Number of forwarded packets of the IPv4 address family.
    pub fn packets_forwarded_ipv4(&self) -> u64 {
        self.counters.get(Family::Ipv4)
    }

    /// Number of forwarded packets of the IPv6 address family.
    pub fn packets_forwarded_ipv6(&self) -> u64 {
        self.counters.get(Family::Ipv6)
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            interface: Arc::clone(&self.interface),
            counters: Arc::clone(&self.counters),
        }
    }

    /// Workers that have not yet exited.
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Open capture and transmit resources and spawn the workers.
    pub fn start(&mut self) -> Result<(), RelayError> {
        self.start_with(open_pipeline)
    }

    /// Like [`Relay::start`], with the per-family resources supplied by `open`.
    ///
    /// `open` is only called for families that have backends. Every
    /// family is set up before any worker is spawned, so a failure leaves
    /// the relay without running workers.
    pub fn start_with<F>(&mut self, mut open: F) -> Result<(), RelayError>
    where
        F: FnMut(&str, Family, &Arc<Backends>) -> Result<Pipeline, RelayError>,
    {
        if self.started {
            return Err(RelayError::AlreadyStarted(self.interface.to_string()));
        }

        let mut pipelines = Vec::new();
        for family in Family::ALL {
            if !self.backends.has(family) {
                debug!(interface = %self.interface, family = %family, "no backends, not relaying");
                continue;
            }
            pipelines.push((family, open(&*self.interface, family, &self.backends)?));
        }
        self.started = true;

        for (family, pipeline) in pipelines {
            let worker = Worker::new(
                pipeline.source,
                pipeline.forwarder,
                Arc::clone(&self.counters),
                self.stop.clone(),
                &self.active,
            );

            let handle = thread::Builder::new()
                .name(format!("pmtud-{}-{}", self.interface, family.as_str()))
                .spawn(move || worker.run());

            match handle {
                Ok(handle) => self.workers.push(handle),
                Err(source) => {
                    self.stop();
                    self.wait_for_stop();
                    return Err(RelayError::Spawn {
                        interface: self.interface.to_string(),
                        family,
                        source,
                    });
                }
            }
        }

        info!(
            interface = %self.interface,
            ipv4_backends = self.backends.count(Family::Ipv4),
            ipv6_backends = self.backends.count(Family::Ipv6),
            workers = self.workers.len(),
            "relay started"
        );
        Ok(())
    }

    /// Signal every worker to exit. Repeated calls are no-ops.
    pub fn stop(&self) {
        if self.stop.trigger() {
            info!(interface = %self.interface, "stopping relay");
        } else {
            debug!(interface = %self.interface, "relay already stopping");
        }
    }

    /// Block until every worker has exited and released its resources.
    pub fn wait_for_stop(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!(interface = %self.interface, "relay worker panicked");
            }
        }
        debug!(interface = %self.interface, "relay stopped");
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop();
            self.wait_for_stop();
        }
    }
}

/// Open the system capture and transmit path for `family`.
fn open_pipeline(
    interface: &str,
    family: Family,
    backends: &Arc<Backends>,
) -> Result<Pipeline, RelayError> {
    let source = capture::open(interface, family).map_err(|source| RelayError::Capture {
        interface: interface.to_string(),
        family,
        source,
    })?;

    let inject_err = |source| RelayError::Inject {
        interface: interface.to_string(),
        family,
        source,
    };
    let forwarder: Box<dyn Forward> = match family {
        Family::Ipv4 => Box::new(Ipv4Injector::new(
            interface,
            Arc::clone(backends),
            RawSocket::ipv4().map_err(inject_err)?,
        )),
        Family::Ipv6 => Box::new(Ipv6Injector::new(
            interface,
            Arc::clone(backends),
            RawSocket::icmpv6().map_err(inject_err)?,
        )),
    };

    Ok(Pipeline { source, forwarder })
}
