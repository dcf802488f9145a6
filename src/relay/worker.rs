//! Relay worker: read, transform, fan out, count.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{Counters, StopSignal};
use crate::capture::FrameSource;
use crate::inject::Forward;
use crate::Family;

/// Pause after a failed capture read so a broken socket does not spin.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Keeps a relay's active-worker count up while a worker exists.
pub(crate) struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl ActiveGuard {
    pub(crate) fn new(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self {
            active: Arc::clone(active),
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The loop binding one capture session to one injector.
pub(crate) struct Worker {
    interface: String,
    family: Family,
    source: Box<dyn FrameSource>,
    forwarder: Box<dyn Forward>,
    counters: Arc<Counters>,
    stop: StopSignal,
    // Declared last: dropped after the capture and socket are closed.
    _active: ActiveGuard,
}

impl Worker {
    pub(crate) fn new(
        source: Box<dyn FrameSource>,
        forwarder: Box<dyn Forward>,
        counters: Arc<Counters>,
        stop: StopSignal,
        active: &Arc<AtomicUsize>,
    ) -> Self {
        Self {
            interface: source.interface_name().to_string(),
            family: forwarder.family(),
            source,
            forwarder,
            counters,
            stop,
            _active: ActiveGuard::new(active),
        }
    }

    /// Run until the stop signal is observed, then release resources.
    pub(crate) fn run(mut self) {
        info!(interface = %self.interface, family = %self.family, "worker running");

        while !self.stop.is_triggered() {
            self.step();
        }

        info!(interface = %self.interface, family = %self.family, "worker stopping");
        let (interface, family) = (self.interface.clone(), self.family);
        drop(self);
        info!(interface = %interface, family = %family, "worker stopped");
    }

    /// One blocking read and, if a frame arrived, its relay.
    fn step(&mut self) {
        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                error!(
                    interface = %self.interface,
                    family = %self.family,
                    error = %e,
                    "unable to get packet"
                );
                thread::sleep(READ_ERROR_BACKOFF);
                return;
            }
        };

        match self.forwarder.forward(frame) {
            Ok(delivery) => {
                self.counters.record(self.family);
                if delivery.failed > 0 {
                    debug!(
                        interface = %self.interface,
                        family = %self.family,
                        failed = delivery.failed,
                        attempted = delivery.attempted,
                        "frame relayed with backend failures"
                    );
                }
            }
            Err(e) => {
                warn!(
                    interface = %self.interface,
                    family = %self.family,
                    error = %e,
                    "skipping frame that cannot be relayed"
                );
            }
        }
    }
}
