use std::io;

use thiserror::Error;

use crate::Family;

/// Errors from opening or reading a capture session.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("packet capture is not supported on this platform (interface {0})")]
    Unsupported(String),

    #[error("insufficient permissions to capture on {0} (need root or CAP_NET_RAW)")]
    InsufficientPermissions(String),

    #[error("failed to open capture socket on {interface}: {source}")]
    Open {
        interface: String,
        source: io::Error,
    },

    #[error("failed to install BPF filter on {interface}: {source}")]
    Filter {
        interface: String,
        source: io::Error,
    },

    #[error("failed to read packet on {interface}: {source}")]
    Read {
        interface: String,
        source: io::Error,
    },
}

/// Errors from turning a captured frame into a relay payload.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransformError {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("not an IPv{expected} packet (version {actual})")]
    WrongVersion { expected: u8, actual: u8 },

    #[error("datagram of {0} bytes is too large to encapsulate without fragmentation")]
    PayloadTooLarge(usize),
}

/// Errors from opening a transmit socket.
#[derive(Error, Debug)]
pub enum InjectError {
    #[error("failed to open {family} transmit socket: {source}")]
    Socket { family: Family, source: io::Error },
}

/// Fatal relay lifecycle errors.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("unable to set up {family} capture on {interface}: {source}")]
    Capture {
        interface: String,
        family: Family,
        source: CaptureError,
    },

    #[error("unable to set up {family} transmit path on {interface}: {source}")]
    Inject {
        interface: String,
        family: Family,
        source: InjectError,
    },

    #[error("unable to spawn {family} worker on {interface}: {source}")]
    Spawn {
        interface: String,
        family: Family,
        source: io::Error,
    },

    #[error("relay on {0} already started")]
    AlreadyStarted(String),

    #[error("no relay could be started")]
    NoRelays,
}
