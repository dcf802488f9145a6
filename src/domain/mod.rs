//! Domain types shared by the capture, inject and relay layers.
//!
//! These types carry no I/O and are independent of any socket or
//! capture backend.

mod backends;
mod family;

pub use backends::Backends;
pub use family::Family;
