//! Transparent relay between the vendor slicer and the printer.
//!
//! The relay listens on the printer's API port, forwards every request to the
//! real printer unchanged, and on the way through captures the session token and
//! uploaded G-code files into the store.

pub mod capture;
pub mod forward;
pub mod session;

pub use forward::ForwardError;
pub use session::{RelayConfig, RelaySession, RelayState, RelayStatus};
