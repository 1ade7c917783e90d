//! Protocol state machines for the CSP network stack.
//!
//! The reliable data protocol (RDP) lives here, decoupled from buffers,
//! queues and clocks: callers feed it segments and timestamps and it acts
//! through the [`rdp::RdpIo`] seam.

pub mod error;
pub mod rdp;

pub use error::RdpError;
