//! Reliable data protocol: a sliding-window ARQ carried inside connections.
//!
//! Each segment carries a 5-byte trailer header (flags, sequence and
//! acknowledgement numbers). Connections are opened with a SYN carrying the
//! tuning parameters, data flows under a fixed send window, lost segments
//! are retransmitted oldest-first, and connections close through an
//! RST / RST+ACK exchange.

pub mod constants;
pub mod header;
pub mod io;
pub mod options;
pub mod seq;
pub mod state;

pub use constants::*;
pub use header::RdpHeader;
pub use io::RdpIo;
pub use options::RdpOptions;
pub use state::{RdpConnection, RdpState, RdpStats, SegmentOutcome, TimerOutcome};
