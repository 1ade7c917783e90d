//! Runtime tuning parameters.
//!
//! The client sends its parameters in the SYN and the server adopts them, so
//! both ends of a connection run with identical timers and window.

use serde::Deserialize;

use super::constants::{MAX_WINDOW, SYN_OPTIONS_SIZE};
use crate::error::RdpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RdpOptions {
    /// Segments in flight before the sender blocks.
    pub window_size: u32,
    /// Inactivity and close-wait limit.
    pub conn_timeout_ms: u32,
    /// Retransmission interval for unacknowledged segments.
    pub packet_timeout_ms: u32,
    pub delayed_acks: bool,
    /// Longest an acknowledgement may be held back.
    pub ack_timeout_ms: u32,
    /// Segments received before a held-back acknowledgement is forced out.
    pub ack_delay_count: u32,
}

impl Default for RdpOptions {
    fn default() -> Self {
        Self {
            window_size: 4,
            conn_timeout_ms: 10_000,
            packet_timeout_ms: 1_000,
            delayed_acks: true,
            ack_timeout_ms: 250,
            ack_delay_count: 2,
        }
    }
}

impl RdpOptions {
    pub fn validate(&self) -> Result<(), RdpError> {
        if self.window_size == 0 || self.window_size > MAX_WINDOW {
            return Err(RdpError::InvalidOption("window_size"));
        }
        if self.conn_timeout_ms == 0 {
            return Err(RdpError::InvalidOption("conn_timeout_ms"));
        }
        if self.packet_timeout_ms == 0 {
            return Err(RdpError::InvalidOption("packet_timeout_ms"));
        }
        if self.delayed_acks && self.ack_delay_count == 0 {
            return Err(RdpError::InvalidOption("ack_delay_count"));
        }
        Ok(())
    }

    /// Encode for a SYN segment.
    pub fn to_syn_payload(&self) -> [u8; SYN_OPTIONS_SIZE] {
        let words = [
            self.window_size,
            self.conn_timeout_ms,
            self.packet_timeout_ms,
            self.delayed_acks as u32,
            self.ack_timeout_ms,
            self.ack_delay_count,
        ];
        let mut out = [0u8; SYN_OPTIONS_SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        out
    }

    /// Decode a SYN option block. The result is validated.
    pub fn from_syn_payload(raw: &[u8]) -> Result<Self, RdpError> {
        if raw.len() != SYN_OPTIONS_SIZE {
            return Err(RdpError::InvalidOption("syn option block length"));
        }
        let mut words = raw
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]));
        let mut next = || words.next().unwrap_or(0);
        let opts = Self {
            window_size: next(),
            conn_timeout_ms: next(),
            packet_timeout_ms: next(),
            delayed_acks: next() != 0,
            ack_timeout_ms: next(),
            ack_delay_count: next(),
        };
        opts.validate()?;
        Ok(opts)
    }
}
