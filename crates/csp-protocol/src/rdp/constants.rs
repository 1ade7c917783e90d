//! RDP constants.

/// Segment header size: flags (1) + sequence (2) + acknowledgement (2).
pub const HEADER_SIZE: usize = 5;

pub const FLAG_SYN: u8 = 0x08;
pub const FLAG_ACK: u8 = 0x04;
pub const FLAG_EAK: u8 = 0x02;
pub const FLAG_RST: u8 = 0x01;

/// Upper bound for the negotiated send window.
pub const MAX_WINDOW: u32 = 20;

/// Retransmissions of a single segment before the connection is torn down.
pub const MAX_RETRIES: u32 = 5;

/// Size of the option block carried in a SYN: six big-endian u32 values.
pub const SYN_OPTIONS_SIZE: usize = 24;
