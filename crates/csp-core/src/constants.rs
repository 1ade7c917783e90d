//! Protocol constants and enumerations.

/// Largest payload a caller may place in a packet.
pub const MTU: usize = 256;

/// Room kept behind the payload for transport trailers
/// (RDP header, HMAC and CRC32).
pub const TRAILER_ROOM: usize = 16;

/// Backing storage per packet buffer.
pub const PACKET_DATA_CAPACITY: usize = MTU + TRAILER_ROOM;

/// Highest port number representable on the wire (6 bits).
pub const MAX_PORT: u8 = 63;

/// Port wildcard: binds a socket to every otherwise unbound port.
pub const PORT_ANY: u8 = 255;

/// Source port used for every outgoing `connect()`.
pub const CONNECT_SOURCE_PORT: u8 = 31;

// Reserved service ports
pub const PORT_PING: u8 = 1;
pub const PORT_MEMFREE: u8 = 3;
pub const PORT_REBOOT: u8 = 4;
pub const PORT_BUF_FREE: u8 = 5;
pub const PORT_UPTIME: u8 = 6;

/// Packet priority, two bits on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

impl Priority {
    /// Decode from the two low bits of `v`; higher bits are ignored.
    pub const fn from_bits(v: u8) -> Self {
        match v & 0x03 {
            0 => Priority::Critical,
            1 => Priority::High,
            2 => Priority::Normal,
            _ => Priority::Low,
        }
    }

    pub const fn bits(self) -> u8 {
        self as u8
    }
}
