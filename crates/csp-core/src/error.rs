//! Error types for the csp-core crate.

use core::fmt;

/// Wire-level parsing and buffer sizing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    TooShort { min: usize, actual: usize },
    TooLarge { max: usize, actual: usize },
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketError::TooShort { min, actual } => {
                write!(f, "packet too short: need at least {min} bytes, got {actual}")
            }
            PacketError::TooLarge { max, actual } => {
                write!(f, "packet too large: at most {max} bytes, got {actual}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PacketError {}

/// Error codes surfaced to callers of the stack.
///
/// Success ("none") is `Ok(())`; every other code has a variant here. The
/// numeric values returned by [`CspError::code`] are the ones used by the
/// C API and its language bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CspError {
    NoMemory,
    InvalidArgument,
    TimedOut,
    AlreadyInUse,
    NotSupported,
    Busy,
    Already,
    Reset,
    NoBuffers,
    Transmit,
    Driver,
    WouldBlock,
    NoSystemCall,
    Hmac,
    Crc32,
    Fragmentation,
}

impl CspError {
    pub const fn code(self) -> i32 {
        match self {
            CspError::NoMemory => -1,
            CspError::InvalidArgument => -2,
            CspError::TimedOut => -3,
            CspError::AlreadyInUse => -4,
            CspError::NotSupported => -5,
            CspError::Busy => -6,
            CspError::Already => -7,
            CspError::Reset => -8,
            CspError::NoBuffers => -9,
            CspError::Transmit => -10,
            CspError::Driver => -11,
            CspError::WouldBlock => -12,
            CspError::NoSystemCall => -38,
            CspError::Hmac => -100,
            CspError::Crc32 => -102,
            CspError::Fragmentation => -103,
        }
    }

    /// Map a numeric code back to an error. `0` (none) and unknown codes
    /// yield `None`.
    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => CspError::NoMemory,
            -2 => CspError::InvalidArgument,
            -3 => CspError::TimedOut,
            -4 => CspError::AlreadyInUse,
            -5 => CspError::NotSupported,
            -6 => CspError::Busy,
            -7 => CspError::Already,
            -8 => CspError::Reset,
            -9 => CspError::NoBuffers,
            -10 => CspError::Transmit,
            -11 => CspError::Driver,
            -12 => CspError::WouldBlock,
            -38 => CspError::NoSystemCall,
            -100 => CspError::Hmac,
            -102 => CspError::Crc32,
            -103 => CspError::Fragmentation,
            _ => return None,
        })
    }
}

impl fmt::Display for CspError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            CspError::NoMemory => "out of memory",
            CspError::InvalidArgument => "invalid argument",
            CspError::TimedOut => "operation timed out",
            CspError::AlreadyInUse => "resource already in use",
            CspError::NotSupported => "operation not supported",
            CspError::Busy => "device or resource busy",
            CspError::Already => "connection already in progress",
            CspError::Reset => "connection reset",
            CspError::NoBuffers => "no more buffer space available",
            CspError::Transmit => "transmission failed",
            CspError::Driver => "error in driver layer",
            CspError::WouldBlock => "resource temporarily unavailable",
            CspError::NoSystemCall => "function not implemented",
            CspError::Hmac => "HMAC failed",
            CspError::Crc32 => "CRC32 failed",
            CspError::Fragmentation => "fragmentation protocol error",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CspError {}

impl From<PacketError> for CspError {
    fn from(e: PacketError) -> Self {
        match e {
            PacketError::TooShort { .. } => CspError::InvalidArgument,
            PacketError::TooLarge { .. } => CspError::InvalidArgument,
        }
    }
}
