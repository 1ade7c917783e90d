//! Transport layer error types.
//!
//! Caller-facing operations on [`crate::Stack`] return
//! [`csp_core::CspError`]; the types here cover construction and the
//! security gate's reasons for rejecting a packet.

use csp_core::CspError;
use csp_protocol::RdpError;

#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid HMAC key: {0}")]
    HmacKey(String),

    #[error("rdp error: {0}")]
    Rdp(#[from] RdpError),

    #[error(transparent)]
    Csp(#[from] CspError),
}

/// Why the security gate rejected a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SecurityError {
    #[error("CRC32 verification failed")]
    Crc32Mismatch,

    #[error("CRC32 required but not present")]
    Crc32Missing,

    #[error("HMAC verification failed")]
    HmacMismatch,

    #[error("HMAC required but not present")]
    HmacMissing,

    #[error("RDP required but not present")]
    RdpMissing,

    #[error("{0} not supported by this node")]
    Unsupported(&'static str),
}

impl From<SecurityError> for CspError {
    fn from(err: SecurityError) -> Self {
        match err {
            SecurityError::Crc32Mismatch | SecurityError::Crc32Missing => CspError::Crc32,
            SecurityError::HmacMismatch | SecurityError::HmacMissing => CspError::Hmac,
            SecurityError::RdpMissing => CspError::InvalidArgument,
            SecurityError::Unsupported(_) => CspError::NotSupported,
        }
    }
}
