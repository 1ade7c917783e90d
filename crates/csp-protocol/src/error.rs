//! Protocol error types.

use csp_core::{CspError, PacketError};

use crate::rdp::RdpState;

#[derive(Debug, thiserror::Error)]
pub enum RdpError {
    #[error("connection not open (state {0})")]
    NotOpen(RdpState),

    #[error("connection busy (state {0})")]
    Busy(RdpState),

    #[error("send window full")]
    WindowFull,

    #[error("no buffer available for segment")]
    NoBuffers,

    #[error("zero-length segments are not sent")]
    EmptySegment,

    #[error("invalid RDP option: {0}")]
    InvalidOption(&'static str),

    #[error("malformed segment: {0}")]
    Malformed(#[from] PacketError),
}

impl From<RdpError> for CspError {
    fn from(err: RdpError) -> Self {
        match err {
            RdpError::NotOpen(_) => CspError::Reset,
            RdpError::Busy(_) => CspError::Busy,
            RdpError::WindowFull => CspError::WouldBlock,
            RdpError::NoBuffers => CspError::NoBuffers,
            RdpError::EmptySegment | RdpError::InvalidOption(_) | RdpError::Malformed(_) => {
                CspError::InvalidArgument
            }
        }
    }
}
