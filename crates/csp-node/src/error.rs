//! Error types for the node binary.

use csp_core::CspError;
use csp_transport::StackError;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("stack error: {0}")]
    Stack(#[from] StackError),
    #[error("csp error: {0}")]
    Csp(#[from] CspError),
    #[error("node already running")]
    AlreadyRunning,
}
