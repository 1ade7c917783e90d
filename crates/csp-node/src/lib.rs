//! A runnable CSP node.
//!
//! Loads a [`NodeConfig`], builds the network stack, and drives the router
//! and the built-in service ports on blocking threads owned by a `tokio`
//! runtime.

pub mod config;
pub mod error;
pub mod logging;
pub mod node;

pub use config::NodeConfig;
pub use error::NodeError;
pub use node::{Node, ShutdownHandle};
