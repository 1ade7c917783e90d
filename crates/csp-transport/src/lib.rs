//! Routing and transport layer for the CSP network stack.
//!
//! This crate owns every shared structure of a running node: the packet
//! buffer pool, the inbound queue, port and connection tables, the dedup
//! filter, interfaces and routes. [`Stack`] ties them together and exposes
//! the router (`route_work`) and the socket/connection API.

pub mod buffer;
pub mod clock;
pub mod config;
pub mod conn;
pub mod dedup;
pub mod error;
pub mod hooks;
pub mod iface;
pub mod port;
pub mod promisc;
pub mod queue;
mod reliable;
pub mod router;
pub mod rtable;
pub mod security;
pub mod services;
pub mod socket;
pub mod stack;

pub use buffer::{BufferPool, ExecContext, PacketBuf, SharedPacket};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{Addressing, Capabilities, StackConfig};
pub use conn::{ConnHandle, ConnInfo, ConnKind};
pub use dedup::{DedupFilter, DedupMode};
pub use error::{SecurityError, StackError};
pub use hooks::{NoopHooks, StackHooks};
pub use iface::{CounterSnapshot, Interface, LinkDriver, LoopbackDriver};
pub use router::{DropReason, RouteOutcome};
pub use rtable::Route;
pub use socket::Socket;
pub use stack::{GlobalCounters, Stack};
