//! Packet router.
//!
//! [`crate::Stack::route_work`] runs one iteration: timer maintenance for
//! reliable connections, then at most one packet from the inbound queue
//! through dedup, the security gate and delivery. Failures never surface
//! as errors; the packet is freed, a counter bumped, and the iteration
//! reports why in its [`RouteOutcome`].

mod dispatch;
mod send;
mod types;

pub use types::{DropReason, RouteOutcome};
