//! Connection table.
//!
//! A fixed arena of connection slots allocated at start-up. Each slot has
//! its own lock for the connection record and its own receive queue, so
//! table operations never hold more than one slot lock at a time.

mod table;
mod types;

pub use table::{ConnRecord, ConnSlot, ConnTable};
pub use types::{ConnHandle, ConnInfo, ConnKind, ConnState};
