//! Port table: destination port to callback or socket.
//!
//! One entry per port `0..=MAX_PORT` plus a wildcard entry for
//! [`PORT_ANY`], consulted when the exact port is unbound.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use csp_core::CspError;
use csp_core::constants::{MAX_PORT, PORT_ANY};

use crate::buffer::PacketBuf;
use crate::socket::Socket;

/// Raw per-packet handler. Runs on the router thread and owns the packet.
pub type PortCallback = Arc<dyn Fn(PacketBuf) + Send + Sync>;

#[derive(Clone, Default)]
pub enum PortTarget {
    #[default]
    Unbound,
    Callback(PortCallback),
    Socket(Arc<Socket>),
}

impl PortTarget {
    pub fn is_bound(&self) -> bool {
        !matches!(self, PortTarget::Unbound)
    }
}

impl fmt::Debug for PortTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortTarget::Unbound => f.write_str("Unbound"),
            PortTarget::Callback(_) => f.write_str("Callback(..)"),
            PortTarget::Socket(s) => f.debug_tuple("Socket").field(s).finish(),
        }
    }
}

const ANY_SLOT: usize = MAX_PORT as usize + 1;

pub struct PortTable {
    entries: RwLock<Vec<PortTarget>>,
}

impl PortTable {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(vec![PortTarget::Unbound; ANY_SLOT + 1]),
        }
    }

    fn slot(port: u8) -> Result<usize, CspError> {
        match port {
            PORT_ANY => Ok(ANY_SLOT),
            p if p <= MAX_PORT => Ok(p as usize),
            _ => Err(CspError::InvalidArgument),
        }
    }

    /// Register `target` on `port`. The port must be free.
    pub fn bind(&self, port: u8, target: PortTarget) -> Result<(), CspError> {
        let slot = Self::slot(port)?;
        if !target.is_bound() {
            return Err(CspError::InvalidArgument);
        }
        let mut entries = self.entries.write();
        if entries[slot].is_bound() {
            tracing::debug!(port, "port already in use");
            return Err(CspError::AlreadyInUse);
        }
        entries[slot] = target;
        tracing::debug!(port, "port bound");
        Ok(())
    }

    /// Free `port`, returning what was bound there.
    pub fn unbind(&self, port: u8) -> Result<PortTarget, CspError> {
        let slot = Self::slot(port)?;
        Ok(std::mem::take(&mut self.entries.write()[slot]))
    }

    /// Unbind every port that holds `socket`.
    pub fn unbind_socket(&self, socket: &Arc<Socket>) -> usize {
        let mut entries = self.entries.write();
        let mut freed = 0;
        for entry in entries.iter_mut() {
            if let PortTarget::Socket(s) = entry
                && Arc::ptr_eq(s, socket)
            {
                *entry = PortTarget::Unbound;
                freed += 1;
            }
        }
        freed
    }

    /// Entry for `port`, falling back to the wildcard entry.
    pub fn lookup(&self, port: u8) -> PortTarget {
        let entries = self.entries.read();
        let exact = Self::slot(port)
            .ok()
            .filter(|&s| s != ANY_SLOT)
            .map(|s| &entries[s])
            .filter(|t| t.is_bound());
        exact.unwrap_or(&entries[ANY_SLOT]).clone()
    }

    pub fn lookup_callback(&self, port: u8) -> Option<PortCallback> {
        match self.lookup(port) {
            PortTarget::Callback(cb) => Some(cb),
            _ => None,
        }
    }

    pub fn lookup_socket(&self, port: u8) -> Option<Arc<Socket>> {
        match self.lookup(port) {
            PortTarget::Socket(s) => Some(s),
            _ => None,
        }
    }
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}
