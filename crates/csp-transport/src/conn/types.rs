use std::fmt;

use csp_core::{CspId, SocketOptions};
use csp_protocol::rdp::RdpStats;

/// Stable reference to a connection slot.
///
/// Carries the generation the slot had when it was opened, so a handle kept
/// after `close` is recognised as stale instead of reaching whatever
/// connection reused the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnHandle {
    pub(crate) index: u16,
    pub(crate) generation: u32,
}

impl ConnHandle {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}.{}", self.index, self.generation)
    }
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnKind {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnState {
    #[default]
    Closed,
    Open,
}

/// Point-in-time view of an open connection, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnInfo {
    pub handle: ConnHandle,
    pub kind: ConnKind,
    pub idin: CspId,
    pub idout: CspId,
    pub policy: SocketOptions,
    pub rx_queued: usize,
    pub rdp: Option<RdpStats>,
    pub age_ms: u64,
}

impl fmt::Display for ConnInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:02}] {:?} {}:{} -> {}:{} rxq={} age={}ms",
            self.handle.index,
            self.kind,
            self.idout.src,
            self.idout.sport,
            self.idout.dst,
            self.idout.dport,
            self.rx_queued,
            self.age_ms,
        )?;
        if let Some(rdp) = &self.rdp {
            write!(
                f,
                " rdp={} nxt={} una={} cur={} unacked={}",
                rdp.state, rdp.snd_nxt, rdp.snd_una, rdp.rcv_cur, rdp.unacked
            )?;
        }
        Ok(())
    }
}
