use crate::conn::ConnHandle;
use crate::error::SecurityError;

/// What one router iteration did with the packet it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Nothing arrived within the wait.
    Idle,
    /// Handed to the raw callback bound on `port`.
    Callback { port: u8 },
    /// Queued on the connection-less socket bound on `port`.
    Socket { port: u8 },
    /// Queued on a connection. `new` is set when the router opened it.
    Connection { handle: ConnHandle, new: bool },
    /// Handed to the connection's RDP state machine. `closed` is set when
    /// the segment ended the connection.
    Reliable { handle: ConnHandle, closed: bool },
    /// Not addressed to this node; sent on towards its destination.
    Forwarded,
    Dropped(DropReason),
}

impl RouteOutcome {
    pub fn is_dropped(&self) -> bool {
        matches!(self, RouteOutcome::Dropped(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Arrived without a known ingress interface.
    NoIngress,
    Duplicate,
    /// Rejected by the security gate, including unsupported options.
    Security(SecurityError),
    /// No socket listening on the destination port.
    NoSocket,
    SocketFull,
    ConnTableFull,
    /// The matching connection closed while the packet was in flight.
    ConnClosed,
    ConnQueueFull,
    AcceptQueueFull,
    NoRoute,
    /// The next hop is back out of the interface it came in on.
    Reflected,
    Transmit,
}
