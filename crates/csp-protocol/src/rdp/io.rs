//! The seam between the RDP state machine and the surrounding stack.

use std::ops::DerefMut;

use csp_core::Packet;

/// Side effects the state machine needs from its connection.
///
/// The implementor owns identities: `transmit` is handed a segment whose
/// payload (data plus RDP header) is complete and must stamp the
/// connection's outbound identity and the RDP flag before sending.
pub trait RdpIo {
    type Buf: DerefMut<Target = Packet>;

    /// An empty buffer for a control segment, or `None` when exhausted.
    fn alloc(&mut self) -> Option<Self::Buf>;

    /// A private copy of `packet`, kept for retransmission.
    fn duplicate(&mut self, packet: &Packet) -> Option<Self::Buf>;

    fn transmit(&mut self, segment: Self::Buf);

    /// Hand an in-order payload to the application. Gives the buffer back
    /// when the receive queue is full.
    fn deliver(&mut self, packet: Self::Buf) -> Result<(), Self::Buf>;

    /// Free slots in the application receive queue.
    fn delivery_room(&self) -> usize;

    /// Total size of the application receive queue.
    fn delivery_capacity(&self) -> usize;

    /// Initial send sequence number for a new handshake.
    fn initial_sequence(&mut self) -> u16;
}
