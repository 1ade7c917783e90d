//! Glue between a connection slot and its RDP state machine.

use csp_core::{CspId, HeaderFlags, Packet};
use csp_protocol::rdp::RdpIo;

use crate::buffer::PacketBuf;
use crate::queue::BoundedQueue;
use crate::stack::Stack;

/// [`RdpIo`] for one connection: buffers from the pool, segments out
/// through the stack's send path, payloads into the connection's receive
/// queue.
pub(crate) struct ConnIo<'a> {
    stack: &'a Stack,
    rx: &'a BoundedQueue<PacketBuf>,
    idout: CspId,
}

impl<'a> ConnIo<'a> {
    pub(crate) fn new(stack: &'a Stack, rx: &'a BoundedQueue<PacketBuf>, idout: CspId) -> Self {
        Self { stack, rx, idout }
    }
}

impl RdpIo for ConnIo<'_> {
    type Buf = PacketBuf;

    fn alloc(&mut self) -> Option<PacketBuf> {
        self.stack.pool.acquire()
    }

    fn duplicate(&mut self, packet: &Packet) -> Option<PacketBuf> {
        self.stack.pool.clone_packet(packet)
    }

    fn transmit(&mut self, mut segment: PacketBuf) {
        let mut id = self.idout;
        id.flags.insert(HeaderFlags::RDP);
        segment.id = id;
        if let Err(err) = self.stack.send_direct(segment) {
            tracing::debug!(%err, dst = id.dst, "rdp: segment not sent");
        }
    }

    fn deliver(&mut self, packet: PacketBuf) -> Result<(), PacketBuf> {
        self.rx.try_push(packet)
    }

    fn delivery_room(&self) -> usize {
        self.rx.room()
    }

    fn delivery_capacity(&self) -> usize {
        self.rx.capacity()
    }

    fn initial_sequence(&mut self) -> u16 {
        rand::random()
    }
}
