use std::sync::Arc;
use std::time::Duration;

use csp_core::{HeaderFlags, IdMask, SocketOptions};
use csp_protocol::rdp::{RdpConnection, SegmentOutcome, TimerOutcome};

use super::types::{DropReason, RouteOutcome};
use crate::buffer::PacketBuf;
use crate::conn::{ConnHandle, ConnKind};
use crate::error::SecurityError;
use crate::iface::Interface;
use crate::reliable::ConnIo;
use crate::security;
use crate::socket::{Socket, SocketItem};
use crate::stack::Stack;

impl Stack {
    /// One router iteration.
    ///
    /// Waits at most `route_wait_ms` for a packet. Never fails: every drop
    /// frees the packet and bumps a counter.
    pub fn route_work(&self) -> RouteOutcome {
        if self.caps.rdp {
            self.check_rdp_timeouts();
        }

        let wait = Duration::from_millis(self.config.route_wait_ms);
        let Some(mut packet) = self.inbound.pop(Some(wait)) else {
            return RouteOutcome::Idle;
        };
        let now = self.clock.now_ms();

        let Some(iface) = packet.ingress.and_then(|i| self.ifaces.get(i)) else {
            tracing::debug!(ingress = ?packet.ingress, "router: unknown ingress interface, dropped");
            return RouteOutcome::Dropped(DropReason::NoIngress);
        };
        iface.counters.rx.inc();
        iface.counters.rx_bytes.add(packet.len() as u64);
        self.hooks.on_input(iface.name(), &packet);

        let is_to_me = self.is_to_me(packet.id.dst, &iface);

        if self.config.dedup.applies(is_to_me) && self.dedup.lock().is_duplicate(&packet, now) {
            iface.counters.drop.inc();
            tracing::trace!(src = packet.id.src, dst = packet.id.dst, "router: duplicate dropped");
            return RouteOutcome::Dropped(DropReason::Duplicate);
        }

        if self.caps.promisc {
            self.promisc.observe(&self.pool, &packet);
        }

        if !is_to_me {
            return self.forward(packet, &iface);
        }

        if let Err(err) = security::check_options(&packet, &self.caps, &iface.counters) {
            tracing::debug!(%err, "router: unsupported option");
            return RouteOutcome::Dropped(DropReason::Security(err));
        }

        let port = packet.id.dport;

        // Raw callbacks skip the socket and connection machinery.
        if let Some(callback) = self.ports.lookup_callback(port) {
            if let Err(err) = self.verify(SocketOptions::CRC32REQ, &mut packet, &iface) {
                return RouteOutcome::Dropped(DropReason::Security(err));
            }
            callback(packet);
            return RouteOutcome::Callback { port };
        }

        let socket = self.ports.lookup_socket(port);

        if let Some(sock) = &socket
            && sock.is_connectionless()
        {
            if let Err(err) = self.verify(sock.options(), &mut packet, &iface) {
                return RouteOutcome::Dropped(DropReason::Security(err));
            }
            return match sock.post(SocketItem::Packet(packet)) {
                Ok(()) => RouteOutcome::Socket { port },
                Err(_) if sock.is_closed() => {
                    iface.counters.drop.inc();
                    tracing::debug!(port, "router: socket closed, dropped");
                    RouteOutcome::Dropped(DropReason::NoSocket)
                }
                Err(_) => {
                    self.counters.conn_overflow.inc();
                    tracing::debug!(port, "router: socket queue full, dropped");
                    RouteOutcome::Dropped(DropReason::SocketFull)
                }
            };
        }

        let mask = IdMask::connection(self.mode);
        let (handle, new) = match self.conns.find(&packet.id, mask) {
            Some(handle) => {
                let Ok(policy) = self.conns.with_record(handle, |rec| rec.policy) else {
                    iface.counters.drop.inc();
                    return RouteOutcome::Dropped(DropReason::ConnClosed);
                };
                if let Err(err) = self.verify(policy, &mut packet, &iface) {
                    return RouteOutcome::Dropped(DropReason::Security(err));
                }
                (handle, false)
            }
            None => {
                let Some(sock) = socket else {
                    iface.counters.drop.inc();
                    tracing::debug!(port, src = packet.id.src, "router: no socket listening");
                    return RouteOutcome::Dropped(DropReason::NoSocket);
                };
                if let Err(err) = self.verify(sock.options(), &mut packet, &iface) {
                    return RouteOutcome::Dropped(DropReason::Security(err));
                }
                let idin = packet.id;
                let idout = idin.reversed();
                let handle = match self.conns.allocate(idin, idout, ConnKind::Server, now) {
                    Ok(handle) => handle,
                    Err(err) => {
                        self.counters.conn_out_of_slots.inc();
                        tracing::warn!(%err, port, "router: cannot open server connection");
                        return RouteOutcome::Dropped(DropReason::ConnTableFull);
                    }
                };
                let policy = sock.options();
                if self
                    .conns
                    .with_record(handle, |rec| {
                        rec.policy = policy;
                        rec.dest_socket = Some(sock);
                    })
                    .is_err()
                {
                    return RouteOutcome::Dropped(DropReason::ConnClosed);
                }
                (handle, true)
            }
        };

        if self.caps.rdp && packet.id.flags.contains(HeaderFlags::RDP) {
            return self.rdp_segment(handle, packet, now);
        }

        if self.conns.enqueue(handle, packet).is_err() {
            self.counters.conn_overflow.inc();
            tracing::debug!(%handle, "router: connection queue full, dropped");
            if new {
                let _ = self.conns.close(handle);
            }
            return RouteOutcome::Dropped(DropReason::ConnQueueFull);
        }

        // A new connection is offered to its socket exactly once.
        let pending = self
            .conns
            .with_record(handle, |rec| rec.dest_socket.take())
            .ok()
            .flatten();
        if let Some(sock) = pending
            && let Err(reason) = self.offer(&sock, handle)
        {
            return RouteOutcome::Dropped(reason);
        }

        RouteOutcome::Connection { handle, new }
    }

    /// Post a new connection to its listening socket, closing it when the
    /// socket cannot take it.
    fn offer(&self, sock: &Socket, handle: ConnHandle) -> Result<(), DropReason> {
        if sock.post(SocketItem::Conn(handle)).is_ok() {
            return Ok(());
        }
        let _ = self.conns.close(handle);
        if sock.is_closed() {
            tracing::debug!(%handle, "router: socket closed before accept, closing connection");
            return Err(DropReason::NoSocket);
        }
        self.counters.conn_overflow.inc();
        tracing::debug!(%handle, "router: accept queue full, closing connection");
        Err(DropReason::AcceptQueueFull)
    }

    /// Destination is one of our addresses, the global broadcast address,
    /// or the broadcast address of the ingress subnet.
    fn is_to_me(&self, dst: u16, ingress: &Interface) -> bool {
        dst == self.address
            || dst == self.mode.broadcast_address()
            || ingress.is_broadcast(dst)
            || self.ifaces.by_address(dst).is_some()
    }

    /// Run the security gate and strip the verified trailers.
    fn verify(
        &self,
        policy: SocketOptions,
        packet: &mut PacketBuf,
        iface: &Interface,
    ) -> Result<(), SecurityError> {
        match security::check(policy, packet, &self.caps, &self.hmac_key, &iface.counters) {
            Ok(verdict) => {
                let len = packet.len() - verdict.trailer_len;
                packet.truncate(len);
                Ok(())
            }
            Err(err) => {
                tracing::debug!(%err, src = packet.id.src, dport = packet.id.dport, "router: security check failed");
                Err(err)
            }
        }
    }

    fn forward(&self, packet: PacketBuf, ingress: &Arc<Interface>) -> RouteOutcome {
        let Some((out, via)) = self.resolve(packet.id.dst) else {
            ingress.counters.drop.inc();
            tracing::debug!(dst = packet.id.dst, "router: no route for forward");
            return RouteOutcome::Dropped(DropReason::NoRoute);
        };
        if out.index() == ingress.index() {
            ingress.counters.drop.inc();
            tracing::trace!(dst = packet.id.dst, iface = out.name(), "router: not forwarding back out of ingress");
            return RouteOutcome::Dropped(DropReason::Reflected);
        }
        match self.transmit_via(packet, &out, via, false) {
            Ok(()) => RouteOutcome::Forwarded,
            Err(_) => RouteOutcome::Dropped(DropReason::Transmit),
        }
    }

    fn rdp_segment(&self, handle: ConnHandle, packet: PacketBuf, now: u64) -> RouteOutcome {
        let (Ok(slot), Ok(mut rec)) = (self.conns.slot(handle), self.conns.lock(handle)) else {
            return RouteOutcome::Dropped(DropReason::ConnClosed);
        };
        let opts = *self.rdp_opts.read();
        let idout = rec.idout;
        let mut io = ConnIo::new(self, &slot.rx, idout);
        let outcome = rec
            .rdp
            .get_or_insert_with(|| RdpConnection::new(opts, now))
            .on_segment(packet, now, &mut io);

        let listener = match outcome {
            SegmentOutcome::Established => rec.dest_socket.take(),
            _ => None,
        };
        drop(rec);
        self.conns.notify(handle);

        match outcome {
            SegmentOutcome::Keep => RouteOutcome::Reliable {
                handle,
                closed: false,
            },
            SegmentOutcome::Established => {
                if let Some(sock) = listener
                    && let Err(reason) = self.offer(&sock, handle)
                {
                    return RouteOutcome::Dropped(reason);
                }
                RouteOutcome::Reliable {
                    handle,
                    closed: false,
                }
            }
            SegmentOutcome::Close => {
                let _ = self.conns.close(handle);
                RouteOutcome::Reliable {
                    handle,
                    closed: true,
                }
            }
        }
    }

    /// Retransmission, acknowledgement and expiry timers of every reliable
    /// connection.
    pub(crate) fn check_rdp_timeouts(&self) {
        let now = self.clock.now_ms();
        for index in 0..self.conns.capacity() {
            let Some(handle) = self.conns.handle_at(index) else {
                continue;
            };
            let (Ok(slot), Ok(mut rec)) = (self.conns.slot(handle), self.conns.lock(handle)) else {
                continue;
            };
            let idout = rec.idout;
            let Some(rdp) = rec.rdp.as_mut() else {
                continue;
            };
            let mut io = ConnIo::new(self, &slot.rx, idout);
            let outcome = rdp.check_timeouts(now, &mut io);
            drop(rec);

            if outcome == TimerOutcome::Close {
                let _ = self.conns.close(handle);
            } else {
                self.conns.notify(handle);
            }
        }
    }
}
