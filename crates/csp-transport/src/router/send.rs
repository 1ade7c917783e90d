use std::sync::Arc;

use csp_core::integrity::{crc32_append, hmac_append};
use csp_core::{CspError, HeaderFlags};

use crate::buffer::PacketBuf;
use crate::iface::Interface;
use crate::stack::Stack;

impl Stack {
    /// Next hop for `dst`: outgoing interface and the address to hand the
    /// driver.
    ///
    /// Our own addresses go to loopback. Otherwise the route table is
    /// consulted (when enabled), then the interface subnets.
    pub(crate) fn resolve(&self, dst: u16) -> Option<(Arc<Interface>, u16)> {
        if dst == self.address || self.ifaces.by_address(dst).is_some() {
            return self.ifaces.get(0).map(|lo| (lo, dst));
        }
        if self.caps.rtable {
            let route = self.rtable.read().lookup(dst);
            if let Some(route) = route
                && let Some(iface) = self.ifaces.get(route.iface)
            {
                return Some((iface, route.via.unwrap_or(dst)));
            }
        }
        self.ifaces.by_subnet(dst).map(|iface| (iface, dst))
    }

    /// Send a fully addressed packet on the interface its destination
    /// resolves to. HMAC and CRC32 trailers are appended as the header
    /// flags ask.
    pub fn send_direct(&self, packet: PacketBuf) -> Result<(), CspError> {
        let Some((iface, via)) = self.resolve(packet.id.dst) else {
            tracing::debug!(dst = packet.id.dst, "no route to destination");
            return Err(CspError::Transmit);
        };
        self.transmit_via(packet, &iface, via, true)
    }

    /// Hand `packet` to `iface`'s driver. Trailers are only added for
    /// packets originating here; forwarded packets keep the ones they
    /// arrived with.
    pub(crate) fn transmit_via(
        &self,
        mut packet: PacketBuf,
        iface: &Interface,
        via: u16,
        from_me: bool,
    ) -> Result<(), CspError> {
        if from_me {
            let flags = packet.id.flags;
            if flags.contains(HeaderFlags::HMAC) {
                if !self.caps.hmac {
                    iface.counters.tx_error.inc();
                    return Err(CspError::NotSupported);
                }
                if let Err(err) = hmac_append(&mut packet, &self.hmac_key) {
                    iface.counters.tx_error.inc();
                    tracing::debug!(%err, "no room for HMAC trailer");
                    return Err(CspError::InvalidArgument);
                }
            }
            if flags.contains(HeaderFlags::CRC32)
                && let Err(err) = crc32_append(&mut packet)
            {
                iface.counters.tx_error.inc();
                tracing::debug!(%err, "no room for CRC32 trailer");
                return Err(CspError::InvalidArgument);
            }
        }

        let len = packet.len() as u64;
        let (dst, dport) = (packet.id.dst, packet.id.dport);
        match iface.driver().transmit(packet, via) {
            Ok(()) => {
                iface.counters.tx.inc();
                iface.counters.tx_bytes.add(len);
                tracing::trace!(iface = iface.name(), dst, dport, via, len, "sent");
                Ok(())
            }
            Err(err) => {
                iface.counters.tx_error.inc();
                tracing::debug!(iface = iface.name(), %err, dst, "driver transmit failed");
                Err(err)
            }
        }
    }
}
