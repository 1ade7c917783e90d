//! Platform hooks supplied when the stack is built.

use csp_core::Packet;

/// Callbacks into the host platform. Every method has a default, so an
/// implementation only overrides what the platform provides.
pub trait StackHooks: Send + Sync {
    /// Called by the router for every packet taken off the inbound queue.
    fn on_input(&self, iface: &str, packet: &Packet) {
        tracing::trace!(
            iface,
            pri = ?packet.id.pri,
            src = packet.id.src,
            dst = packet.id.dst,
            dport = packet.id.dport,
            sport = packet.id.sport,
            flags = ?packet.id.flags,
            len = packet.len(),
            "input"
        );
    }

    /// Free heap bytes, reported by the memfree service.
    fn memfree(&self) -> u64 {
        0
    }

    fn reboot(&self) {
        tracing::warn!("reboot requested but no platform hook installed");
    }

    fn shutdown(&self) {
        tracing::warn!("shutdown requested but no platform hook installed");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl StackHooks for NoopHooks {}
