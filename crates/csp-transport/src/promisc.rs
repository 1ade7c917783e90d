//! Promiscuous tap: a bounded copy of routed traffic for a monitor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use csp_core::Packet;

use crate::buffer::{BufferPool, SharedPacket};
use crate::queue::BoundedQueue;

pub struct PromiscTap {
    enabled: AtomicBool,
    queue: BoundedQueue<SharedPacket>,
}

impl PromiscTap {
    pub fn new(queue_len: usize) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            queue: BoundedQueue::new(queue_len),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn the tap on or off. Turning it off drops anything queued.
    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
        if !on {
            self.queue.clear();
        }
    }

    /// Queue a copy of `packet`. Never affects the original: when the tap
    /// is off, the pool is short or the monitor lags, nothing happens.
    pub fn observe(&self, pool: &BufferPool, packet: &Packet) {
        if !self.is_enabled() {
            return;
        }
        let Some(copy) = pool.clone_packet(packet) else {
            return;
        };
        if self.queue.try_push(copy.into_shared()).is_err() {
            tracing::trace!("promisc: monitor queue full, copy dropped");
        }
    }

    pub fn read(&self, timeout: Option<Duration>) -> Option<SharedPacket> {
        self.queue.pop(timeout)
    }
}
