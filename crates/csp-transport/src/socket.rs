//! Listening and connection-less sockets.

use std::fmt;
use std::time::Duration;

use csp_core::SocketOptions;

use crate::buffer::PacketBuf;
use crate::conn::ConnHandle;
use crate::queue::BoundedQueue;

/// What a socket's ready queue holds: new connections for a listening
/// socket, packets for a connection-less one.
#[derive(Debug)]
pub enum SocketItem {
    Conn(ConnHandle),
    Packet(PacketBuf),
}

pub struct Socket {
    opts: SocketOptions,
    queue: BoundedQueue<SocketItem>,
}

impl Socket {
    pub(crate) fn new(opts: SocketOptions, backlog: usize) -> Self {
        Self {
            opts,
            queue: BoundedQueue::new(backlog),
        }
    }

    pub fn options(&self) -> SocketOptions {
        self.opts
    }

    pub fn is_connectionless(&self) -> bool {
        self.opts.is_connectionless()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn set_backlog(&self, backlog: usize) {
        self.queue.set_capacity(backlog);
    }

    pub(crate) fn post(&self, item: SocketItem) -> Result<(), SocketItem> {
        self.queue.try_push(item)
    }

    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Option<SocketItem> {
        self.queue.pop(timeout)
    }

    /// Whether the socket has been closed. A closed socket refuses posts.
    pub fn is_closed(&self) -> bool {
        self.queue.is_shut()
    }

    /// Stop accepting posts and empty the ready queue. Packets return to
    /// the pool; pending connection handles are returned for the caller to
    /// close.
    pub(crate) fn close(&self) -> Vec<ConnHandle> {
        self.queue
            .shut()
            .into_iter()
            .filter_map(|item| match item {
                SocketItem::Conn(handle) => Some(handle),
                SocketItem::Packet(_) => None,
            })
            .collect()
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("opts", &self.opts)
            .field("pending", &self.queue.len())
            .field("backlog", &self.queue.capacity())
            .finish()
    }
}
