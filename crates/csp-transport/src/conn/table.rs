use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use csp_core::constants::{CONNECT_SOURCE_PORT, Priority};
use csp_core::{AddressMode, CspError, CspId, HeaderFlags, IdMask, SocketOptions};
use csp_protocol::rdp::RdpConnection;

use super::types::{ConnHandle, ConnInfo, ConnKind, ConnState};
use crate::buffer::PacketBuf;
use crate::queue::BoundedQueue;
use crate::socket::Socket;

/// Mutable part of a connection slot, guarded by the slot lock.
#[derive(Default)]
pub struct ConnRecord {
    pub state: ConnState,
    pub generation: u32,
    pub idin: CspId,
    pub idout: CspId,
    pub policy: SocketOptions,
    pub kind: Option<ConnKind>,
    /// Listening socket still to be told about this connection. Cleared
    /// once the connection has been posted.
    pub dest_socket: Option<Arc<Socket>>,
    pub rdp: Option<RdpConnection<PacketBuf>>,
    /// Partially reassembled message held for a chunked transfer.
    pub reassembly: Option<PacketBuf>,
    pub opened_at: u64,
}

impl ConnRecord {
    fn is_live(&self, handle: ConnHandle) -> bool {
        self.state == ConnState::Open && self.generation == handle.generation
    }
}

pub struct ConnSlot {
    pub record: Mutex<ConnRecord>,
    pub rx: BoundedQueue<PacketBuf>,
    /// Signalled whenever the record changes in a way a blocked sender or
    /// connector may care about (handshake done, window opened, closed).
    pub changed: Condvar,
}

pub struct ConnTable {
    slots: Box<[ConnSlot]>,
    alloc_lock: Mutex<()>,
    mode: AddressMode,
}

impl ConnTable {
    pub fn new(count: usize, rx_queue_len: usize, mode: AddressMode) -> Self {
        let slots = (0..count)
            .map(|_| ConnSlot {
                record: Mutex::new(ConnRecord::default()),
                rx: BoundedQueue::new(rx_queue_len),
                changed: Condvar::new(),
            })
            .collect();
        Self {
            slots,
            alloc_lock: Mutex::new(()),
            mode,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn mode(&self) -> AddressMode {
        self.mode
    }

    /// First open connection whose inbound identity matches `id` under
    /// `mask`. Closed slots never match, whatever identity they last held.
    pub fn find(&self, id: &CspId, mask: IdMask) -> Option<ConnHandle> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            let rec = slot.record.lock();
            (rec.state == ConnState::Open && rec.idin.matches(id, mask, self.mode)).then(|| {
                ConnHandle {
                    index: index as u16,
                    generation: rec.generation,
                }
            })
        })
    }

    /// Open a free slot with the given identities.
    ///
    /// Fails with `AlreadyInUse` if an open connection already has an
    /// inbound identity equal to `idin` (so `find` stays unambiguous) and
    /// with `NoMemory` when every slot is taken.
    pub fn allocate(
        &self,
        idin: CspId,
        idout: CspId,
        kind: ConnKind,
        now: u64,
    ) -> Result<ConnHandle, CspError> {
        let _guard = self.alloc_lock.lock();

        if self.find(&idin, IdMask::connection(self.mode)).is_some() {
            tracing::debug!(?idin, "connection identity already open");
            return Err(CspError::AlreadyInUse);
        }

        for (index, slot) in self.slots.iter().enumerate() {
            let mut rec = slot.record.lock();
            if rec.state != ConnState::Closed {
                continue;
            }
            let stale = slot.rx.clear();
            if stale > 0 {
                tracing::warn!(index, stale, "packets left on a closed connection freed");
            }
            let generation = rec.generation.wrapping_add(1);
            *rec = ConnRecord {
                state: ConnState::Open,
                generation,
                idin,
                idout,
                kind: Some(kind),
                opened_at: now,
                ..ConnRecord::default()
            };
            let handle = ConnHandle {
                index: index as u16,
                generation,
            };
            tracing::debug!(%handle, ?kind, src = idout.src, dst = idout.dst, dport = idout.dport, "connection opened");
            return Ok(handle);
        }

        tracing::warn!(capacity = self.slots.len(), "connection table full");
        Err(CspError::NoMemory)
    }

    /// Client-side open towards `dest:dport`.
    ///
    /// Every outgoing connection uses [`CONNECT_SOURCE_PORT`] as its local
    /// port, so two concurrent connections to the same remote port collide
    /// and the second fails with `AlreadyInUse`.
    pub fn connect(
        &self,
        pri: Priority,
        local: u16,
        dest: u16,
        dport: u8,
        flags: HeaderFlags,
        now: u64,
    ) -> Result<ConnHandle, CspError> {
        let mut idout = CspId::new(pri, local, dest, dport, CONNECT_SOURCE_PORT);
        idout.flags = flags;
        let idin = CspId::new(pri, dest, local, CONNECT_SOURCE_PORT, dport);
        self.allocate(idin, idout, ConnKind::Client, now)
    }

    /// Slot behind `handle`, whatever its current state.
    pub fn slot(&self, handle: ConnHandle) -> Result<&ConnSlot, CspError> {
        self.slots
            .get(handle.index as usize)
            .ok_or(CspError::InvalidArgument)
    }

    /// Locked record of a live connection.
    pub fn lock(&self, handle: ConnHandle) -> Result<MutexGuard<'_, ConnRecord>, CspError> {
        let rec = self.slot(handle)?.record.lock();
        if rec.is_live(handle) {
            Ok(rec)
        } else {
            Err(CspError::InvalidArgument)
        }
    }

    /// Run `f` on the record of a live connection.
    pub fn with_record<R>(
        &self,
        handle: ConnHandle,
        f: impl FnOnce(&mut ConnRecord) -> R,
    ) -> Result<R, CspError> {
        let mut rec = self.lock(handle)?;
        Ok(f(&mut rec))
    }

    pub fn is_open(&self, handle: ConnHandle) -> bool {
        self.lock(handle).is_ok()
    }

    /// Queue a packet for the application. Hands it back when the queue is
    /// full or the handle is stale.
    ///
    /// The push happens under the record lock so it cannot land after a
    /// concurrent `close` has drained the queue.
    pub fn enqueue(&self, handle: ConnHandle, packet: PacketBuf) -> Result<(), PacketBuf> {
        let Ok(slot) = self.slot(handle) else {
            return Err(packet);
        };
        let rec = slot.record.lock();
        if !rec.is_live(handle) {
            return Err(packet);
        }
        slot.rx.try_push(packet)
    }

    /// Next received packet, waiting up to `timeout` (`None` waits forever).
    /// An expired wait yields `Ok(None)`.
    pub fn read(
        &self,
        handle: ConnHandle,
        timeout: Option<Duration>,
    ) -> Result<Option<PacketBuf>, CspError> {
        let slot = self.slot(handle)?;
        if !slot.record.lock().is_live(handle) {
            return Err(CspError::InvalidArgument);
        }
        Ok(slot.rx.pop(timeout))
    }

    /// Block until `ready` holds for the record, the connection closes or
    /// `timeout` expires. `ready` sees the locked record.
    pub fn wait_for(
        &self,
        handle: ConnHandle,
        timeout: Duration,
        mut ready: impl FnMut(&mut ConnRecord) -> bool,
    ) -> Result<(), CspError> {
        let slot = self.slot(handle)?;
        let deadline = Instant::now() + timeout;
        let mut rec = slot.record.lock();
        loop {
            if !rec.is_live(handle) {
                return Err(CspError::Reset);
            }
            if ready(&mut rec) {
                return Ok(());
            }
            if slot.changed.wait_until(&mut rec, deadline).timed_out() {
                return if rec.is_live(handle) && ready(&mut rec) {
                    Ok(())
                } else {
                    Err(CspError::TimedOut)
                };
            }
        }
    }

    pub fn notify(&self, handle: ConnHandle) {
        if let Ok(slot) = self.slot(handle) {
            slot.changed.notify_all();
        }
    }

    /// Store a partially reassembled message on the connection, returning
    /// the one it replaces.
    pub fn attach_reassembly(
        &self,
        handle: ConnHandle,
        buf: PacketBuf,
    ) -> Result<Option<PacketBuf>, CspError> {
        self.with_record(handle, |rec| rec.reassembly.replace(buf))
    }

    pub fn take_reassembly(&self, handle: ConnHandle) -> Result<Option<PacketBuf>, CspError> {
        self.with_record(handle, |rec| rec.reassembly.take())
    }

    /// Release a connection: free queued packets, any reassembly buffer and
    /// RDP state, and mark the slot closed.
    pub fn close(&self, handle: ConnHandle) -> Result<(), CspError> {
        let slot = self.slot(handle)?;
        let mut rec = slot.record.lock();
        if !rec.is_live(handle) {
            return Err(CspError::InvalidArgument);
        }

        let drained = slot.rx.clear();
        if rec.reassembly.take().is_some() {
            tracing::warn!(%handle, "closing connection with a partially reassembled message");
        }
        rec.rdp = None;
        rec.dest_socket = None;
        rec.state = ConnState::Closed;
        drop(rec);

        slot.changed.notify_all();
        tracing::debug!(%handle, drained, "connection closed");
        Ok(())
    }

    /// Handle of the connection in slot `index`, if it is open.
    pub fn handle_at(&self, index: usize) -> Option<ConnHandle> {
        let rec = self.slots.get(index)?.record.lock();
        (rec.state == ConnState::Open).then(|| ConnHandle {
            index: index as u16,
            generation: rec.generation,
        })
    }

    pub fn snapshot(&self, now: u64) -> Vec<ConnInfo> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let rec = slot.record.lock();
                if rec.state != ConnState::Open {
                    return None;
                }
                Some(ConnInfo {
                    handle: ConnHandle {
                        index: index as u16,
                        generation: rec.generation,
                    },
                    kind: rec.kind.unwrap_or(ConnKind::Client),
                    idin: rec.idin,
                    idout: rec.idout,
                    policy: rec.policy,
                    rx_queued: slot.rx.len(),
                    rdp: rec.rdp.as_ref().map(|r| r.stats()),
                    age_ms: now.saturating_sub(rec.opened_at),
                })
            })
            .collect()
    }
}
