//! Fixed-count packet buffer pool.
//!
//! Slots are allocated once at start-up and recycled through an atomic
//! reference count, so acquiring and releasing never lock and never
//! allocate. That makes every operation here usable from interrupt context;
//! the `*_from_interrupt` variants differ only in that they never log.
//!
//! A [`PacketBuf`] is the single owner of a slot and may mutate it. Turning
//! it into a [`SharedPacket`] allows read-only handles to be cloned (each
//! clone retains the slot once more). The slot returns to the pool when the
//! last handle is dropped.
//!
//! `reserve` slots are held back from [`BufferPool::acquire`]: only the
//! `acquire_or_abort` paths may take the pool below that mark.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering, fence};

use csp_core::Packet;

/// Which execution context an allocation is made from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecContext {
    Task,
    Interrupt,
}

struct Slot {
    refs: AtomicU32,
    packet: UnsafeCell<Packet>,
}

// SAFETY: the packet cell is only dereferenced by `claim` and through a
// `SlotRef`. A `PacketBuf`, the only handle that hands out `&mut Packet`,
// exists only while it holds the slot's sole reference: it is created
// either by the 0 -> 1 compare-exchange in `claim` or by
// `SharedPacket::try_into_exclusive` consuming the last shared handle.
// `SharedPacket` handles only hand out `&Packet`.
unsafe impl Sync for Slot {}

struct PoolInner {
    slots: Box<[Slot]>,
    free: AtomicUsize,
    reserve: usize,
    cursor: AtomicUsize,
}

impl PoolInner {
    /// Claim a free slot, leaving at least `keep` slots free.
    fn claim(&self, keep: usize) -> Option<usize> {
        let mut free = self.free.load(Ordering::Acquire);
        loop {
            if free <= keep {
                return None;
            }
            match self.free.compare_exchange_weak(
                free,
                free - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => free = actual,
            }
        }

        // The counter guarantees an unclaimed slot exists; find it.
        let n = self.slots.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        let mut i = 0usize;
        loop {
            let index = (start + i) % n;
            let slot = &self.slots[index];
            if slot
                .refs
                .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: refs went 0 -> 1 above, so no handle to this slot
                // exists. The Acquire exchange pairs with the Release
                // decrement of the previous owner's last handle.
                unsafe { (*slot.packet.get()).reset() };
                return Some(index);
            }
            i = i.wrapping_add(1);
        }
    }

    fn retain(&self, index: usize) {
        self.slots[index].refs.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&self, index: usize) {
        if self.slots[index].refs.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            self.free.fetch_add(1, Ordering::Release);
        }
    }
}

/// Handle to the shared pool; cheap to clone.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(count: usize, reserve: usize) -> Self {
        let slots = (0..count)
            .map(|_| Slot {
                refs: AtomicU32::new(0),
                packet: UnsafeCell::new(Packet::new()),
            })
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                slots,
                free: AtomicUsize::new(count),
                reserve,
                cursor: AtomicUsize::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn reserve(&self) -> usize {
        self.inner.reserve
    }

    /// Free slots, including the reserve.
    pub fn remaining(&self) -> usize {
        self.inner.free.load(Ordering::Acquire)
    }

    fn wrap(&self, index: usize) -> PacketBuf {
        PacketBuf(SlotRef {
            pool: Arc::clone(&self.inner),
            index,
        })
    }

    /// Take a buffer unless only the reserve is left. Never blocks.
    pub fn acquire_in(&self, ctx: ExecContext) -> Option<PacketBuf> {
        match self.inner.claim(self.inner.reserve) {
            Some(index) => Some(self.wrap(index)),
            None => {
                if ctx == ExecContext::Task {
                    tracing::debug!(
                        remaining = self.remaining(),
                        reserve = self.inner.reserve,
                        "buffer pool: no buffer available"
                    );
                }
                None
            }
        }
    }

    pub fn acquire(&self) -> Option<PacketBuf> {
        self.acquire_in(ExecContext::Task)
    }

    pub fn acquire_from_interrupt(&self) -> Option<PacketBuf> {
        self.acquire_in(ExecContext::Interrupt)
    }

    /// Take any free buffer, reserve included, or terminate the process.
    ///
    /// Only for paths that have no way to report an allocation failure.
    pub fn acquire_or_abort_in(&self, ctx: ExecContext) -> PacketBuf {
        match self.inner.claim(0) {
            Some(index) => self.wrap(index),
            None => {
                if ctx == ExecContext::Task {
                    tracing::error!(
                        capacity = self.capacity(),
                        "buffer pool exhausted on a path that cannot fail, aborting"
                    );
                }
                std::process::abort()
            }
        }
    }

    pub fn acquire_or_abort(&self) -> PacketBuf {
        self.acquire_or_abort_in(ExecContext::Task)
    }

    pub fn acquire_or_abort_from_interrupt(&self) -> PacketBuf {
        self.acquire_or_abort_in(ExecContext::Interrupt)
    }

    /// A fresh buffer holding a copy of `src`.
    pub fn clone_packet(&self, src: &Packet) -> Option<PacketBuf> {
        let mut buf = self.acquire()?;
        buf.copy_from(src);
        Some(buf)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity())
            .field("remaining", &self.remaining())
            .field("reserve", &self.inner.reserve)
            .finish()
    }
}

/// One counted reference to a slot; dropping it releases once.
struct SlotRef {
    pool: Arc<PoolInner>,
    index: usize,
}

impl SlotRef {
    fn cell(&self) -> *mut Packet {
        self.pool.slots[self.index].packet.get()
    }

    fn refs(&self) -> u32 {
        self.pool.slots[self.index].refs.load(Ordering::Acquire)
    }
}

impl Drop for SlotRef {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

/// Exclusively owned packet buffer.
pub struct PacketBuf(SlotRef);

impl PacketBuf {
    /// Return the buffer to the pool. Same as dropping it.
    pub fn release(self) {}

    /// Give up exclusive access in exchange for cloneable read-only handles.
    pub fn into_shared(self) -> SharedPacket {
        SharedPacket(self.0)
    }

    pub fn slot(&self) -> usize {
        self.0.index
    }
}

impl Deref for PacketBuf {
    type Target = Packet;

    fn deref(&self) -> &Packet {
        // SAFETY: a PacketBuf holds the slot's only reference (see the
        // `Sync` impl on `Slot`), so no `&mut` to the packet can coexist.
        unsafe { &*self.0.cell() }
    }
}

impl DerefMut for PacketBuf {
    fn deref_mut(&mut self) -> &mut Packet {
        // SAFETY: sole reference as above, and `&mut self` keeps this
        // borrow unique among borrows of this handle.
        unsafe { &mut *self.0.cell() }
    }
}

impl fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuf")
            .field("slot", &self.0.index)
            .field("packet", &**self)
            .finish()
    }
}

/// Read-only, reference-counted packet handle. `clone` retains the slot.
pub struct SharedPacket(SlotRef);

impl SharedPacket {
    pub fn retain(&self) -> SharedPacket {
        self.0.pool.retain(self.0.index);
        SharedPacket(SlotRef {
            pool: Arc::clone(&self.0.pool),
            index: self.0.index,
        })
    }

    pub fn ref_count(&self) -> u32 {
        self.0.refs()
    }

    /// Regain exclusive access if this is the last handle.
    pub fn try_into_exclusive(self) -> Result<PacketBuf, SharedPacket> {
        // A count of 1 is stable here: new handles only come from cloning
        // an existing one, and `self`, the sole remaining handle, is owned
        // by this call. The Acquire load in `refs` pairs with the Release
        // decrements of the dropped handles, so their reads are finished.
        if self.0.refs() == 1 {
            Ok(PacketBuf(self.0))
        } else {
            Err(self)
        }
    }
}

impl Clone for SharedPacket {
    fn clone(&self) -> Self {
        self.retain()
    }
}

impl Deref for SharedPacket {
    type Target = Packet;

    fn deref(&self) -> &Packet {
        // SAFETY: a slot never has a PacketBuf and a SharedPacket at once.
        // `into_shared` consumes the PacketBuf, and `try_into_exclusive`
        // consumes the last SharedPacket. Only `&Packet` is handed out here.
        unsafe { &*self.0.cell() }
    }
}

impl fmt::Debug for SharedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPacket")
            .field("slot", &self.0.index)
            .field("refs", &self.0.refs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn n_plus_one_acquire_fails() {
        let pool = BufferPool::new(4, 0);
        let held: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        assert!(pool.acquire().is_none());
        assert_eq!(pool.remaining(), 0);
        drop(held);
        assert_eq!(pool.remaining(), 4);
    }

    #[test]
    fn reserve_is_kept_from_plain_acquire() {
        let pool = BufferPool::new(5, 2);
        let held: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        assert!(pool.acquire().is_none());
        assert_eq!(pool.remaining(), 2);

        let a = pool.acquire_or_abort();
        let b = pool.acquire_or_abort_from_interrupt();
        assert_eq!(pool.remaining(), 0);
        drop((a, b, held));
        assert_eq!(pool.remaining(), 5);
    }

    #[test]
    fn interrupt_acquire_honours_reserve() {
        let pool = BufferPool::new(2, 1);
        let a = pool.acquire_from_interrupt();
        assert!(a.is_some());
        assert!(pool.acquire_from_interrupt().is_none());
    }

    #[test]
    fn acquired_buffer_is_reset() {
        let pool = BufferPool::new(1, 0);
        let mut buf = pool.acquire().unwrap();
        buf.set_payload(b"stale").unwrap();
        buf.ingress = Some(3);
        buf.release();

        let buf = pool.acquire().unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.ingress, None);
    }

    #[test]
    fn shared_handles_release_once_each() {
        let pool = BufferPool::new(2, 0);
        let shared = pool.acquire().unwrap().into_shared();
        let second = shared.retain();
        let third = second.clone();
        assert_eq!(shared.ref_count(), 3);
        assert_eq!(pool.remaining(), 1);

        drop(shared);
        drop(second);
        assert_eq!(pool.remaining(), 1);
        let back = third.try_into_exclusive().expect("last handle");
        drop(back);
        assert_eq!(pool.remaining(), 2);
    }

    #[test]
    fn try_into_exclusive_refuses_while_shared() {
        let pool = BufferPool::new(1, 0);
        let a = pool.acquire().unwrap().into_shared();
        let b = a.clone();
        let a = a.try_into_exclusive().unwrap_err();
        drop(b);
        assert!(a.try_into_exclusive().is_ok());
    }

    #[test]
    fn clone_packet_copies_contents() {
        let pool = BufferPool::new(2, 0);
        let mut src = pool.acquire().unwrap();
        src.set_payload(b"copy me").unwrap();
        src.id.dport = 12;
        let copy = pool.clone_packet(&src).unwrap();
        assert_ne!(copy.slot(), src.slot());
        assert_eq!(copy.payload(), b"copy me");
        assert_eq!(copy.id.dport, 12);
        assert!(pool.clone_packet(&src).is_none());
    }

    #[test]
    fn concurrent_acquire_release_balances() {
        let pool = BufferPool::new(8, 0);
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        if let Some(mut buf) = pool.acquire() {
                            buf.set_payload(&[1, 2, 3]).unwrap();
                        }
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(pool.remaining(), 8);
    }
}
