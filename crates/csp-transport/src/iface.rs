//! Network interfaces, their counters and the link driver seam.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use csp_core::{AddressMode, CspError};

use crate::buffer::PacketBuf;
use crate::queue::BoundedQueue;

/// Monotonic event counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct IfaceCounters {
    pub tx: Counter,
    pub rx: Counter,
    pub tx_error: Counter,
    pub rx_error: Counter,
    pub drop: Counter,
    pub auth_error: Counter,
    /// Frames that could not be parsed.
    pub frame: Counter,
    pub tx_bytes: Counter,
    pub rx_bytes: Counter,
}

impl IfaceCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            tx: self.tx.get(),
            rx: self.rx.get(),
            tx_error: self.tx_error.get(),
            rx_error: self.rx_error.get(),
            drop: self.drop.get(),
            auth_error: self.auth_error.get(),
            frame: self.frame.get(),
            tx_bytes: self.tx_bytes.get(),
            rx_bytes: self.rx_bytes.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub tx: u64,
    pub rx: u64,
    pub tx_error: u64,
    pub rx_error: u64,
    pub drop: u64,
    pub auth_error: u64,
    pub frame: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

/// Outbound half of a link driver.
///
/// `transmit` takes ownership of the packet whether it succeeds or not.
/// `via` is the next-hop address on the link.
pub trait LinkDriver: Send + Sync {
    fn transmit(&self, packet: PacketBuf, via: u16) -> Result<(), CspError>;
}

pub struct Interface {
    name: String,
    index: u8,
    address: u16,
    /// Network prefix length in bits.
    netmask: u32,
    addr_bits: u32,
    driver: Arc<dyn LinkDriver>,
    pub counters: IfaceCounters,
}

impl Interface {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn netmask(&self) -> u32 {
        self.netmask
    }

    pub fn driver(&self) -> &Arc<dyn LinkDriver> {
        &self.driver
    }

    fn host_mask(&self) -> u16 {
        let host_bits = self.addr_bits.saturating_sub(self.netmask);
        ((1u32 << host_bits) - 1) as u16
    }

    /// Host part of `addr` is all ones.
    pub fn is_broadcast(&self, addr: u16) -> bool {
        let mask = self.host_mask();
        addr & mask == mask
    }

    /// `addr` lies in this interface's subnet.
    pub fn contains(&self, addr: u16) -> bool {
        let net = !self.host_mask();
        addr & net == self.address & net
    }
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("address", &self.address)
            .field("netmask", &self.netmask)
            .finish()
    }
}

/// Registered interfaces, indexed in registration order.
pub struct InterfaceList {
    ifaces: RwLock<Vec<Arc<Interface>>>,
    mode: AddressMode,
}

impl InterfaceList {
    pub fn new(mode: AddressMode) -> Self {
        Self {
            ifaces: RwLock::new(Vec::new()),
            mode,
        }
    }

    pub fn add(
        &self,
        name: &str,
        address: u16,
        netmask: u32,
        driver: Arc<dyn LinkDriver>,
    ) -> Result<Arc<Interface>, CspError> {
        let addr_bits = self.mode.address_bits();
        if address > self.mode.max_address() || netmask > addr_bits {
            return Err(CspError::InvalidArgument);
        }
        let mut ifaces = self.ifaces.write();
        if ifaces.iter().any(|i| i.name == name) {
            return Err(CspError::AlreadyInUse);
        }
        let index = u8::try_from(ifaces.len()).map_err(|_| CspError::NoMemory)?;
        let iface = Arc::new(Interface {
            name: name.to_owned(),
            index,
            address,
            netmask,
            addr_bits,
            driver,
            counters: IfaceCounters::default(),
        });
        ifaces.push(Arc::clone(&iface));
        tracing::info!(name, index, address, netmask, "interface added");
        Ok(iface)
    }

    pub fn get(&self, index: u8) -> Option<Arc<Interface>> {
        self.ifaces.read().get(index as usize).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<Interface>> {
        self.ifaces.read().iter().find(|i| i.name == name).cloned()
    }

    /// Interface owning `address` as its own address.
    pub fn by_address(&self, address: u16) -> Option<Arc<Interface>> {
        self.ifaces.read().iter().find(|i| i.address == address).cloned()
    }

    /// First interface, other than loopback, whose subnet holds `address`.
    pub fn by_subnet(&self, address: u16) -> Option<Arc<Interface>> {
        self.ifaces
            .read()
            .iter()
            .skip(1)
            .find(|i| i.netmask > 0 && i.contains(address))
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<Interface>> {
        self.ifaces.read().clone()
    }
}

/// Loopback link: transmitting puts the packet back on the inbound queue.
pub struct LoopbackDriver {
    inbound: Arc<BoundedQueue<PacketBuf>>,
}

impl LoopbackDriver {
    pub const NAME: &'static str = "LOOP";

    pub fn new(inbound: Arc<BoundedQueue<PacketBuf>>) -> Self {
        Self { inbound }
    }
}

impl LinkDriver for LoopbackDriver {
    fn transmit(&self, mut packet: PacketBuf, _via: u16) -> Result<(), CspError> {
        packet.ingress = Some(0);
        self.inbound
            .try_push(packet)
            .map_err(|_| CspError::NoBuffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDriver;

    impl LinkDriver for NullDriver {
        fn transmit(&self, _packet: PacketBuf, _via: u16) -> Result<(), CspError> {
            Ok(())
        }
    }

    fn list() -> InterfaceList {
        InterfaceList::new(AddressMode::Extended)
    }

    #[test]
    fn broadcast_is_host_part_all_ones() {
        let ifaces = list();
        let can = ifaces.add("CAN", 0x0105, 8, Arc::new(NullDriver)).unwrap();
        // 14 address bits, 8 network bits: host part is the low 6 bits.
        assert!(can.is_broadcast(0x013F));
        assert!(!can.is_broadcast(0x0105));
        assert!(can.contains(0x0110));
        assert!(!can.contains(0x0210));
    }

    #[test]
    fn zero_netmask_only_broadcasts_to_everyone() {
        let ifaces = list();
        let i = ifaces.add("X", 3, 0, Arc::new(NullDriver)).unwrap();
        assert!(i.is_broadcast(AddressMode::Extended.broadcast_address()));
        assert!(!i.is_broadcast(0x3FFE));
    }

    #[test]
    fn duplicate_name_is_refused() {
        let ifaces = list();
        ifaces.add("CAN", 1, 8, Arc::new(NullDriver)).unwrap();
        assert_eq!(
            ifaces.add("CAN", 2, 8, Arc::new(NullDriver)).unwrap_err(),
            CspError::AlreadyInUse
        );
    }

    #[test]
    fn lookups() {
        let ifaces = list();
        ifaces.add(LoopbackDriver::NAME, 1, 0, Arc::new(NullDriver)).unwrap();
        ifaces.add("KISS", 0x0201, 8, Arc::new(NullDriver)).unwrap();
        assert_eq!(ifaces.by_name("KISS").unwrap().index(), 1);
        assert_eq!(ifaces.by_address(1).unwrap().name(), "LOOP");
        assert_eq!(ifaces.by_subnet(0x0233).unwrap().name(), "KISS");
        assert!(ifaces.by_subnet(0x0333).is_none());
        assert!(ifaces.get(2).is_none());
    }

    #[test]
    fn loopback_feeds_inbound_queue() {
        let pool = crate::buffer::BufferPool::new(2, 0);
        let inbound = Arc::new(BoundedQueue::new(1));
        let lo = LoopbackDriver::new(Arc::clone(&inbound));
        lo.transmit(pool.acquire().unwrap(), 0).unwrap();
        assert_eq!(
            lo.transmit(pool.acquire().unwrap(), 0),
            Err(CspError::NoBuffers)
        );
        let looped = inbound.try_pop().unwrap();
        assert_eq!(looped.ingress, Some(0));
        assert_eq!(pool.remaining(), 1);
    }

    #[test]
    fn counters_snapshot() {
        let c = IfaceCounters::default();
        c.rx.inc();
        c.rx_bytes.add(12);
        let s = c.snapshot();
        assert_eq!(s.rx, 1);
        assert_eq!(s.rx_bytes, 12);
        assert_eq!(s.tx, 0);
    }
}
