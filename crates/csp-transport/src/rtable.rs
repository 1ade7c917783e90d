//! Static route table with longest-prefix match.

/// Route to a subnet through an interface, optionally via a next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub address: u16,
    /// Prefix length in bits; 0 is the default route.
    pub netmask: u32,
    pub iface: u8,
    /// Next-hop address on the link. `None` sends straight to the
    /// destination address.
    pub via: Option<u16>,
}

#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<Route>,
    addr_bits: u32,
}

impl RouteTable {
    pub fn new(addr_bits: u32) -> Self {
        Self {
            routes: Vec::new(),
            addr_bits,
        }
    }

    fn net_mask(&self, netmask: u32) -> u16 {
        let host_bits = self.addr_bits.saturating_sub(netmask);
        !(((1u32 << host_bits) - 1) as u16)
    }

    /// Add a route, replacing any with the same address and netmask.
    pub fn set(&mut self, route: Route) {
        let net = self.net_mask(route.netmask);
        let route = Route {
            address: route.address & net,
            ..route
        };
        match self
            .routes
            .iter_mut()
            .find(|r| r.address == route.address && r.netmask == route.netmask)
        {
            Some(existing) => *existing = route,
            None => self.routes.push(route),
        }
        tracing::debug!(address = route.address, netmask = route.netmask, iface = route.iface, "route set");
    }

    pub fn remove(&mut self, address: u16, netmask: u32) -> Option<Route> {
        let address = address & self.net_mask(netmask);
        let pos = self
            .routes
            .iter()
            .position(|r| r.address == address && r.netmask == netmask)?;
        Some(self.routes.remove(pos))
    }

    /// Most specific route covering `dst`.
    pub fn lookup(&self, dst: u16) -> Option<Route> {
        self.routes
            .iter()
            .filter(|r| dst & self.net_mask(r.netmask) == r.address)
            .max_by_key(|r| r.netmask)
            .copied()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }
}
