//! The node's network stack and its caller-facing API.
//!
//! A [`Stack`] owns every shared table. Link drivers feed it through
//! [`Stack::input`], one thread drives [`Stack::route_work`] in a loop, and
//! application threads use the socket and connection calls here. All
//! calls take `&self`; share the stack behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use csp_core::constants::Priority;
use csp_core::integrity::HmacKey;
use csp_core::{AddressMode, ConnectOptions, CspError, CspId, HeaderFlags, SocketOptions};
use csp_protocol::rdp::{RdpConnection, RdpOptions, RdpState};

use crate::buffer::{BufferPool, PacketBuf, SharedPacket};
use crate::clock::{Clock, MonotonicClock};
use crate::config::{Capabilities, StackConfig};
use crate::conn::{ConnHandle, ConnInfo, ConnTable};
use crate::dedup::DedupFilter;
use crate::error::StackError;
use crate::hooks::{NoopHooks, StackHooks};
use crate::iface::{Counter, CounterSnapshot, Interface, InterfaceList, LinkDriver, LoopbackDriver};
use crate::port::{PortTable, PortTarget};
use crate::promisc::PromiscTap;
use crate::queue::BoundedQueue;
use crate::reliable::ConnIo;
use crate::rtable::{Route, RouteTable};
use crate::socket::{Socket, SocketItem};

/// Drop counters not tied to an interface.
#[derive(Debug, Default)]
pub struct GlobalCounters {
    /// Packets or connections lost to a full socket or connection queue.
    pub conn_overflow: Counter,
    /// Server connections refused for lack of a free slot.
    pub conn_out_of_slots: Counter,
}

pub struct Stack {
    pub(crate) config: StackConfig,
    pub(crate) mode: AddressMode,
    pub(crate) address: u16,
    pub(crate) caps: Capabilities,
    pub(crate) pool: BufferPool,
    pub(crate) inbound: Arc<BoundedQueue<PacketBuf>>,
    pub(crate) ports: PortTable,
    pub(crate) conns: ConnTable,
    pub(crate) dedup: Mutex<DedupFilter>,
    pub(crate) ifaces: InterfaceList,
    pub(crate) rtable: RwLock<RouteTable>,
    pub(crate) promisc: PromiscTap,
    pub(crate) hooks: Arc<dyn StackHooks>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) hmac_key: HmacKey,
    /// Parameters new RDP connections start from.
    pub(crate) rdp_opts: RwLock<RdpOptions>,
    pub(crate) counters: GlobalCounters,
    started_at: u64,
}

impl Stack {
    pub fn new(config: StackConfig) -> Result<Self, StackError> {
        Self::with_parts(config, Arc::new(MonotonicClock::new()), Arc::new(NoopHooks))
    }

    /// Build a stack with an explicit clock and platform hooks.
    pub fn with_parts(
        config: StackConfig,
        clock: Arc<dyn Clock>,
        hooks: Arc<dyn StackHooks>,
    ) -> Result<Self, StackError> {
        config.validate()?;
        let mode = config.address_mode();
        let hmac_key = config.hmac_key()?;

        let inbound = Arc::new(BoundedQueue::new(config.inbound_queue_len));
        let ifaces = InterfaceList::new(mode);
        let loopback = LoopbackDriver::new(Arc::clone(&inbound));
        ifaces.add(LoopbackDriver::NAME, config.address, 0, Arc::new(loopback))?;

        let started_at = clock.now_ms();
        tracing::info!(
            address = config.address,
            hostname = %config.hostname,
            ?mode,
            buffers = config.buffer_count,
            connections = config.conn_count,
            "stack initialised"
        );

        Ok(Self {
            mode,
            address: config.address,
            caps: config.capabilities,
            pool: BufferPool::new(config.buffer_count, config.buffer_reserve),
            inbound,
            ports: PortTable::new(),
            conns: ConnTable::new(config.conn_count, config.conn_rx_queue_len, mode),
            dedup: Mutex::new(DedupFilter::new()),
            ifaces,
            rtable: RwLock::new(RouteTable::new(mode.address_bits())),
            promisc: PromiscTap::new(config.promisc_queue_len),
            hooks,
            clock,
            hmac_key,
            rdp_opts: RwLock::new(config.rdp),
            counters: GlobalCounters::default(),
            started_at,
            config,
        })
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn mode(&self) -> AddressMode {
        self.mode
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn hooks(&self) -> &dyn StackHooks {
        self.hooks.as_ref()
    }

    pub fn counters(&self) -> &GlobalCounters {
        &self.counters
    }

    pub fn uptime_ms(&self) -> u64 {
        self.clock.now_ms().saturating_sub(self.started_at)
    }

    // ------------------------------------------------------------------ //
    // Buffers
    // ------------------------------------------------------------------ //

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// A buffer for the application, or `None` when only the reserve is
    /// left.
    pub fn buffer(&self) -> Option<PacketBuf> {
        self.pool.acquire()
    }

    pub fn buffer_remaining(&self) -> usize {
        self.pool.remaining()
    }

    // ------------------------------------------------------------------ //
    // Interfaces and routes
    // ------------------------------------------------------------------ //

    pub fn add_interface(
        &self,
        name: &str,
        address: u16,
        netmask: u32,
        driver: Arc<dyn LinkDriver>,
    ) -> Result<Arc<Interface>, CspError> {
        self.ifaces.add(name, address, netmask, driver)
    }

    pub fn interface(&self, name: &str) -> Option<Arc<Interface>> {
        self.ifaces.by_name(name)
    }

    pub fn interfaces(&self) -> Vec<Arc<Interface>> {
        self.ifaces.all()
    }

    pub fn iface_counters(&self, name: &str) -> Option<CounterSnapshot> {
        self.ifaces.by_name(name).map(|i| i.counters.snapshot())
    }

    pub fn set_route(&self, route: Route) -> Result<(), CspError> {
        if !self.caps.rtable {
            return Err(CspError::NotSupported);
        }
        if self.ifaces.get(route.iface).is_none() || route.netmask > self.mode.address_bits() {
            return Err(CspError::InvalidArgument);
        }
        self.rtable.write().set(route);
        Ok(())
    }

    pub fn remove_route(&self, address: u16, netmask: u32) -> Option<Route> {
        self.rtable.write().remove(address, netmask)
    }

    pub fn routes(&self) -> Vec<Route> {
        self.rtable.read().iter().copied().collect()
    }

    // ------------------------------------------------------------------ //
    // Driver input
    // ------------------------------------------------------------------ //

    /// Queue a received packet for the router. The packet is freed and the
    /// interface's `drop` counter bumped when the queue is full.
    pub fn input(&self, mut packet: PacketBuf, iface: u8) -> Result<(), CspError> {
        let Some(ingress) = self.ifaces.get(iface) else {
            return Err(CspError::InvalidArgument);
        };
        packet.ingress = Some(iface);
        if self.inbound.try_push(packet).is_err() {
            ingress.counters.drop.inc();
            tracing::debug!(iface = ingress.name(), "inbound queue full, packet dropped");
            return Err(CspError::NoBuffers);
        }
        Ok(())
    }

    /// [`Stack::input`] for interrupt context: same effect, never logs.
    pub fn input_from_interrupt(&self, mut packet: PacketBuf, iface: u8) -> Result<(), CspError> {
        let Some(ingress) = self.ifaces.get(iface) else {
            return Err(CspError::InvalidArgument);
        };
        packet.ingress = Some(iface);
        self.inbound.try_push(packet).map_err(|_| {
            ingress.counters.drop.inc();
            CspError::NoBuffers
        })
    }

    /// Parse a raw frame (header, payload and trailers) and queue it.
    pub fn input_frame(&self, frame: &[u8], iface: u8) -> Result<(), CspError> {
        let Some(ingress) = self.ifaces.get(iface) else {
            return Err(CspError::InvalidArgument);
        };
        let Some(mut packet) = self.pool.acquire() else {
            ingress.counters.drop.inc();
            return Err(CspError::NoBuffers);
        };
        if let Err(err) = packet.read_frame(self.mode, frame) {
            ingress.counters.frame.inc();
            tracing::debug!(iface = ingress.name(), %err, "malformed frame");
            return Err(CspError::InvalidArgument);
        }
        self.input(packet, iface)
    }

    // ------------------------------------------------------------------ //
    // Sockets
    // ------------------------------------------------------------------ //

    pub fn socket(&self, opts: SocketOptions) -> Result<Arc<Socket>, CspError> {
        if opts.is_contradictory() {
            return Err(CspError::InvalidArgument);
        }
        if (opts.contains(SocketOptions::RDPREQ) && !self.caps.rdp)
            || (opts.contains(SocketOptions::HMACREQ) && !self.caps.hmac)
        {
            return Err(CspError::NotSupported);
        }
        Ok(Arc::new(Socket::new(opts, self.config.socket_backlog)))
    }

    pub fn bind(&self, socket: &Arc<Socket>, port: u8) -> Result<(), CspError> {
        self.ports.bind(port, PortTarget::Socket(Arc::clone(socket)))
    }

    /// Bind a raw handler. Packets for `port` bypass sockets and
    /// connections and must carry a valid CRC32.
    pub fn bind_callback<F>(&self, port: u8, callback: F) -> Result<(), CspError>
    where
        F: Fn(PacketBuf) + Send + Sync + 'static,
    {
        self.ports.bind(port, PortTarget::Callback(Arc::new(callback)))
    }

    pub fn unbind(&self, port: u8) -> Result<(), CspError> {
        self.ports.unbind(port).map(|_| ())
    }

    /// Set how many ready connections or packets the socket may hold.
    pub fn listen(&self, socket: &Socket, backlog: usize) -> Result<(), CspError> {
        if backlog == 0 {
            return Err(CspError::InvalidArgument);
        }
        socket.set_backlog(backlog);
        Ok(())
    }

    /// Next new connection on a listening socket. `Ok(None)` when the wait
    /// expires.
    pub fn accept(
        &self,
        socket: &Socket,
        timeout: Option<Duration>,
    ) -> Result<Option<ConnHandle>, CspError> {
        if socket.is_connectionless() {
            return Err(CspError::InvalidArgument);
        }
        Ok(socket.wait(timeout).and_then(|item| match item {
            SocketItem::Conn(handle) => Some(handle),
            SocketItem::Packet(_) => None,
        }))
    }

    /// Next packet on a connection-less socket.
    pub fn recvfrom(
        &self,
        socket: &Socket,
        timeout: Option<Duration>,
    ) -> Result<Option<PacketBuf>, CspError> {
        if !socket.is_connectionless() {
            return Err(CspError::InvalidArgument);
        }
        Ok(socket.wait(timeout).and_then(|item| match item {
            SocketItem::Packet(packet) => Some(packet),
            SocketItem::Conn(_) => None,
        }))
    }

    /// Unbind the socket everywhere and close connections still waiting
    /// to be accepted. The router may still hold the socket from an earlier
    /// lookup; its posts are refused from here on.
    pub fn close_socket(&self, socket: &Arc<Socket>) {
        self.ports.unbind_socket(socket);
        for handle in socket.close() {
            let _ = self.close(handle);
        }
    }

    // ------------------------------------------------------------------ //
    // Connections
    // ------------------------------------------------------------------ //

    fn connect_flags(&self, opts: ConnectOptions) -> Result<HeaderFlags, CspError> {
        if opts.as_policy().is_contradictory() {
            return Err(CspError::InvalidArgument);
        }
        let mut flags = HeaderFlags::NONE;
        if opts.contains(ConnectOptions::RDP) {
            if !self.caps.rdp {
                return Err(CspError::NotSupported);
            }
            flags.insert(HeaderFlags::RDP);
        }
        if opts.contains(ConnectOptions::HMAC) {
            if !self.caps.hmac {
                return Err(CspError::NotSupported);
            }
            flags.insert(HeaderFlags::HMAC);
        }
        if opts.contains(ConnectOptions::CRC32) {
            flags.insert(HeaderFlags::CRC32);
        }
        Ok(flags)
    }

    /// Open a connection to `dst:dport`.
    ///
    /// With [`ConnectOptions::RDP`] this runs the handshake and waits up
    /// to `timeout` for it to complete; otherwise it returns at once.
    pub fn connect(
        &self,
        pri: Priority,
        dst: u16,
        dport: u8,
        timeout: Duration,
        opts: ConnectOptions,
    ) -> Result<ConnHandle, CspError> {
        let flags = self.connect_flags(opts)?;
        let now = self.clock.now_ms();
        let handle = self.conns.connect(pri, self.address, dst, dport, flags, now)?;
        self.conns
            .with_record(handle, |rec| rec.policy = opts.as_policy())?;

        if !flags.contains(HeaderFlags::RDP) {
            return Ok(handle);
        }

        let started = {
            let slot = self.conns.slot(handle)?;
            let mut rec = self.conns.lock(handle)?;
            let idout = rec.idout;
            let rdp_opts = *self.rdp_opts.read();
            let mut io = ConnIo::new(self, &slot.rx, idout);
            rec.rdp
                .insert(RdpConnection::new(rdp_opts, now))
                .connect(now, &mut io)
        };
        if let Err(err) = started {
            tracing::debug!(%err, %handle, "rdp: handshake could not start");
            let _ = self.conns.close(handle);
            return Err(err.into());
        }

        // Wait out the handshake; a reset ends it early.
        let settled = self.conns.wait_for(handle, timeout, |rec| {
            rec.rdp
                .as_ref()
                .is_none_or(|rdp| rdp.state() != RdpState::SynSent)
        });
        let established = settled.and_then(|()| {
            self.conns.with_record(handle, |rec| {
                rec.rdp.as_ref().is_some_and(|rdp| rdp.is_open())
            })
        });
        match established {
            Ok(true) => {
                tracing::debug!(%handle, dst, dport, "rdp: connection established");
                Ok(handle)
            }
            Ok(false) => {
                tracing::debug!(%handle, dst, dport, "rdp: handshake reset by peer");
                let _ = self.conns.close(handle);
                Err(CspError::Reset)
            }
            Err(err) => {
                tracing::debug!(%err, %handle, dst, dport, "rdp: handshake failed");
                let _ = self.conns.close(handle);
                Err(err)
            }
        }
    }

    /// Send on a connection. Reliable connections wait up to `timeout` for
    /// room in the send window. The packet is consumed either way.
    pub fn send(
        &self,
        handle: ConnHandle,
        mut packet: PacketBuf,
        timeout: Duration,
    ) -> Result<(), CspError> {
        let (idout, reliable) = self
            .conns
            .with_record(handle, |rec| (rec.idout, rec.rdp.is_some()))?;

        if !reliable {
            packet.id = idout;
            return self.send_direct(packet);
        }

        self.conns.wait_for(handle, timeout, |rec| {
            rec.rdp
                .as_ref()
                .is_none_or(|rdp| rdp.can_send() || !rdp.is_open())
        })?;

        let slot = self.conns.slot(handle)?;
        let mut rec = self.conns.lock(handle)?;
        let mut io = ConnIo::new(self, &slot.rx, idout);
        let Some(rdp) = rec.rdp.as_mut() else {
            return Err(CspError::Reset);
        };
        let now = self.clock.now_ms();
        rdp.send(packet, now, &mut io).map_err(CspError::from)
    }

    /// Send one packet without a connection.
    pub fn sendto(
        &self,
        pri: Priority,
        dst: u16,
        dport: u8,
        sport: u8,
        opts: ConnectOptions,
        mut packet: PacketBuf,
    ) -> Result<(), CspError> {
        if opts.contains(ConnectOptions::RDP) {
            return Err(CspError::NotSupported);
        }
        let mut id = CspId::new(pri, self.address, dst, dport, sport);
        id.flags = self.connect_flags(opts)?;
        packet.id = id;
        self.send_direct(packet)
    }

    /// Next packet received on the connection, waiting up to `timeout`.
    pub fn read(
        &self,
        handle: ConnHandle,
        timeout: Option<Duration>,
    ) -> Result<Option<PacketBuf>, CspError> {
        self.conns.read(handle, timeout)
    }

    /// Close a connection.
    ///
    /// A reliable connection is first taken through the reset handshake;
    /// the router releases its slot when the peer answers or the close
    /// wait expires. Closing a handle the router already released is not
    /// an error.
    pub fn close(&self, handle: ConnHandle) -> Result<(), CspError> {
        let Ok(slot) = self.conns.slot(handle) else {
            return Err(CspError::InvalidArgument);
        };
        let Ok(mut rec) = self.conns.lock(handle) else {
            tracing::trace!(%handle, "close on a released connection");
            return Ok(());
        };
        let idout = rec.idout;
        let release_now = match rec.rdp.as_mut() {
            Some(rdp) => {
                let mut io = ConnIo::new(self, &slot.rx, idout);
                rdp.close(self.clock.now_ms(), &mut io)
            }
            None => true,
        };
        drop(rec);

        if release_now {
            self.conns.close(handle)
        } else {
            self.conns.notify(handle);
            Ok(())
        }
    }

    pub fn is_open(&self, handle: ConnHandle) -> bool {
        self.conns.is_open(handle)
    }

    /// Identity of the remote end, as `(address, port)`.
    pub fn peer(&self, handle: ConnHandle) -> Result<(u16, u8), CspError> {
        self.conns
            .with_record(handle, |rec| (rec.idout.dst, rec.idout.dport))
    }

    /// The local port a connection was opened on.
    pub fn local_port(&self, handle: ConnHandle) -> Result<u8, CspError> {
        self.conns.with_record(handle, |rec| rec.idout.sport)
    }

    pub fn connections(&self) -> Vec<ConnInfo> {
        self.conns.snapshot(self.clock.now_ms())
    }

    /// Store a partially reassembled message on a connection. It is freed
    /// with the connection if never taken back.
    pub fn attach_reassembly(
        &self,
        handle: ConnHandle,
        buf: PacketBuf,
    ) -> Result<Option<PacketBuf>, CspError> {
        self.conns.attach_reassembly(handle, buf)
    }

    pub fn take_reassembly(&self, handle: ConnHandle) -> Result<Option<PacketBuf>, CspError> {
        self.conns.take_reassembly(handle)
    }

    // ------------------------------------------------------------------ //
    // RDP tuning
    // ------------------------------------------------------------------ //

    pub fn rdp_get_opt(&self) -> RdpOptions {
        *self.rdp_opts.read()
    }

    /// Replace the parameters used by connections opened from now on.
    /// The window may not exceed the connection receive queue.
    pub fn rdp_set_opt(&self, opts: RdpOptions) -> Result<(), CspError> {
        opts.validate().map_err(CspError::from)?;
        if opts.window_size as usize > self.config.conn_rx_queue_len {
            tracing::debug!(window = opts.window_size, rx_queue = self.config.conn_rx_queue_len, "rdp: window wider than receive queue");
            return Err(CspError::InvalidArgument);
        }
        *self.rdp_opts.write() = opts;
        tracing::info!(
            window = opts.window_size,
            conn_timeout_ms = opts.conn_timeout_ms,
            packet_timeout_ms = opts.packet_timeout_ms,
            delayed_acks = opts.delayed_acks,
            ack_timeout_ms = opts.ack_timeout_ms,
            ack_delay_count = opts.ack_delay_count,
            "rdp: options updated"
        );
        Ok(())
    }

    // ------------------------------------------------------------------ //
    // Promiscuous tap
    // ------------------------------------------------------------------ //

    pub fn promisc_enable(&self, on: bool) -> Result<(), CspError> {
        if !self.caps.promisc {
            return Err(CspError::NotSupported);
        }
        self.promisc.set_enabled(on);
        Ok(())
    }

    pub fn promisc_read(&self, timeout: Option<Duration>) -> Option<SharedPacket> {
        self.promisc.read(timeout)
    }
}
