//! Node runtime: the stack plus the threads that drive it.
//!
//! The router and the service port handler block on the stack's queues, so
//! each runs on a `tokio` blocking thread. The async side only waits for a
//! shutdown signal and periodically logs counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use csp_core::SocketOptions;
use csp_core::constants::PORT_ANY;
use csp_transport::services::service_handler;
use csp_transport::{MonotonicClock, Socket, Stack, StackHooks};

use crate::config::NodeConfig;
use crate::error::NodeError;

/// Cloneable handle that asks a running node to stop.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Reboot and shutdown requests arriving on the service port stop the node.
struct NodeHooks {
    shutdown: ShutdownHandle,
}

impl StackHooks for NodeHooks {
    fn reboot(&self) {
        tracing::warn!("reboot requested over the network, stopping node");
        self.shutdown.shutdown();
    }

    fn shutdown(&self) {
        tracing::warn!("shutdown requested over the network");
        self.shutdown.shutdown();
    }
}

/// A CSP node: one [`Stack`] and the workers driving it.
pub struct Node {
    config: NodeConfig,
    stack: Arc<Stack>,
    running: Arc<AtomicBool>,
    shutdown: ShutdownHandle,
    shutdown_rx: watch::Receiver<bool>,
    service_socket: Option<Arc<Socket>>,
    workers: Vec<JoinHandle<()>>,
}

impl Node {
    /// Create a node from configuration. Nothing runs until [`Node::start`].
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let (tx, shutdown_rx) = watch::channel(false);
        let shutdown = ShutdownHandle { tx: Arc::new(tx) };
        let hooks = Arc::new(NodeHooks {
            shutdown: shutdown.clone(),
        });
        let stack = Stack::with_parts(
            config.stack.clone(),
            Arc::new(MonotonicClock::new()),
            hooks,
        )?;

        Ok(Self {
            config,
            stack: Arc::new(stack),
            running: Arc::new(AtomicBool::new(false)),
            shutdown,
            shutdown_rx,
            service_socket: None,
            workers: Vec::new(),
        })
    }

    pub fn stack(&self) -> &Arc<Stack> {
        &self.stack
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Spawn the router thread and, when enabled, the service thread.
    /// Must be called from within a `tokio` runtime.
    pub fn start(&mut self) -> Result<(), NodeError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyRunning);
        }

        let stack = Arc::clone(&self.stack);
        let running = Arc::clone(&self.running);
        self.workers.push(tokio::task::spawn_blocking(move || {
            router_loop(&stack, &running);
        }));

        if self.config.node.services {
            let socket = self.stack.socket(SocketOptions::NONE)?;
            self.stack.bind(&socket, PORT_ANY)?;

            let stack = Arc::clone(&self.stack);
            let running = Arc::clone(&self.running);
            let served = Arc::clone(&socket);
            let timeout = Duration::from_millis(self.config.node.service_timeout_ms);
            self.workers.push(tokio::task::spawn_blocking(move || {
                service_loop(&stack, &served, &running, timeout);
            }));
            self.service_socket = Some(socket);
        }

        tracing::info!(
            address = self.stack.address(),
            hostname = %self.config.stack.hostname,
            services = self.config.node.services,
            "node started"
        );
        Ok(())
    }

    /// Wait for a shutdown signal, logging counters on the configured
    /// interval.
    pub async fn run(&mut self) {
        let secs = self.config.node.stats_interval;
        let mut stats_interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
        // Don't fire immediately
        stats_interval.tick().await;

        tracing::info!("entering event loop");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    tracing::info!("shutdown signal received");
                    break;
                }

                _ = stats_interval.tick(), if secs > 0 => {
                    self.log_stats();
                }
            }
        }
    }

    /// Stop the workers and release the service socket.
    pub async fn shutdown(mut self) {
        tracing::info!("shutting down node");
        self.shutdown.shutdown();
        self.running.store(false, Ordering::SeqCst);

        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                tracing::warn!("worker thread failed: {e}");
            }
        }
        if let Some(socket) = self.service_socket.take() {
            self.stack.close_socket(&socket);
        }

        self.log_stats();
        tracing::info!("node shutdown complete");
    }

    fn log_stats(&self) {
        for iface in self.stack.interfaces() {
            let c = iface.counters.snapshot();
            tracing::info!(
                iface = iface.name(),
                tx = c.tx,
                rx = c.rx,
                tx_error = c.tx_error,
                rx_error = c.rx_error,
                drop = c.drop,
                auth_error = c.auth_error,
                "interface counters"
            );
        }
        let global = self.stack.counters();
        tracing::info!(
            buffers_free = self.stack.buffer_remaining(),
            connections = self.stack.connections().len(),
            conn_overflow = global.conn_overflow.get(),
            conn_out_of_slots = global.conn_out_of_slots.get(),
            uptime_ms = self.stack.uptime_ms(),
            "stack status"
        );
    }
}

fn router_loop(stack: &Stack, running: &AtomicBool) {
    tracing::debug!("router thread started");
    while running.load(Ordering::Relaxed) {
        let outcome = stack.route_work();
        if outcome.is_dropped() {
            tracing::trace!(?outcome, "router: packet dropped");
        }
    }
    tracing::debug!("router thread stopped");
}

/// Accept connections on the any-port socket and answer service requests
/// until the connection goes quiet for `timeout`.
fn service_loop(stack: &Stack, socket: &Socket, running: &AtomicBool, timeout: Duration) {
    tracing::debug!("service thread started");
    while running.load(Ordering::Relaxed) {
        let conn = match stack.accept(socket, Some(timeout)) {
            Ok(Some(conn)) => conn,
            Ok(None) => continue,
            Err(err) => {
                tracing::error!(%err, "service socket unusable");
                break;
            }
        };
        while let Ok(Some(packet)) = stack.read(conn, Some(timeout)) {
            if !service_handler(stack, conn, packet) {
                tracing::debug!(%conn, port = ?stack.local_port(conn).ok(), "no service on port");
            }
        }
        if let Err(err) = stack.close(conn) {
            tracing::debug!(%err, %conn, "service connection close failed");
        }
    }
    tracing::debug!("service thread stopped");
}
