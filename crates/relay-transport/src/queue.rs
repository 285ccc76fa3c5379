//! Queue-backed connection handle.
//!
//! The WebSocket handler owns the socket; the rest of the server only sees a
//! [`QueuedConnection`], whose sends land on an unbounded queue drained by the
//! connection's writer task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::traits::{Connection, ConnectionId, TransportError};

/// Receiving half of a connection's outbound queue.
pub type OutboundQueue = mpsc::UnboundedReceiver<Arc<str>>;

/// A connection handle backed by an unbounded outbound queue.
#[derive(Debug)]
pub struct QueuedConnection {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<Arc<str>>,
    remote_addr: Option<SocketAddr>,
    is_open: AtomicBool,
}

impl QueuedConnection {
    /// Create a new connection handle and the queue its writer drains.
    #[must_use]
    pub fn new(id: ConnectionId) -> (Self, OutboundQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let conn = Self {
            id,
            sender,
            remote_addr: None,
            is_open: AtomicBool::new(true),
        };
        (conn, receiver)
    }

    /// Attach the peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

impl Connection for QueuedConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send_raw(&self, data: Arc<str>) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        if self.sender.send(data).is_err() {
            // Writer task is gone, so the socket is too.
            self.is_open.store(false, Ordering::SeqCst);
            trace!(connection = %self.id, "Outbound queue closed");
            return Err(TransportError::ConnectionClosed);
        }

        Ok(())
    }

    fn close(&self) {
        self.is_open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst) && !self.sender.is_closed()
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}
