//! # relay-transport
//!
//! Transport boundary for the relay server.
//!
//! The core never owns sockets. It holds connections through the
//! [`Connection`] trait, which exposes exactly what fan-out needs: an
//! identity, an open/closed state and a non-blocking send.
//!
//! [`QueuedConnection`] is the handle used by the WebSocket server: sends
//! are pushed onto an unbounded queue which a per-connection writer task
//! drains into the socket.
//!
//! ```rust
//! use relay_protocol::ServerFrame;
//! use relay_transport::{Connection, ConnectionId, QueuedConnection};
//!
//! let (conn, mut outbound) = QueuedConnection::new(ConnectionId::generate());
//! conn.send(&ServerFrame::message("room1", None)).unwrap();
//! assert_eq!(&*outbound.try_recv().unwrap(), r#"{"channel":"room1"}"#);
//! ```

pub mod queue;
pub mod traits;

pub use queue::{OutboundQueue, QueuedConnection};
pub use traits::{Connection, ConnectionId, TransportError};
