//! # relay-protocol
//!
//! Wire protocol definitions for the relay pub/sub server.
//!
//! Every frame is a JSON object sent as a single WebSocket message.
//!
//! ## Client Frames
//!
//! - `subscribe` / `unsubscribe` - Channel membership
//! - `publish` - Broadcast a payload to a channel
//! - `ping` - Heartbeat for an identity
//! - `check_online` - Liveness query for a list of identities
//!
//! ## Server Frames
//!
//! - `{channel, payload}` - A message published to a subscribed channel
//! - `{action: "online_status", payload: {statuses}}` - Liveness reply
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, ClientFrame, ServerFrame};
//!
//! let frame = codec::decode(br#"{"action":"subscribe","channel":"room1"}"#).unwrap();
//! assert_eq!(frame, ClientFrame::subscribe("room1"));
//!
//! let reply = codec::encode(&ServerFrame::online_status(vec![true, false])).unwrap();
//! assert_eq!(&*reply, r#"{"action":"online_status","payload":{"statuses":[true,false]}}"#);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{ClientFrame, Envelope, FrameType, Heartbeat, OnlineQuery, Reply, ServerFrame};
