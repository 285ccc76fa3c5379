//! # relay-core
//!
//! Core state and routing for the relay pub/sub server.
//!
//! - **Registry** - Channel subscriptions and fan-out
//! - **Presence** - Heartbeat-driven liveness per identity
//! - **Dispatcher** - Decodes inbound frames and routes them
//! - **Clock** - Millisecond timestamps for presence
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│ Dispatcher  │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │  Presence   │◀────│   Sweeper   │
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! The registry and the presence tracker share no state; only the
//! dispatcher talks to both.

pub mod clock;
pub mod dispatcher;
pub mod presence;
pub mod registry;

pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use dispatcher::{Dispatch, Dispatcher, DispatcherConfig};
pub use presence::{PresenceState, PresenceTracker, DEFAULT_PRESENCE_TIMEOUT};
pub use registry::{ChannelId, Registry, RegistryConfig, RegistryStats};
