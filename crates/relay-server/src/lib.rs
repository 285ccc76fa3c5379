//! Relay server library.
//!
//! Exposes the configuration, HTTP/WebSocket handlers and metrics used by the
//! `relay` binary, so the full server can be started in-process.

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{build_app, run_server, serve, AppState};
