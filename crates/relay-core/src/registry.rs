//! Channel subscription registry for relay.
//!
//! The registry indexes subscription edges both ways: channel to subscribers
//! for fan-out, and connection to channels for teardown. Both indices sit
//! behind a single lock so no reader ever sees them disagree.

use relay_protocol::{codec, ServerFrame};
use relay_transport::{Connection, ConnectionId};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, trace, warn};

/// A channel identifier.
pub type ChannelId = String;

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Whether to drop a channel's entry once its last subscriber leaves.
    pub prune_empty_channels: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prune_empty_channels: true,
        }
    }
}

/// Per-connection record, created at register and destroyed at teardown.
struct ConnectionEntry {
    handle: Arc<dyn Connection>,
    channels: HashSet<ChannelId>,
}

#[derive(Default)]
struct Indices {
    /// Channel name to subscribed connections.
    channels: HashMap<ChannelId, HashSet<ConnectionId>>,
    /// Connection to its record, including the channels it joined.
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

impl Indices {
    /// Remove `connection_id` from a channel's subscriber set.
    fn detach(&mut self, channel: &str, connection_id: &ConnectionId, prune: bool) {
        if let Some(subscribers) = self.channels.get_mut(channel) {
            subscribers.remove(connection_id);

            if prune && subscribers.is_empty() {
                self.channels.remove(channel);
                debug!(channel = %channel, "Deleted empty channel");
            }
        }
    }
}

/// The subscription registry.
///
/// Every operation takes the lock once, so subscribe, unsubscribe, publish
/// and teardown are serialized against each other.
pub struct Registry {
    indices: RwLock<Indices>,
    config: RegistryConfig,
}

impl Registry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating registry with config: {:?}", config);
        Self {
            indices: RwLock::new(Indices::default()),
            config,
        }
    }

    // No operation panics while holding the lock, so a poisoned lock still
    // guards consistent indices.
    fn read(&self) -> RwLockReadGuard<'_, Indices> {
        self.indices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices> {
        self.indices.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new connection with no subscriptions.
    ///
    /// Returns `false` if the connection was already registered, in which
    /// case its existing subscriptions are kept.
    pub fn register(&self, connection: Arc<dyn Connection>) -> bool {
        let mut indices = self.write();

        match indices.connections.entry(connection.id().clone()) {
            Entry::Occupied(entry) => {
                warn!(connection = %entry.key(), "Connection already registered");
                false
            }
            Entry::Vacant(entry) => {
                debug!(connection = %entry.key(), "Registered connection");
                entry.insert(ConnectionEntry {
                    handle: connection,
                    channels: HashSet::new(),
                });
                true
            }
        }
    }

    /// Subscribe a connection to a channel.
    ///
    /// Any string is a valid channel name. Returns `true` if a new
    /// subscription was created; subscribing twice is a no-op, as is
    /// subscribing a connection that was never registered.
    pub fn subscribe(&self, connection_id: &ConnectionId, channel: &str) -> bool {
        let mut guard = self.write();
        let indices = &mut *guard;

        let Some(entry) = indices.connections.get_mut(connection_id) else {
            warn!(connection = %connection_id, channel = %channel, "Subscribe from unregistered connection");
            return false;
        };

        if !entry.channels.insert(channel.to_string()) {
            trace!(connection = %connection_id, channel = %channel, "Already subscribed");
            return false;
        }

        let subscribers = indices
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| {
                debug!(channel = %channel, "Creating new channel");
                HashSet::new()
            });
        subscribers.insert(connection_id.clone());

        debug!(
            channel = %channel,
            connection = %connection_id,
            subscribers = subscribers.len(),
            "Subscribed"
        );

        true
    }

    /// Unsubscribe a connection from a channel.
    ///
    /// Returns `true` if a subscription was removed; removing one that does
    /// not exist is a no-op.
    pub fn unsubscribe(&self, connection_id: &ConnectionId, channel: &str) -> bool {
        let mut indices = self.write();

        let removed = indices
            .connections
            .get_mut(connection_id)
            .is_some_and(|entry| entry.channels.remove(channel));

        if removed {
            indices.detach(channel, connection_id, self.config.prune_empty_channels);
            debug!(channel = %channel, connection = %connection_id, "Unsubscribed");
        }

        removed
    }

    /// Publish a payload to every current subscriber of a channel.
    ///
    /// The recipients are fixed when the call starts. Connections that are
    /// not open are skipped and stay registered; a failed send to one
    /// subscriber does not stop delivery to the rest. Publishing to a channel
    /// without subscribers is a no-op.
    ///
    /// Returns the number of subscribers the message was handed to.
    pub fn publish(&self, channel: &str, payload: Option<Value>) -> usize {
        let recipients: Vec<Arc<dyn Connection>> = {
            let indices = self.read();
            match indices.channels.get(channel) {
                Some(subscribers) if !subscribers.is_empty() => subscribers
                    .iter()
                    .filter_map(|id| indices.connections.get(id))
                    .map(|entry| Arc::clone(&entry.handle))
                    .collect(),
                _ => {
                    trace!(channel = %channel, "Publish to channel without subscribers");
                    return 0;
                }
            }
        };

        let data = match codec::encode(&ServerFrame::message(channel, payload)) {
            Ok(data) => data,
            Err(e) => {
                warn!(channel = %channel, error = %e, "Failed to encode channel message");
                return 0;
            }
        };

        let mut delivered = 0;
        for connection in &recipients {
            if !connection.is_open() {
                trace!(channel = %channel, connection = %connection.id(), "Skipping closed subscriber");
                continue;
            }

            match connection.send_raw(Arc::clone(&data)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(channel = %channel, connection = %connection.id(), error = %e, "Delivery failed");
                }
            }
        }

        trace!(channel = %channel, recipients = delivered, "Published message");
        delivered
    }

    /// Remove a connection from every channel and discard its record.
    ///
    /// Returns the channels it was subscribed to. Tearing down an unknown or
    /// already removed connection is a no-op.
    pub fn teardown(&self, connection_id: &ConnectionId) -> Vec<ChannelId> {
        let mut indices = self.write();

        let Some(entry) = indices.connections.remove(connection_id) else {
            trace!(connection = %connection_id, "Teardown of unknown connection");
            return Vec::new();
        };

        let channels: Vec<ChannelId> = entry.channels.into_iter().collect();
        for channel in &channels {
            indices.detach(channel, connection_id, self.config.prune_empty_channels);
        }

        debug!(
            connection = %connection_id,
            channels = channels.len(),
            "Unsubscribed from all channels"
        );

        channels
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let indices = self.read();
        RegistryStats {
            channel_count: indices.channels.len(),
            connection_count: indices.connections.len(),
            total_subscriptions: indices.connections.values().map(|e| e.channels.len()).sum(),
        }
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn is_registered(&self, connection_id: &ConnectionId) -> bool {
        self.read().connections.contains_key(connection_id)
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn channel_exists(&self, channel: &str) -> bool {
        self.read().channels.contains_key(channel)
    }

    /// Get the subscriber count for a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.read().channels.get(channel).map_or(0, HashSet::len)
    }

    /// Get the connections subscribed to a channel.
    #[must_use]
    pub fn subscribers(&self, channel: &str) -> Vec<ConnectionId> {
        self.read()
            .channels
            .get(channel)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get the channels a connection is subscribed to.
    #[must_use]
    pub fn connection_channels(&self, connection_id: &ConnectionId) -> Vec<ChannelId> {
        self.read()
            .connections
            .get(connection_id)
            .map(|e| e.channels.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get all channel names.
    #[must_use]
    pub fn channel_names(&self) -> Vec<ChannelId> {
        self.read().channels.keys().cloned().collect()
    }

    /// Check that the forward and reverse indices describe the same edges.
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let indices = self.read();

        let forward = indices
            .channels
            .iter()
            .flat_map(|(channel, subs)| subs.iter().map(move |id| (channel.clone(), id.clone())));
        let reverse = indices.connections.iter().flat_map(|(id, entry)| {
            entry
                .channels
                .iter()
                .map(move |channel| (channel.clone(), id.clone()))
        });

        let forward: HashSet<_> = forward.collect();
        let reverse: HashSet<_> = reverse.collect();
        forward == reverse
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of channels with an entry.
    pub channel_count: usize,
    /// Number of registered connections.
    pub connection_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
}
