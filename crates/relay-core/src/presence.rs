//! Presence tracking for relay.
//!
//! Presence records when each identity last sent a heartbeat. Identities are
//! independent of connections: a record outlives the connection that
//! refreshed it and is removed only by a sweep once stale.
//!
//! ```text
//! unknown ──heartbeat──▶ fresh ──timeout elapses──▶ stale ──sweep──▶ unknown
//!                          ▲                          │
//!                          └─────────heartbeat────────┘
//! ```

use crate::clock::Timestamp;
use dashmap::DashMap;
use std::time::Duration;
use tracing::{debug, trace};

/// Default heartbeat staleness threshold.
pub const DEFAULT_PRESENCE_TIMEOUT: Duration = Duration::from_millis(6000);

/// Liveness of a single identity at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    /// No heartbeat on record.
    Unknown,
    /// Last heartbeat is younger than the timeout.
    Fresh,
    /// Last heartbeat is at least the timeout old; awaiting the next sweep.
    Stale,
}

/// Heartbeat store keyed by identity.
#[derive(Debug)]
pub struct PresenceTracker {
    /// Identity to timestamp of its latest heartbeat.
    last_seen: DashMap<String, Timestamp>,
    /// Staleness threshold in milliseconds.
    timeout_ms: u64,
}

impl PresenceTracker {
    /// Create a tracker with the given staleness threshold.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_seen: DashMap::new(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// The staleness threshold.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Record a heartbeat for `identity` at `now`.
    ///
    /// Overwrites any earlier timestamp. Returns `true` if the identity was
    /// not tracked before.
    pub fn heartbeat(&self, identity: &str, now: Timestamp) -> bool {
        let is_new = self.last_seen.insert(identity.to_string(), now).is_none();
        if is_new {
            debug!(identity = %identity, "Presence: tracking identity");
        } else {
            trace!(identity = %identity, "Presence: heartbeat");
        }
        is_new
    }

    /// Get the state of `identity` at `now`.
    #[must_use]
    pub fn state(&self, identity: &str, now: Timestamp) -> PresenceState {
        match self.last_seen.get(identity) {
            None => PresenceState::Unknown,
            Some(last_seen) if self.is_expired(*last_seen, now) => PresenceState::Stale,
            Some(_) => PresenceState::Fresh,
        }
    }

    /// Check whether `identity` sent a heartbeat less than the timeout ago.
    ///
    /// Staleness is computed from the stored timestamp, so the answer does
    /// not depend on whether a sweep has run.
    #[must_use]
    pub fn is_online(&self, identity: &str, now: Timestamp) -> bool {
        self.state(identity, now) == PresenceState::Fresh
    }

    /// Check each identity, preserving order, length and duplicates.
    #[must_use]
    pub fn check_online<I, S>(&self, identities: I, now: Timestamp) -> Vec<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        identities
            .into_iter()
            .map(|identity| self.is_online(identity.as_ref(), now))
            .collect()
    }

    /// Remove every identity whose last heartbeat is at least the timeout old.
    ///
    /// Returns the evicted identities.
    pub fn sweep(&self, now: Timestamp) -> Vec<String> {
        let mut evicted = Vec::new();

        self.last_seen.retain(|identity, last_seen| {
            if self.is_expired(*last_seen, now) {
                evicted.push(identity.clone());
                false
            } else {
                true
            }
        });

        for identity in &evicted {
            debug!(identity = %identity, "Presence: evicted stale identity");
        }

        evicted
    }

    /// Get the timestamp of the latest heartbeat for `identity`.
    #[must_use]
    pub fn last_seen(&self, identity: &str) -> Option<Timestamp> {
        self.last_seen.get(identity).map(|entry| *entry)
    }

    /// Number of tracked identities, stale ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    /// Check if no identity is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    fn is_expired(&self, last_seen: Timestamp, now: Timestamp) -> bool {
        now.saturating_sub(last_seen) >= self.timeout_ms
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PRESENCE_TIMEOUT)
    }
}
