//! Inbound frame dispatch.
//!
//! The dispatcher is the only component that talks to both the registry and
//! the presence tracker. It decodes each inbound message once, routes the
//! resulting frame, and owns the periodic presence sweep.

use crate::clock::{Clock, MonotonicClock, Timestamp};
use crate::presence::{PresenceTracker, DEFAULT_PRESENCE_TIMEOUT};
use crate::registry::{ChannelId, Registry, RegistryConfig};
use relay_protocol::{codec, ClientFrame, ServerFrame};
use relay_transport::{Connection, ConnectionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Registry configuration.
    pub registry: RegistryConfig,
    /// Heartbeat staleness threshold.
    pub presence_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            presence_timeout: DEFAULT_PRESENCE_TIMEOUT,
        }
    }
}

/// What handling one inbound message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Subscribe handled; `added` is false if the subscription existed.
    Subscribed { added: bool },
    /// Unsubscribe handled; `removed` is false if there was nothing to remove.
    Unsubscribed { removed: bool },
    /// Publish handed to `recipients` open subscribers.
    Published { recipients: usize },
    /// Heartbeat recorded.
    Heartbeat,
    /// Liveness reply sent to the requester.
    OnlineStatus { statuses: Vec<bool> },
    /// Well-formed frame with an unrecognized action.
    Ignored,
    /// Undecodable frame.
    Discarded,
}

impl Dispatch {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Dispatch::Subscribed { .. } => "subscribe",
            Dispatch::Unsubscribed { .. } => "unsubscribe",
            Dispatch::Published { .. } => "publish",
            Dispatch::Heartbeat => "ping",
            Dispatch::OnlineStatus { .. } => "check_online",
            Dispatch::Ignored => "ignored",
            Dispatch::Discarded => "discarded",
        }
    }
}

/// Routes inbound frames to the registry and the presence tracker.
pub struct Dispatcher {
    registry: Registry,
    presence: PresenceTracker,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// Create a dispatcher timed by a [`MonotonicClock`].
    #[must_use]
    pub fn new(config: DispatcherConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a dispatcher timed by `clock`.
    #[must_use]
    pub fn with_clock(config: DispatcherConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: Registry::with_config(config.registry),
            presence: PresenceTracker::new(config.presence_timeout),
            clock,
        }
    }

    /// The subscription registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The presence tracker.
    #[must_use]
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Current time on the dispatcher's clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Register a newly accepted connection.
    pub fn connect(&self, connection: Arc<dyn Connection>) {
        self.registry.register(connection);
    }

    /// Tear down a closed connection's subscriptions.
    ///
    /// Presence records are keyed by identity and are left alone.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> Vec<ChannelId> {
        self.registry.teardown(connection_id)
    }

    /// Decode and handle one inbound message from `connection`.
    ///
    /// Never fails: malformed input and unknown actions are logged and
    /// dropped, and the connection stays usable.
    pub fn handle(&self, connection: &dyn Connection, data: &[u8]) -> Dispatch {
        match codec::decode(data) {
            Ok(frame) => self.dispatch(connection, frame),
            Err(e) if e.is_unknown_action() => {
                warn!(connection = %connection.id(), error = %e, "Ignoring frame");
                Dispatch::Ignored
            }
            Err(e) => {
                warn!(connection = %connection.id(), error = %e, "Discarding malformed frame");
                Dispatch::Discarded
            }
        }
    }

    /// Handle an already decoded frame.
    pub fn dispatch(&self, connection: &dyn Connection, frame: ClientFrame) -> Dispatch {
        let connection_id = connection.id();

        match frame {
            ClientFrame::Subscribe { channel } => Dispatch::Subscribed {
                added: self.registry.subscribe(connection_id, &channel),
            },
            ClientFrame::Unsubscribe { channel } => Dispatch::Unsubscribed {
                removed: self.registry.unsubscribe(connection_id, &channel),
            },
            ClientFrame::Publish { channel, payload } => {
                let recipients = self.registry.publish(&channel, payload);
                debug!(connection = %connection_id, channel = %channel, recipients, "Published");
                Dispatch::Published { recipients }
            }
            ClientFrame::Ping(heartbeat) => {
                self.presence.heartbeat(&heartbeat.address, self.now());
                Dispatch::Heartbeat
            }
            ClientFrame::CheckOnline(query) => {
                let statuses = self.presence.check_online(&query.players, self.now());
                if let Err(e) = connection.send(&ServerFrame::online_status(statuses.clone())) {
                    debug!(connection = %connection_id, error = %e, "Failed to send online status");
                }
                Dispatch::OnlineStatus { statuses }
            }
        }
    }

    /// Evict stale presence records. Returns the evicted identities.
    pub fn sweep(&self) -> Vec<String> {
        let evicted = self.presence.sweep(self.now());
        if !evicted.is_empty() {
            info!(
                evicted = evicted.len(),
                tracked = self.presence.len(),
                "Presence sweep"
            );
        }
        evicted
    }

    /// Spawn a task that sweeps presence every `period`.
    ///
    /// The first sweep runs one period after spawning. The task ends once
    /// every other reference to the dispatcher is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        self.spawn_sweeper_with(period, |_, _| {})
    }

    /// Like [`spawn_sweeper`](Self::spawn_sweeper), calling `on_sweep` with
    /// the evicted identities and the number still tracked after each sweep.
    pub fn spawn_sweeper_with<F>(self: &Arc<Self>, period: Duration, mut on_sweep: F) -> JoinHandle<()>
    where
        F: FnMut(&[String], usize) + Send + 'static,
    {
        let dispatcher = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(dispatcher) = dispatcher.upgrade() else {
                    debug!("Dispatcher dropped, stopping presence sweeper");
                    break;
                };
                let evicted = dispatcher.sweep();
                on_sweep(&evicted, dispatcher.presence.len());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use relay_transport::{OutboundQueue, QueuedConnection};
    use serde_json::{json, Value};

    fn dispatcher(clock: &Arc<ManualClock>) -> Dispatcher {
        Dispatcher::with_clock(DispatcherConfig::default(), clock.clone())
    }

    fn connect(dispatcher: &Dispatcher, id: &str) -> (Arc<QueuedConnection>, OutboundQueue) {
        let (conn, rx) = QueuedConnection::new(id.into());
        let conn = Arc::new(conn);
        dispatcher.connect(conn.clone());
        (conn, rx)
    }

    fn send(dispatcher: &Dispatcher, conn: &QueuedConnection, frame: Value) -> Dispatch {
        dispatcher.handle(conn, frame.to_string().as_bytes())
    }

    fn drain(rx: &mut OutboundQueue) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = rx.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    #[test]
    fn test_room_fan_out() {
        let clock = Arc::new(ManualClock::new(0));
        let dispatcher = dispatcher(&clock);
        let (c1, mut rx1) = connect(&dispatcher, "c1");
        let (c2, mut rx2) = connect(&dispatcher, "c2");
        let (_c3, mut rx3) = connect(&dispatcher, "c3");

        assert_eq!(
            send(&dispatcher, &c1, json!({"action": "subscribe", "channel": "room1"})),
            Dispatch::Subscribed { added: true }
        );
        assert_eq!(
            send(
                &dispatcher,
                &c2,
                json!({"action": "publish", "channel": "room1", "payload": {"hello": 1}})
            ),
            Dispatch::Published { recipients: 1 }
        );

        assert_eq!(
            drain(&mut rx1),
            vec![json!({"channel": "room1", "payload": {"hello": 1}})]
        );
        assert!(drain(&mut rx2).is_empty());
        assert!(drain(&mut rx3).is_empty());
    }

    #[test]
    fn test_publish_forwards_null_payload() {
        let clock = Arc::new(ManualClock::new(0));
        let dispatcher = dispatcher(&clock);
        let (conn, mut rx) = connect(&dispatcher, "c");

        send(&dispatcher, &conn, json!({"action": "subscribe", "channel": "r"}));
        dispatcher.handle(&*conn, br#"{"action":"publish","channel":"r","payload":null}"#);
        dispatcher.handle(&*conn, br#"{"action":"publish","channel":"r"}"#);

        assert_eq!(&*rx.try_recv().unwrap(), r#"{"channel":"r","payload":null}"#);
        assert_eq!(&*rx.try_recv().unwrap(), r#"{"channel":"r"}"#);
    }

    #[test]
    fn test_heartbeat_liveness_window() {
        let clock = Arc::new(ManualClock::new(0));
        let dispatcher = dispatcher(&clock);
        let (conn, mut rx) = connect(&dispatcher, "c1");

        assert_eq!(
            send(&dispatcher, &conn, json!({"action": "ping", "payload": {"Address": "p1"}})),
            Dispatch::Heartbeat
        );

        clock.set(5999);
        assert_eq!(
            send(&dispatcher, &conn, json!({"action": "check_online", "payload": {"players": ["p1"]}})),
            Dispatch::OnlineStatus {
                statuses: vec![true]
            }
        );

        clock.set(6000);
        send(&dispatcher, &conn, json!({"action": "check_online", "payload": {"players": ["p1"]}}));

        assert_eq!(
            drain(&mut rx),
            vec![
                json!({"action": "online_status", "payload": {"statuses": [true]}}),
                json!({"action": "online_status", "payload": {"statuses": [false]}}),
            ]
        );
    }

    #[test]
    fn test_check_online_mixed_and_reply_only_to_requester() {
        let clock = Arc::new(ManualClock::new(1000));
        let dispatcher = dispatcher(&clock);
        let (pinger, mut rx_pinger) = connect(&dispatcher, "pinger");
        let (asker, mut rx_asker) = connect(&dispatcher, "asker");

        send(&dispatcher, &pinger, json!({"action": "ping", "payload": "{\"Address\":\"p1\"}"}));
        clock.advance(10);

        let outcome = send(
            &dispatcher,
            &asker,
            json!({"action": "check_online", "payload": {"players": ["p1", "p2"]}}),
        );
        assert_eq!(
            outcome,
            Dispatch::OnlineStatus {
                statuses: vec![true, false]
            }
        );

        assert_eq!(
            drain(&mut rx_asker),
            vec![json!({"action": "online_status", "payload": {"statuses": [true, false]}})]
        );
        assert!(drain(&mut rx_pinger).is_empty());
    }

    #[test]
    fn test_bad_input_keeps_connection_usable() {
        let clock = Arc::new(ManualClock::new(0));
        let dispatcher = dispatcher(&clock);
        let (conn, mut rx) = connect(&dispatcher, "c1");

        assert_eq!(dispatcher.handle(&*conn, b"{oops"), Dispatch::Discarded);
        assert_eq!(
            send(&dispatcher, &conn, json!({"action": "subscribe"})),
            Dispatch::Discarded
        );
        assert_eq!(
            send(&dispatcher, &conn, json!({"action": "dance", "channel": "room"})),
            Dispatch::Ignored
        );
        assert!(conn.is_open());

        send(&dispatcher, &conn, json!({"action": "subscribe", "channel": "room"}));
        send(&dispatcher, &conn, json!({"action": "publish", "channel": "room", "payload": 7}));
        assert_eq!(drain(&mut rx), vec![json!({"channel": "room", "payload": 7})]);
    }

    #[test]
    fn test_disconnect_keeps_presence() {
        let clock = Arc::new(ManualClock::new(0));
        let dispatcher = dispatcher(&clock);
        let (conn, _rx) = connect(&dispatcher, "c1");

        send(&dispatcher, &conn, json!({"action": "subscribe", "channel": "room"}));
        send(&dispatcher, &conn, json!({"action": "ping", "payload": {"Address": "p1"}}));

        assert_eq!(dispatcher.disconnect(conn.id()), vec!["room".to_string()]);
        assert!(dispatcher.disconnect(conn.id()).is_empty());

        assert!(!dispatcher.registry().is_registered(conn.id()));
        assert!(dispatcher.presence().is_online("p1", dispatcher.now()));
    }

    #[test]
    fn test_dispatch_labels() {
        assert_eq!(Dispatch::Heartbeat.label(), "ping");
        assert_eq!(Dispatch::Published { recipients: 0 }.label(), "publish");
        assert_eq!(Dispatch::Discarded.label(), "discarded");
    }

    #[test]
    fn test_sweep_uses_clock() {
        let clock = Arc::new(ManualClock::new(0));
        let dispatcher = dispatcher(&clock);
        let (conn, _rx) = connect(&dispatcher, "c1");

        send(&dispatcher, &conn, json!({"action": "ping", "payload": {"Address": "p1"}}));
        clock.set(3000);
        send(&dispatcher, &conn, json!({"action": "ping", "payload": {"Address": "p2"}}));

        clock.set(6000);
        assert_eq!(dispatcher.sweep(), vec!["p1".to_string()]);
        assert_eq!(dispatcher.presence().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_every_period() {
        let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()));
        let period = DEFAULT_PRESENCE_TIMEOUT;
        let sweeper = dispatcher.spawn_sweeper(period);

        dispatcher.presence().heartbeat("early", dispatcher.now());
        time::sleep(Duration::from_millis(3000)).await;
        dispatcher.presence().heartbeat("late", dispatcher.now());

        // First sweep at 6000 evicts "early" only.
        time::sleep(Duration::from_millis(3001)).await;
        assert_eq!(dispatcher.presence().last_seen("early"), None);
        assert_eq!(dispatcher.presence().last_seen("late"), Some(3000));

        // "late" went stale at 9000 but lingers until the sweep at 12000.
        time::sleep(Duration::from_millis(3000)).await;
        assert!(!dispatcher.presence().is_online("late", dispatcher.now()));
        assert_eq!(dispatcher.presence().len(), 1);

        time::sleep(Duration::from_millis(3000)).await;
        assert!(dispatcher.presence().is_empty());

        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_when_dispatcher_dropped() {
        let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()));
        let sweeper = dispatcher.spawn_sweeper(Duration::from_millis(100));

        drop(dispatcher);
        time::sleep(Duration::from_millis(150)).await;

        assert!(sweeper.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_reports_evictions() {
        let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sweeper = dispatcher.spawn_sweeper_with(Duration::from_millis(6000), move |evicted, tracked| {
            let _ = tx.send((evicted.to_vec(), tracked));
        });

        dispatcher.presence().heartbeat("p1", dispatcher.now());
        time::sleep(Duration::from_millis(6001)).await;

        assert_eq!(rx.recv().await, Some((vec!["p1".to_string()], 0)));
        sweeper.abort();
    }
}
