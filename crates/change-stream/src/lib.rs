//! Change event fan-out, rollout tracking, and client push.
//!
//! Three layers, composed by the kernel crate:
//! - [`ChangeStream`]: in-process pub/sub over [`ChangeEvent`]s, isolating
//!   one subscriber's failure from the rest.
//! - [`UpdateOrchestrator`]: sequences cache invalidation ahead of
//!   publication and tracks [`RolloutState`] per policy. Only the
//!   `immediate` strategy is fully implemented; `canary`/`scheduled`/
//!   `manual` rollouts are recorded as `Pending` and left for a future
//!   propagation mechanism.
//! - [`PushService`]: fans matching events out to connected external
//!   clients over a pluggable [`PushTransport`], with heartbeat-based
//!   disconnection of clients that stop acknowledging.
//!
//! This crate has no dependency on the decision cache; [`Invalidator`] is
//! the minimal trait the kernel crate satisfies with an adapter around
//! `cache::DecisionCache`, keeping the two crates decoupled.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kernel_core::events::{ChangeEvent, RolloutState, RolloutStrategy};
use kernel_core::ids::now_ms;
use serde::{Deserialize, Serialize};

/// Receiver of published change events. Implementors should not block for
/// long; [`ChangeStream::publish`] calls every subscriber synchronously.
pub trait ChangeSubscriber: Send + Sync {
    /// Handle one event. An `Err` is logged and does not stop delivery to
    /// other subscribers.
    fn on_event(&self, event: &ChangeEvent) -> Result<(), String>;
}

/// In-process pub/sub over [`ChangeEvent`]s.
#[derive(Default)]
pub struct ChangeStream {
    subscribers: DashMap<u64, Arc<dyn ChangeSubscriber>>,
    next_id: AtomicU64,
}

impl ChangeStream {
    /// Construct an empty stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber, returning a handle usable with
    /// [`ChangeStream::unsubscribe`].
    pub fn subscribe(&self, subscriber: Arc<dyn ChangeSubscriber>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, subscriber);
        id
    }

    /// Remove a subscriber. Returns `false` if the handle was unknown.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Deliver `event` to every subscriber. A subscriber that returns `Err`
    /// is logged via `tracing::warn!` and does not prevent delivery to the
    /// rest.
    pub fn publish(&self, event: &ChangeEvent) {
        for entry in &self.subscribers {
            if let Err(error) = entry.value().on_event(event) {
                tracing::warn!(subscriber_id = *entry.key(), error, policy_id = %event.policy_id, "subscriber failed to process change event");
            }
        }
    }

    /// Number of currently registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Minimal seam the update orchestrator needs to clear the decision cache
/// ahead of publishing a change event. Satisfied by an adapter around
/// `cache::DecisionCache` in the kernel crate, which alone depends on both
/// this crate and `cache`.
pub trait Invalidator: Send + Sync {
    /// Clear every cached decision.
    fn invalidate_all(&self);
}

/// Sequences registry mutations against cache invalidation and publication,
/// and tracks rollout progress per policy.
pub struct UpdateOrchestrator {
    stream: Arc<ChangeStream>,
    invalidator: Arc<dyn Invalidator>,
    rollouts: DashMap<String, RolloutState>,
}

impl UpdateOrchestrator {
    /// Construct an orchestrator over `stream` and `invalidator`.
    #[must_use]
    pub fn new(stream: Arc<ChangeStream>, invalidator: Arc<dyn Invalidator>) -> Self {
        Self { stream, invalidator, rollouts: DashMap::new() }
    }

    /// Apply `event` under the `immediate` strategy: invalidate the
    /// decision cache, then publish, then mark the rollout completed. The
    /// cache is always cleared before the event reaches any subscriber, so
    /// a subsequent cache miss always recomputes against the already-
    /// mutated registry.
    pub fn apply_immediate(&self, event: ChangeEvent) -> RolloutState {
        self.invalidator.invalidate_all();
        self.stream.publish(&event);

        let state = RolloutState::pending(event.policy_id.clone(), RolloutStrategy::Immediate)
            .into_in_progress()
            .into_completed(1);
        self.rollouts.insert(event.policy_id.clone(), state.clone());
        state
    }

    /// Record a pending rollout for a non-immediate strategy. `canary`,
    /// `scheduled`, and `manual` propagation are not implemented; callers
    /// get a tracked `Pending` state and must drive it to completion
    /// themselves once that propagation mechanism exists.
    pub fn start_rollout(&self, policy_id: impl Into<String>, strategy: RolloutStrategy) -> RolloutState {
        let policy_id = policy_id.into();
        let state = RolloutState::pending(policy_id.clone(), strategy);
        self.rollouts.insert(policy_id, state.clone());
        state
    }

    /// Current rollout state tracked for `policy_id`, if any.
    #[must_use]
    pub fn rollout_status(&self, policy_id: &str) -> Option<RolloutState> {
        self.rollouts.get(policy_id).map(|e| e.clone())
    }
}

/// Envelope a [`PushTransport`] delivers to a connected client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    /// Topic the event was published under (`event.kind.topic()`).
    pub topic: String,
    /// The change event itself.
    pub event: ChangeEvent,
}

/// Delivery mechanism for pushing a [`PushMessage`] to one client. A real
/// deployment would implement this over a websocket or SSE connection;
/// tests and default wiring use [`LoggingPushTransport`].
pub trait PushTransport: Send + Sync {
    /// Deliver `message` to `client_id`. Implementations should not panic
    /// on a disconnected client; failures are the transport's concern, not
    /// the push service's.
    fn send(&self, client_id: &str, message: &PushMessage);
}

/// Transport that only logs via `tracing`, for deployments with no real
/// push channel wired up yet.
#[derive(Default)]
pub struct LoggingPushTransport;

impl PushTransport for LoggingPushTransport {
    fn send(&self, client_id: &str, message: &PushMessage) {
        tracing::info!(client_id, topic = %message.topic, policy_id = %message.event.policy_id, "push");
    }
}

/// Bookkeeping the push service holds per connected client.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    /// Opaque client identifier.
    pub client_id: String,
    /// Milliseconds since epoch when the client connected.
    pub connected_at_ms: u64,
    /// Milliseconds since epoch of the client's last heartbeat.
    pub last_heartbeat_ms: u64,
    /// Topics the client has subscribed to. `"*"` subscribes to everything.
    pub subscriptions: HashSet<String>,
}

/// Tracks connected push clients and fans matching [`ChangeEvent`]s out to
/// them via a [`PushTransport`]. Implements [`ChangeSubscriber`] so it can
/// be registered directly on a [`ChangeStream`].
pub struct PushService {
    clients: DashMap<String, ClientRecord>,
    transport: Arc<dyn PushTransport>,
}

impl PushService {
    /// Construct a push service delivering over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self { clients: DashMap::new(), transport }
    }

    /// Register a newly connected client with no subscriptions yet.
    pub fn connect(&self, client_id: impl Into<String>) {
        let client_id = client_id.into();
        let now = now_ms();
        self.clients.insert(
            client_id.clone(),
            ClientRecord { client_id, connected_at_ms: now, last_heartbeat_ms: now, subscriptions: HashSet::new() },
        );
    }

    /// Subscribe a connected client to `topic` (a `kernel.policy.<kind>`
    /// topic, a specific policy id, or `"*"`). Returns `false` if the
    /// client is not connected.
    pub fn subscribe(&self, client_id: &str, topic: impl Into<String>) -> bool {
        match self.clients.get_mut(client_id) {
            Some(mut record) => {
                record.subscriptions.insert(topic.into());
                true
            }
            None => false,
        }
    }

    /// Record a heartbeat from `client_id`. Returns `false` if the client
    /// is not connected.
    pub fn heartbeat(&self, client_id: &str) -> bool {
        match self.clients.get_mut(client_id) {
            Some(mut record) => {
                record.last_heartbeat_ms = now_ms();
                true
            }
            None => false,
        }
    }

    /// Disconnect a client explicitly. Returns `false` if it was not
    /// connected.
    pub fn disconnect(&self, client_id: &str) -> bool {
        self.clients.remove(client_id).is_some()
    }

    /// Number of currently connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Disconnect every client whose last heartbeat is `>= 2 *
    /// heartbeat_interval_ms` old, returning the disconnected client ids.
    pub fn disconnect_stale(&self, heartbeat_interval_ms: u64) -> Vec<String> {
        let now = now_ms();
        let timeout = heartbeat_interval_ms.saturating_mul(2);
        let stale: Vec<String> = self
            .clients
            .iter()
            .filter(|e| now.saturating_sub(e.value().last_heartbeat_ms) >= timeout)
            .map(|e| e.key().clone())
            .collect();
        for client_id in &stale {
            self.clients.remove(client_id);
        }
        stale
    }
}

impl ChangeSubscriber for PushService {
    fn on_event(&self, event: &ChangeEvent) -> Result<(), String> {
        let topic = event.kind.topic();
        for entry in &self.clients {
            let record = entry.value();
            let matches = record.subscriptions.contains("*")
                || record.subscriptions.contains(topic)
                || record.subscriptions.contains(&event.policy_id);
            if matches {
                self.transport.send(&record.client_id, &PushMessage { topic: topic.to_string(), event: event.clone() });
            }
        }
        Ok(())
    }
}

/// Spawn a background task that disconnects stale push clients on a fixed
/// cadence, per `heartbeat_interval_ms` (timeout is `2 * interval`, the
/// multiplier the kernel's default config uses everywhere a heartbeat
/// timeout is needed).
pub fn spawn_heartbeat_watchdog(
    service: Arc<PushService>,
    heartbeat_interval_ms: u64,
    cadence: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cadence);
        loop {
            ticker.tick().await;
            let stale = service.disconnect_stale(heartbeat_interval_ms);
            if !stale.is_empty() {
                tracing::info!(count = stale.len(), "disconnected stale push clients");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_core::events::ChangeEventKind;
    use std::sync::Mutex;

    fn event(policy_id: &str, kind: ChangeEventKind) -> ChangeEvent {
        ChangeEvent {
            kind,
            policy_id: policy_id.to_string(),
            policy: None,
            previous_version: None,
            new_version: None,
            timestamp: 1,
            source_node_id: "node-1".to_string(),
            metadata: None,
        }
    }

    struct FailingSubscriber;
    impl ChangeSubscriber for FailingSubscriber {
        fn on_event(&self, _event: &ChangeEvent) -> Result<(), String> {
            Err("boom".to_string())
        }
    }

    struct RecordingSubscriber(Arc<Mutex<Vec<String>>>);
    impl ChangeSubscriber for RecordingSubscriber {
        fn on_event(&self, event: &ChangeEvent) -> Result<(), String> {
            self.0.lock().unwrap().push(event.policy_id.clone());
            Ok(())
        }
    }

    #[test]
    fn publish_isolates_subscriber_failures() {
        let stream = ChangeStream::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        stream.subscribe(Arc::new(FailingSubscriber));
        stream.subscribe(Arc::new(RecordingSubscriber(received.clone())));

        stream.publish(&event("p1", ChangeEventKind::Created));

        assert_eq!(*received.lock().unwrap(), vec!["p1".to_string()]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let stream = ChangeStream::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let id = stream.subscribe(Arc::new(RecordingSubscriber(received.clone())));
        stream.unsubscribe(id);

        stream.publish(&event("p1", ChangeEventKind::Created));
        assert!(received.lock().unwrap().is_empty());
    }

    struct OrderRecordingInvalidator(Arc<Mutex<Vec<String>>>);
    impl Invalidator for OrderRecordingInvalidator {
        fn invalidate_all(&self) {
            self.0.lock().unwrap().push("invalidate".to_string());
        }
    }

    #[test]
    fn immediate_rollout_invalidates_before_publishing_s6() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let stream = Arc::new(ChangeStream::new());
        stream.subscribe(Arc::new(RecordingSubscriber(order.clone())));
        let invalidator = Arc::new(OrderRecordingInvalidator(order.clone()));

        let orchestrator = UpdateOrchestrator::new(stream, invalidator);
        let state = orchestrator.apply_immediate(event("p1", ChangeEventKind::Disabled));

        assert_eq!(state.status, kernel_core::events::RolloutStatus::Completed);
        assert_eq!(*order.lock().unwrap(), vec!["invalidate".to_string(), "p1".to_string()]);
        assert!(matches!(
            orchestrator.rollout_status("p1").unwrap().status,
            kernel_core::events::RolloutStatus::Completed
        ));
    }

    #[test]
    fn non_immediate_rollout_stays_pending() {
        let stream = Arc::new(ChangeStream::new());
        struct NoopInvalidator;
        impl Invalidator for NoopInvalidator {
            fn invalidate_all(&self) {}
        }
        let orchestrator = UpdateOrchestrator::new(stream, Arc::new(NoopInvalidator));

        let state = orchestrator.start_rollout("p2", RolloutStrategy::Canary);
        assert_eq!(state.status, kernel_core::events::RolloutStatus::Pending);
        assert_eq!(orchestrator.rollout_status("p2").unwrap().strategy, RolloutStrategy::Canary);
    }

    struct RecordingTransport(Arc<Mutex<Vec<(String, String)>>>);
    impl PushTransport for RecordingTransport {
        fn send(&self, client_id: &str, message: &PushMessage) {
            self.0.lock().unwrap().push((client_id.to_string(), message.event.policy_id.clone()));
        }
    }

    #[test]
    fn push_service_fans_out_to_matching_subscriptions_only() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let service = PushService::new(Arc::new(RecordingTransport(sent.clone())));

        service.connect("client-a");
        service.subscribe("client-a", "kernel.policy.disabled");
        service.connect("client-b");
        service.subscribe("client-b", "kernel.policy.created");
        service.connect("client-c");
        service.subscribe("client-c", "*");

        service.on_event(&event("p1", ChangeEventKind::Disabled)).unwrap();

        let sent = sent.lock().unwrap();
        assert!(sent.contains(&("client-a".to_string(), "p1".to_string())));
        assert!(!sent.iter().any(|(id, _)| id == "client-b"));
        assert!(sent.contains(&("client-c".to_string(), "p1".to_string())));
    }

    #[test]
    fn disconnect_stale_removes_clients_past_timeout() {
        let service = PushService::new(Arc::new(LoggingPushTransport));
        service.connect("client-a");
        {
            let mut record = service.clients.get_mut("client-a").unwrap();
            record.last_heartbeat_ms = 0;
        }
        service.connect("client-b");
        service.heartbeat("client-b");

        let stale = service.disconnect_stale(1);
        assert_eq!(stale, vec!["client-a".to_string()]);
        assert_eq!(service.client_count(), 1);
        assert!(service.heartbeat("client-b"));
    }

    #[test]
    fn disconnect_stale_boundary_is_inclusive_at_exactly_2x_interval() {
        let service = PushService::new(Arc::new(LoggingPushTransport));
        service.connect("client-a");
        let now = now_ms();
        {
            let mut record = service.clients.get_mut("client-a").unwrap();
            // Exactly 2x the heartbeat interval old: spec.md §5 says "disconnect
            // clients exceeding >= 2x heartbeat interval", an inclusive bound.
            record.last_heartbeat_ms = now.saturating_sub(20);
        }

        let stale = service.disconnect_stale(10);
        assert_eq!(stale, vec!["client-a".to_string()]);
    }
}
