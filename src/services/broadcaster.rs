//! Realtime broadcaster and subscriber registry
//!
//! Fans validation events out to every connected client (admin dashboards,
//! scanner devices). Each subscriber owns an independent bounded queue so a
//! slow or dead client never delays the others: on overflow the oldest
//! unread event is dropped in favor of the newest and the subscriber is
//! marked degraded. A periodic heartbeat frame doubles as the liveness
//! probe - subscribers that stop draining are swept out after the
//! configured timeout.

use crate::domain::event::{epoch_ms, DomainEvent};
use crate::infra::metrics::Metrics;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

/// Newtype wrapper for subscriber client ids
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One event as delivered to a single subscriber
///
/// `seq` is per-subscriber and stamped at delivery, so it stays gap-free
/// and monotonic even when overload dropped older frames.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub seq: u64,
    pub event: Arc<DomainEvent>,
}

/// Queue state behind each subscriber's mutex
struct SubscriberQueue {
    items: VecDeque<Arc<DomainEvent>>,
    delivered_seq: u64,
    degraded: bool,
    closed: bool,
    last_drain: Instant,
}

enum Offer {
    Enqueued,
    /// Queue was full; the oldest unread event was replaced
    ReplacedOldest,
    Closed,
}

struct SubscriberEntry {
    client_id: ClientId,
    queue: Mutex<SubscriberQueue>,
    notify: Notify,
}

impl SubscriberEntry {
    fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            queue: Mutex::new(SubscriberQueue {
                items: VecDeque::new(),
                delivered_seq: 0,
                degraded: false,
                closed: false,
                last_drain: Instant::now(),
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue without ever blocking the publisher
    fn offer(&self, event: Arc<DomainEvent>, capacity: usize) -> Offer {
        let result = {
            let mut queue = self.queue.lock();
            if queue.closed {
                return Offer::Closed;
            }
            if queue.items.len() >= capacity {
                queue.items.pop_front();
                queue.degraded = true;
                queue.items.push_back(event);
                Offer::ReplacedOldest
            } else {
                queue.items.push_back(event);
                Offer::Enqueued
            }
        };
        self.notify.notify_one();
        result
    }

    fn close(&self) {
        {
            let mut queue = self.queue.lock();
            queue.closed = true;
            queue.items.clear();
        }
        self.notify.notify_one();
    }

    fn is_degraded(&self) -> bool {
        self.queue.lock().degraded
    }

    /// Undrained backlog age; `None` while the queue is empty
    fn stalled_for(&self) -> Option<Duration> {
        let queue = self.queue.lock();
        if queue.items.is_empty() {
            None
        } else {
            Some(queue.last_drain.elapsed())
        }
    }
}

/// Receiving half handed to the wire layer
///
/// Dropping the subscription unsubscribes the client (idempotent - a
/// replaced subscription does not evict its successor).
pub struct Subscription {
    entry: Arc<SubscriberEntry>,
    bus: Arc<Broadcaster>,
}

impl Subscription {
    pub fn client_id(&self) -> &ClientId {
        &self.entry.client_id
    }

    pub fn is_degraded(&self) -> bool {
        self.entry.is_degraded()
    }

    /// Receive the next event in publish order
    ///
    /// Returns `None` once the subscription is closed (unsubscribed or
    /// replaced by a newer connection with the same client id).
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            {
                let mut queue = self.entry.queue.lock();
                if let Some(event) = queue.items.pop_front() {
                    queue.delivered_seq += 1;
                    queue.last_drain = Instant::now();
                    return Some(Delivery { seq: queue.delivered_seq, event });
                }
                if queue.closed {
                    return None;
                }
            }
            self.entry.notify.notified().await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.remove_entry(&self.entry);
    }
}

/// Event bus with per-subscriber bounded delivery queues
pub struct Broadcaster {
    subscribers: RwLock<FxHashMap<String, Arc<SubscriberEntry>>>,
    queue_capacity: usize,
    metrics: Arc<Metrics>,
}

impl Broadcaster {
    pub fn new(queue_capacity: usize, metrics: Arc<Metrics>) -> Arc<Self> {
        Arc::new(Self { subscribers: RwLock::new(FxHashMap::default()), queue_capacity, metrics })
    }

    /// Register a subscriber, replacing any prior connection with this id
    pub fn subscribe(self: &Arc<Self>, client_id: ClientId) -> Subscription {
        let entry = Arc::new(SubscriberEntry::new(client_id.clone()));
        let replaced = self.subscribers.write().insert(client_id.0.clone(), entry.clone());

        if let Some(old) = replaced {
            old.close();
            info!(client_id = %client_id, "subscriber_replaced");
        } else {
            info!(client_id = %client_id, "subscriber_connected");
        }

        Subscription { entry, bus: self.clone() }
    }

    /// Remove a subscriber; safe on unknown or already-removed ids
    pub fn unsubscribe(&self, client_id: &str) -> bool {
        match self.subscribers.write().remove(client_id) {
            Some(entry) => {
                entry.close();
                info!(client_id = %client_id, "subscriber_disconnected");
                true
            }
            None => false,
        }
    }

    /// Deliver an event to every registered subscriber
    ///
    /// Never blocks on any subscriber's consumption; returns the number of
    /// queues the event landed in.
    pub fn publish(&self, event: DomainEvent) -> usize {
        let event = Arc::new(event);

        // Snapshot under the read lock so a publish sees either the old or
        // the new subscriber set, never a partially-updated one.
        let targets: SmallVec<[Arc<SubscriberEntry>; 8]> =
            self.subscribers.read().values().cloned().collect();

        let mut delivered = 0usize;
        for entry in &targets {
            match entry.offer(event.clone(), self.queue_capacity) {
                Offer::Enqueued => delivered += 1,
                Offer::ReplacedOldest => {
                    delivered += 1;
                    self.metrics.record_event_dropped();
                    debug!(client_id = %entry.client_id, "subscriber_backlog_dropped_oldest");
                }
                Offer::Closed => {}
            }
        }

        self.metrics.record_event_published();
        delivered
    }

    /// Current registry size
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Subscribers currently flagged degraded
    pub fn degraded_count(&self) -> usize {
        self.subscribers.read().values().filter(|e| e.is_degraded()).count()
    }

    /// Heartbeat and liveness loop
    ///
    /// Publishes a heartbeat frame every `interval` and sweeps subscribers
    /// whose backlog has not been drained for `client_timeout`. The
    /// heartbeat traffic is what makes the sweep meaningful: a live client
    /// keeps draining frames, a dead connection stops.
    pub async fn run_heartbeat(
        self: Arc<Self>,
        interval: Duration,
        client_timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            interval_ms = %interval.as_millis(),
            client_timeout_ms = %client_timeout.as_millis(),
            "heartbeat_started"
        );
        let mut tick = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("heartbeat_stopped");
                        break;
                    }
                }
                _ = tick.tick() => {
                    self.publish(DomainEvent::Heartbeat { ts: epoch_ms() });
                    self.metrics.record_heartbeat();
                    self.sweep_stalled(client_timeout);
                }
            }
        }
    }

    /// Unsubscribe every client whose backlog is older than `timeout`
    fn sweep_stalled(&self, timeout: Duration) {
        let stalled: Vec<String> = self
            .subscribers
            .read()
            .iter()
            .filter(|(_, entry)| entry.stalled_for().is_some_and(|age| age > timeout))
            .map(|(id, _)| id.clone())
            .collect();

        for client_id in stalled {
            warn!(client_id = %client_id, timeout_ms = %timeout.as_millis(), "subscriber_timed_out");
            self.unsubscribe(&client_id);
        }
    }

    /// Remove an entry only if it is still the registered one
    fn remove_entry(&self, entry: &Arc<SubscriberEntry>) {
        let mut subscribers = self.subscribers.write();
        if let Some(current) = subscribers.get(entry.client_id.as_str()) {
            if Arc::ptr_eq(current, entry) {
                subscribers.remove(entry.client_id.as_str());
            }
        }
        drop(subscribers);
        entry.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ticket::{ActorId, TicketCode, ValidationOutcome};
    use crate::domain::ValidationEvent;
    use tokio::time::timeout;

    fn bus_with_capacity(capacity: usize) -> Arc<Broadcaster> {
        Broadcaster::new(capacity, Arc::new(Metrics::new()))
    }

    fn validation_event(code: &str) -> DomainEvent {
        DomainEvent::Validation(ValidationEvent::new(
            TicketCode::from(code),
            ValidationOutcome::Accepted,
            ActorId::from("scanner-1"),
            None,
        ))
    }

    fn event_code(delivery: &Delivery) -> String {
        match delivery.event.as_ref() {
            DomainEvent::Validation(event) => event.code.to_string(),
            DomainEvent::Heartbeat { .. } => "heartbeat".to_string(),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_publish_order() {
        let bus = bus_with_capacity(16);
        let mut sub = bus.subscribe(ClientId::from("dash-1"));

        for i in 0..5 {
            bus.publish(validation_event(&format!("T-{i}")));
        }

        for i in 0..5 {
            let delivery = sub.recv().await.unwrap();
            assert_eq!(delivery.seq, i + 1);
            assert_eq!(event_code(&delivery), format!("T-{i}"));
        }
    }

    #[tokio::test]
    async fn test_publish_reports_delivery_count() {
        let bus = bus_with_capacity(16);
        let _a = bus.subscribe(ClientId::from("dash-1"));
        let _b = bus.subscribe(ClientId::from("dash-2"));

        assert_eq!(bus.publish(validation_event("T-1")), 2);
    }

    #[tokio::test]
    async fn test_overloaded_subscriber_is_bounded_and_degraded_while_others_catch_up() {
        let bus = bus_with_capacity(4);
        let mut slow = bus.subscribe(ClientId::from("slow"));
        let mut fast = bus.subscribe(ClientId::from("fast"));

        // The fast client drains every frame; the slow one never does.
        let mut fast_codes = Vec::new();
        for i in 0..10 {
            bus.publish(validation_event(&format!("T-{i}")));
            fast_codes.push(event_code(&fast.recv().await.unwrap()));
        }

        assert_eq!(fast_codes, (0..10).map(|i| format!("T-{i}")).collect::<Vec<_>>());
        assert!(!fast.is_degraded());
        assert!(slow.is_degraded());

        // Backlog held the bound and kept the most recent frames
        let mut slow_codes = Vec::new();
        while let Ok(Some(delivery)) = timeout(Duration::from_millis(20), slow.recv()).await {
            slow_codes.push(event_code(&delivery));
        }
        assert_eq!(slow_codes, vec!["T-6", "T-7", "T-8", "T-9"]);
    }

    #[tokio::test]
    async fn test_delivery_seq_is_gap_free_after_drops() {
        let bus = bus_with_capacity(2);
        let mut sub = bus.subscribe(ClientId::from("slow"));

        for i in 0..6 {
            bus.publish(validation_event(&format!("T-{i}")));
        }

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!((first.seq, second.seq), (1, 2));
        assert_eq!(event_code(&first), "T-4");
        assert_eq!(event_code(&second), "T-5");
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let bus = bus_with_capacity(4);
        let _sub = bus.subscribe(ClientId::from("dash-1"));

        assert!(bus.unsubscribe("dash-1"));
        assert!(!bus.unsubscribe("dash-1"));
        assert!(!bus.unsubscribe("never-connected"));
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_prior_connection() {
        let bus = bus_with_capacity(4);
        let mut first = bus.subscribe(ClientId::from("dash-1"));
        let mut second = bus.subscribe(ClientId::from("dash-1"));

        assert_eq!(bus.subscriber_count(), 1);
        bus.publish(validation_event("T-1"));

        // Old channel is closed, new one receives
        assert!(first.recv().await.is_none());
        assert_eq!(event_code(&second.recv().await.unwrap()), "T-1");
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let bus = bus_with_capacity(4);
        let sub = bus.subscribe(ClientId::from("dash-1"));
        assert_eq!(bus.subscriber_count(), 1);

        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_replaced_subscription_keeps_successor() {
        let bus = bus_with_capacity(4);
        let first = bus.subscribe(ClientId::from("dash-1"));
        let _second = bus.subscribe(ClientId::from("dash-1"));

        drop(first);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_frames_reach_subscribers() {
        let bus = bus_with_capacity(4);
        let mut sub = bus.subscribe(ClientId::from("dash-1"));

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let hb = tokio::spawn(bus.clone().run_heartbeat(
            Duration::from_millis(10),
            Duration::from_secs(60),
            shutdown_rx,
        ));

        let delivery = timeout(Duration::from_secs(1), sub.recv()).await.unwrap().unwrap();
        assert!(matches!(delivery.event.as_ref(), DomainEvent::Heartbeat { .. }));

        hb.abort();
    }

    #[tokio::test]
    async fn test_sweep_removes_stalled_subscriber() {
        let bus = bus_with_capacity(4);
        let _stalled = bus.subscribe(ClientId::from("dead"));

        bus.publish(validation_event("T-1"));
        tokio::time::sleep(Duration::from_millis(30)).await;

        bus.sweep_stalled(Duration::from_millis(10));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_spares_empty_queues() {
        let bus = bus_with_capacity(4);
        let _idle = bus.subscribe(ClientId::from("idle"));

        tokio::time::sleep(Duration::from_millis(30)).await;
        bus.sweep_stalled(Duration::from_millis(10));

        // Nothing undrained, nothing to reap
        assert_eq!(bus.subscriber_count(), 1);
    }
}
