//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to hand events to the MQTT publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth; a full
//! channel drops the message and counts the drop.

use crate::domain::event::{epoch_ms, ValidationEvent};
use crate::infra::metrics::{Metrics, MetricsSummary};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Validation outcome for the scanner fleet (QoS 1)
    Validation(ValidationPayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
    /// Subscriber lifecycle change (connected, disconnected, degraded)
    Subscriber(SubscriberPayload),
}

/// Payload for validation outcomes
#[derive(Debug, Clone, Serialize)]
pub struct ValidationPayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// UUIDv7 event id
    pub id: String,
    /// Ticket code
    pub code: String,
    /// Outcome (accepted, rejected)
    pub out: String,
    /// Reject reason, absent on acceptance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Scanner/device identity
    pub actor: String,
    /// Trip reference, absent when the code matched no ticket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trip: Option<String>,
    /// Timestamp (epoch ms)
    pub ts: u64,
}

impl ValidationPayload {
    pub fn from_event(event: &ValidationEvent) -> Self {
        Self {
            site: None,
            id: event.id.clone(),
            code: event.code.to_string(),
            out: event.outcome.as_str().to_string(),
            reason: event.reason.map(|r| r.as_str().to_string()),
            actor: event.actor.to_string(),
            trip: event.trip.as_ref().map(|t| t.to_string()),
            ts: event.ts,
        }
    }
}

/// Payload for metrics snapshots
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    /// Site identifier
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// Total scans processed
    pub scans_total: u64,
    /// Scans per second since the previous snapshot
    pub scans_per_sec: f64,
    /// Accepted scans
    pub accepted_total: u64,
    /// Rejected scans
    pub rejected_total: u64,
    /// Store failures
    pub store_errors_total: u64,
    /// Average validation latency (microseconds)
    pub avg_latency_us: u64,
    /// Max validation latency (microseconds)
    pub max_latency_us: u64,
    /// 99th percentile validation latency (microseconds)
    pub lat_p99_us: u64,
    /// Events published on the bus
    pub events_published_total: u64,
    /// Events dropped from subscriber backlogs
    pub events_dropped_total: u64,
    /// Currently connected subscribers
    pub subscribers: u64,
    /// Subscribers currently degraded
    pub degraded: u64,
}

impl MetricsPayload {
    /// Create a metrics payload from a summary with site info
    pub fn from_summary(summary: &MetricsSummary, site: String) -> Self {
        Self {
            site,
            ts: epoch_ms(),
            scans_total: summary.scans_total,
            scans_per_sec: summary.scans_per_sec,
            accepted_total: summary.accepted_total,
            rejected_total: summary.rejected_total,
            store_errors_total: summary.store_errors_total,
            avg_latency_us: summary.avg_latency_us,
            max_latency_us: summary.max_latency_us,
            lat_p99_us: summary.lat_p99_us,
            events_published_total: summary.events_published_total,
            events_dropped_total: summary.events_dropped_total,
            subscribers: summary.subscribers,
            degraded: summary.degraded,
        }
    }
}

/// Payload for subscriber lifecycle events
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberPayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// Lifecycle change (connected, disconnected, degraded)
    pub t: String,
    /// Client id
    pub client: String,
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped and counted.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
    metrics: Arc<Metrics>,
}

impl EgressSender {
    /// Create a new sender from an mpsc sender
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String, metrics: Arc<Metrics>) -> Self {
        Self { tx, site_id, metrics }
    }

    fn push(&self, message: EgressMessage) {
        // Use try_send to avoid blocking - drop if channel full
        if self.tx.try_send(message).is_err() {
            self.metrics.record_egress_dropped();
        }
    }

    /// Send a validation outcome for fleet publishing
    /// Injects site_id into the payload
    pub fn send_validation(&self, event: &ValidationEvent) {
        let mut payload = ValidationPayload::from_event(event);
        payload.site = Some(self.site_id.clone());
        self.push(EgressMessage::Validation(payload));
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, summary: &MetricsSummary) {
        let payload = MetricsPayload::from_summary(summary, self.site_id.clone());
        self.push(EgressMessage::Metrics(payload));
    }

    /// Send a subscriber lifecycle event
    /// Injects site_id into the payload
    pub fn send_subscriber(&self, change: &str, client: &str) {
        let payload = SubscriberPayload {
            site: Some(self.site_id.clone()),
            ts: epoch_ms(),
            t: change.to_string(),
            client: client.to_string(),
        };
        self.push(EgressMessage::Subscriber(payload));
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// Buffer size determines how many messages can be queued; site_id is
/// stamped into payloads for downstream consumers.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
    metrics: Arc<Metrics>,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id, metrics), rx)
}
