//! Domain events broadcast to connected clients
//!
//! A `ValidationEvent` is created exactly once per validation attempt and
//! never mutated afterwards: it is broadcast to subscribers, mirrored to the
//! MQTT fleet topics, and archived to the audit log.

use crate::domain::ticket::{ActorId, RejectReason, TicketCode, TripId, ValidationOutcome};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_event_id() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Immutable record of one validation attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationEvent {
    /// UUIDv7 event id
    pub id: String,
    pub code: TicketCode,
    pub outcome: ValidationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    pub actor: ActorId,
    /// Trip reference, absent when the code matched no ticket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trip: Option<TripId>,
    /// Epoch ms
    pub ts: u64,
}

impl ValidationEvent {
    pub fn new(
        code: TicketCode,
        outcome: ValidationOutcome,
        actor: ActorId,
        trip: Option<TripId>,
    ) -> Self {
        Self {
            id: new_event_id(),
            code,
            reason: outcome.reject_reason(),
            outcome,
            actor,
            trip,
            ts: epoch_ms(),
        }
    }
}

/// Event kinds carried on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Validation,
    Heartbeat,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Validation => "validation",
            EventKind::Heartbeat => "heartbeat",
        }
    }
}

/// Envelope for everything the broadcaster delivers
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    Validation(ValidationEvent),
    /// Periodic liveness signal; carries only its emission time
    Heartbeat { ts: u64 },
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::Validation(_) => EventKind::Validation,
            DomainEvent::Heartbeat { .. } => EventKind::Heartbeat,
        }
    }

    pub fn ts(&self) -> u64 {
        match self {
            DomainEvent::Validation(event) => event.ts,
            DomainEvent::Heartbeat { ts } => *ts,
        }
    }

    /// Wire frame: `{t, ts, p?}` with the validation payload under `p`
    pub fn to_wire_json(&self) -> String {
        let mut obj = serde_json::Map::new();
        obj.insert("t".to_string(), serde_json::Value::String(self.kind().as_str().to_string()));
        obj.insert("ts".to_string(), serde_json::Value::Number(self.ts().into()));

        if let DomainEvent::Validation(event) = self {
            let payload = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
            obj.insert("p".to_string(), payload);
        }

        serde_json::Value::Object(obj).to_string()
    }
}
