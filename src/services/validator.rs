//! Ticket validation engine
//!
//! The central orchestrator of a scan: claims the ticket atomically in the
//! store, then fans the outcome out as exactly one `ValidationEvent` - to
//! the in-process broadcaster, the MQTT egress channel, and the audit log.
//! The fan-out is best-effort and never rolls back a committed transition;
//! only store unavailability aborts an attempt.

use crate::domain::event::{epoch_ms, DomainEvent, ValidationEvent};
use crate::domain::ticket::{
    ActorId, RejectReason, TicketCode, TicketMeta, ValidationOutcome,
};
use crate::infra::metrics::Metrics;
use crate::io::audit::AuditLog;
use crate::io::egress_channel::EgressSender;
use crate::services::broadcaster::Broadcaster;
use crate::services::store::{ClaimOutcome, StoreError, TicketStore};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that abort a validation attempt before it produces an outcome
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("ticket store unavailable")]
    StoreUnavailable(#[source] StoreError),
}

/// Synchronous result of a scan: the outcome plus the ticket as the store
/// reported it (absent when the code matched no ticket)
#[derive(Debug, Clone)]
pub struct Scan {
    pub outcome: ValidationOutcome,
    pub ticket: Option<TicketMeta>,
}

/// Validation engine wired to its collaborators
pub struct ValidationEngine {
    store: Arc<dyn TicketStore>,
    bus: Arc<Broadcaster>,
    /// MQTT egress sender (optional)
    egress: Option<EgressSender>,
    /// Audit log (optional)
    audit: Option<AuditLog>,
    metrics: Arc<Metrics>,
}

impl ValidationEngine {
    pub fn new(
        store: Arc<dyn TicketStore>,
        bus: Arc<Broadcaster>,
        egress: Option<EgressSender>,
        audit: Option<AuditLog>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { store, bus, egress, audit, metrics }
    }

    /// Validate a scanned ticket code on behalf of `actor`
    ///
    /// The store claim is the single atomic step: of N concurrent calls for
    /// one code exactly one observes `Accepted`, the rest `AlreadyUsed`.
    /// Every completed attempt emits exactly one event.
    pub async fn validate(
        &self,
        code: &TicketCode,
        actor: &ActorId,
    ) -> Result<Scan, ValidateError> {
        let start = Instant::now();

        let claim = match self.store.claim(code, actor, epoch_ms()).await {
            Ok(claim) => claim,
            Err(e) => {
                self.metrics.record_store_error();
                warn!(code = %code, actor = %actor, error = %e, "scan_store_unavailable");
                return Err(ValidateError::StoreUnavailable(e));
            }
        };

        let (outcome, ticket) = match claim {
            ClaimOutcome::Claimed(meta) => (ValidationOutcome::Accepted, Some(meta)),
            ClaimOutcome::AlreadyUsed(meta) => {
                (ValidationOutcome::Rejected(RejectReason::AlreadyUsed), Some(meta))
            }
            ClaimOutcome::Invalid(meta) => {
                (ValidationOutcome::Rejected(RejectReason::Invalid), Some(meta))
            }
            ClaimOutcome::NotFound => (ValidationOutcome::Rejected(RejectReason::NotFound), None),
        };

        let event = ValidationEvent::new(
            code.clone(),
            outcome,
            actor.clone(),
            ticket.as_ref().map(|meta| meta.trip.clone()),
        );

        info!(
            code = %code,
            actor = %actor,
            outcome = %outcome.as_str(),
            reason = ?outcome.reject_reason().map(|r| r.as_str()),
            event_id = %event.id,
            "ticket_scan"
        );

        self.emit(event);

        let latency_us = start.elapsed().as_micros() as u64;
        self.metrics.record_scan(outcome, latency_us);

        Ok(Scan { outcome, ticket })
    }

    /// Fan the event out to every sink; the transition is already committed
    fn emit(&self, event: ValidationEvent) {
        if let Some(sender) = &self.egress {
            sender.send_validation(&event);
        }
        if let Some(audit) = &self.audit {
            audit.append(&event);
        }
        self.bus.publish(DomainEvent::Validation(event));
    }
}
