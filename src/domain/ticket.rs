//! Ticket lifecycle types and validation outcomes

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Newtype wrapper for ticket codes to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketCode(pub String);

impl TicketCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TicketCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TicketCode {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype wrapper for scanner/device identities
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype wrapper for trip/line references (owned by the external store)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(pub String);

impl std::fmt::Display for TripId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TripId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Ticket lifecycle state
///
/// This core only ever performs the `Unused → Used` transition; `Invalid`
/// is set by external processes (expiry, revocation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketState {
    Unused,
    Used,
    Invalid,
}

impl TicketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketState::Unused => "unused",
            TicketState::Used => "used",
            TicketState::Invalid => "invalid",
        }
    }
}

/// Snapshot of a ticket as the store reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketMeta {
    pub code: TicketCode,
    pub trip: TripId,
    pub state: TicketState,
    /// Scanner that consumed the ticket, set on use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_by: Option<ActorId>,
    /// Epoch ms of consumption, set on use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_at: Option<u64>,
}

/// Why a scan was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// No ticket matches the scanned code
    #[error("ticket not found")]
    NotFound,
    /// The ticket was already consumed; repeated scans always report this
    #[error("ticket already used")]
    AlreadyUsed,
    /// The ticket was expired or revoked by an external process
    #[error("ticket invalid")]
    Invalid,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NotFound => "not_found",
            RejectReason::AlreadyUsed => "already_used",
            RejectReason::Invalid => "invalid",
        }
    }
}

/// Outcome of a single validation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted,
    Rejected(RejectReason),
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Accepted => "accepted",
            ValidationOutcome::Rejected(_) => "rejected",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted)
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            ValidationOutcome::Accepted => None,
            ValidationOutcome::Rejected(reason) => Some(*reason),
        }
    }
}

// Serialized as the bare outcome word; the reason travels in its own field.
impl Serialize for ValidationOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
