//! Ticket store collaborator
//!
//! Ticket state is owned by external storage; the validation engine only
//! needs two operations from it: a read-only fetch and an atomic claim
//! (compare-and-set of `Unused → Used`). `MemoryTicketStore` is the
//! in-process implementation used by the service binary and tests - it
//! holds the trip's ticket manifest, optionally preloaded from a JSONL
//! file at startup.

use crate::domain::ticket::{ActorId, TicketCode, TicketMeta, TicketState, TripId};
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Store-level failures; the only error that aborts a validation attempt
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ticket store unavailable: {0}")]
    Unavailable(String),
}

/// Result of an atomic claim attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The ticket was unused and is now marked used by the claiming actor
    Claimed(TicketMeta),
    AlreadyUsed(TicketMeta),
    Invalid(TicketMeta),
    NotFound,
}

/// External ticket storage interface
///
/// `claim` must be atomic with respect to concurrent claims of the same
/// code: of N simultaneous callers exactly one observes `Claimed`.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Read-only snapshot of a ticket, `None` for unknown codes
    async fn fetch(&self, code: &TicketCode) -> Result<Option<TicketMeta>, StoreError>;

    /// Atomically transition `Unused → Used`, recording actor and timestamp
    async fn claim(
        &self,
        code: &TicketCode,
        actor: &ActorId,
        ts: u64,
    ) -> Result<ClaimOutcome, StoreError>;
}

/// Seed file line format (JSONL, one ticket per line)
#[derive(Debug, Deserialize)]
struct SeedTicket {
    code: String,
    trip: String,
    #[serde(default)]
    state: Option<TicketState>,
}

/// In-memory ticket store with per-code locking
///
/// The outer map is read-mostly: validations take the read lock and then
/// the per-ticket mutex, so claims of distinct codes run fully in parallel
/// while claims of the same code serialize on one mutex. The write lock is
/// only taken when tickets are registered.
pub struct MemoryTicketStore {
    tickets: RwLock<FxHashMap<String, Mutex<TicketMeta>>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self { tickets: RwLock::new(FxHashMap::default()) }
    }

    /// Register a fresh unused ticket (manifest sync, tests)
    pub fn register(&self, code: TicketCode, trip: TripId) {
        self.register_with_state(code, trip, TicketState::Unused);
    }

    /// Register a ticket in an explicit state (e.g. revoked upstream)
    pub fn register_with_state(&self, code: TicketCode, trip: TripId, state: TicketState) {
        let meta =
            TicketMeta { code: code.clone(), trip, state, used_by: None, used_at: None };
        self.tickets.write().insert(code.0, Mutex::new(meta));
    }

    /// Number of registered tickets
    pub fn len(&self) -> usize {
        self.tickets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.read().is_empty()
    }

    /// Load a ticket manifest from a JSONL seed file
    ///
    /// Returns the number of tickets loaded.
    pub fn load_seed_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<usize> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ticket seed file {}", path.display()))?;

        let mut loaded = 0usize;
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let seed: SeedTicket = serde_json::from_str(line).with_context(|| {
                format!("Bad ticket seed line {} in {}", lineno + 1, path.display())
            })?;
            self.register_with_state(
                TicketCode(seed.code),
                TripId(seed.trip),
                seed.state.unwrap_or(TicketState::Unused),
            );
            loaded += 1;
        }

        info!(file = %path.display(), tickets = %loaded, "ticket_seed_loaded");
        Ok(loaded)
    }
}

impl Default for MemoryTicketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn fetch(&self, code: &TicketCode) -> Result<Option<TicketMeta>, StoreError> {
        let tickets = self.tickets.read();
        Ok(tickets.get(code.as_str()).map(|slot| slot.lock().clone()))
    }

    async fn claim(
        &self,
        code: &TicketCode,
        actor: &ActorId,
        ts: u64,
    ) -> Result<ClaimOutcome, StoreError> {
        let tickets = self.tickets.read();
        let Some(slot) = tickets.get(code.as_str()) else {
            return Ok(ClaimOutcome::NotFound);
        };

        let mut meta = slot.lock();
        match meta.state {
            TicketState::Unused => {
                meta.state = TicketState::Used;
                meta.used_by = Some(actor.clone());
                meta.used_at = Some(ts);
                Ok(ClaimOutcome::Claimed(meta.clone()))
            }
            TicketState::Used => Ok(ClaimOutcome::AlreadyUsed(meta.clone())),
            TicketState::Invalid => Ok(ClaimOutcome::Invalid(meta.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::epoch_ms;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn store_with(code: &str, state: TicketState) -> MemoryTicketStore {
        let store = MemoryTicketStore::new();
        store.register_with_state(TicketCode::from(code), TripId::from("LINE-4-0800"), state);
        store
    }

    #[tokio::test]
    async fn test_fetch_unknown_code() {
        let store = MemoryTicketStore::new();
        let fetched = store.fetch(&TicketCode::from("missing")).await.unwrap();
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn test_claim_unused_records_actor_and_time() {
        let store = store_with("T-1001", TicketState::Unused);
        let actor = ActorId::from("scanner-7");

        let outcome = store.claim(&TicketCode::from("T-1001"), &actor, 1754560000000).await.unwrap();
        let ClaimOutcome::Claimed(meta) = outcome else {
            panic!("expected Claimed, got {outcome:?}");
        };
        assert_eq!(meta.state, TicketState::Used);
        assert_eq!(meta.used_by, Some(actor));
        assert_eq!(meta.used_at, Some(1754560000000));
    }

    #[tokio::test]
    async fn test_second_claim_reports_already_used() {
        let store = store_with("T-1001", TicketState::Unused);
        let code = TicketCode::from("T-1001");

        let first = store.claim(&code, &ActorId::from("scanner-1"), 1).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed(_)));

        // The second actor never wins, and the original claim is preserved
        let second = store.claim(&code, &ActorId::from("scanner-2"), 2).await.unwrap();
        let ClaimOutcome::AlreadyUsed(meta) = second else {
            panic!("expected AlreadyUsed, got {second:?}");
        };
        assert_eq!(meta.used_by, Some(ActorId::from("scanner-1")));
        assert_eq!(meta.used_at, Some(1));
    }

    #[tokio::test]
    async fn test_claim_invalid_ticket() {
        let store = store_with("T-1001", TicketState::Invalid);
        let outcome =
            store.claim(&TicketCode::from("T-1001"), &ActorId::from("scanner-1"), 1).await.unwrap();
        assert!(matches!(outcome, ClaimOutcome::Invalid(_)));
    }

    #[tokio::test]
    async fn test_concurrent_claims_yield_exactly_one_winner() {
        let store = Arc::new(store_with("T-1001", TicketState::Unused));
        let mut handles = Vec::new();

        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let actor = ActorId(format!("scanner-{i}"));
                store.claim(&TicketCode::from("T-1001"), &actor, epoch_ms()).await.unwrap()
            }));
        }

        let mut claimed = 0;
        let mut already_used = 0;
        for handle in handles {
            match handle.await.unwrap() {
                ClaimOutcome::Claimed(_) => claimed += 1,
                ClaimOutcome::AlreadyUsed(_) => already_used += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(claimed, 1);
        assert_eq!(already_used, 15);
    }

    #[tokio::test]
    async fn test_seed_file_loading() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"code":"T-1001","trip":"LINE-4-0800"}}"#).unwrap();
        writeln!(file, r#"{{"code":"T-1002","trip":"LINE-4-0800","state":"invalid"}}"#).unwrap();
        writeln!(file).unwrap();
        file.flush().unwrap();

        let store = MemoryTicketStore::new();
        let loaded = store.load_seed_file(file.path()).unwrap();
        assert_eq!(loaded, 2);

        let meta = store.fetch(&TicketCode::from("T-1002")).await.unwrap().unwrap();
        assert_eq!(meta.state, TicketState::Invalid);
    }

    #[test]
    fn test_seed_file_missing_is_an_error() {
        let store = MemoryTicketStore::new();
        assert!(store.load_seed_file("/nonexistent/tickets.jsonl").is_err());
    }
}
