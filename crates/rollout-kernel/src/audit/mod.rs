//! Tamper-evident audit trail
//!
//! Every phase and host state transition is appended as an event whose
//! hash covers its content and the previous event's hash. The chain is
//! embedded in the run report and can be re-verified from it.

use crate::error::AuditError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ulid::Ulid;

/// Hash linking the first event
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub seq: u64,
    pub event_id: Ulid,
    pub timestamp: DateTime<Utc>,
    /// Phase name, hostname or `session`
    pub subject: String,
    pub action: String,
    pub detail: String,
    pub prev_hash: String,
    pub hash: String,
}

#[derive(Debug, Default)]
pub struct AuditLog {
    inner: Mutex<Vec<AuditEvent>>,
}

impl AuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &self,
        subject: impl Into<String>,
        action: impl Into<String>,
        detail: impl Into<String>,
    ) -> Ulid {
        let mut guard = self.inner.lock();
        let prev_hash = guard
            .last()
            .map_or_else(|| GENESIS_HASH.to_string(), |e| e.hash.clone());
        let mut event = AuditEvent {
            seq: guard.len() as u64,
            event_id: Ulid::new(),
            timestamp: Utc::now(),
            subject: subject.into(),
            action: action.into(),
            detail: detail.into(),
            prev_hash,
            hash: String::new(),
        };
        event.hash = compute_hash(&event);
        let id = event.event_id;
        guard.push(event);
        id
    }

    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.inner.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn verify_integrity(&self) -> Result<(), AuditError> {
        verify_chain(&self.inner.lock())
    }
}

/// Check a chain loaded from elsewhere (e.g. a persisted report)
pub fn verify_chain(events: &[AuditEvent]) -> Result<(), AuditError> {
    let mut prev = GENESIS_HASH.to_string();
    for e in events {
        if e.prev_hash != prev || e.hash != compute_hash(e) {
            return Err(AuditError::IntegrityViolation { seq: e.seq });
        }
        prev.clone_from(&e.hash);
    }
    Ok(())
}

fn compute_hash(event: &AuditEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event.seq.to_le_bytes());
    hasher.update(event.event_id.to_bytes());
    hasher.update(event.timestamp.timestamp_micros().to_le_bytes());
    hasher.update(event.subject.as_bytes());
    hasher.update([0]);
    hasher.update(event.action.as_bytes());
    hasher.update([0]);
    hasher.update(event.detail.as_bytes());
    hasher.update([0]);
    hasher.update(event.prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}
