// ── Confirmation Store ─────────────────────────────────────────────────────
// Pending destructive/batch operations awaiting user approval.
//
// Contract: a token is cryptographically random, carries an action-class
// prefix, lives for 5 minutes, and is valid for exactly one execution —
// consuming it deletes it. Expired entries are garbage-collected lazily on
// any access. Process-local by design; see DESIGN.md for the multi-node
// caveat.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::atoms::constants::CONFIRMATION_TTL_SECS;
use crate::atoms::types::SearchFilter;

/// What a confirmed execution will do. `matched_ids` is frozen at preview
/// time: what the user saw is what executes.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    pub token: String,
    pub action: PendingAction,
    pub user_id: i64,
    pub filter: Option<SearchFilter>,
    pub updates: Option<serde_json::Value>,
    pub matched_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    BatchUpdate,
    BatchDelete,
    DeleteProject,
    MoveItems { source_project_id: i64, target_project_id: Option<i64> },
}

impl PendingOperation {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.created_at + Duration::seconds(CONFIRMATION_TTL_SECS)
    }
}

/// Generate a random token with an action-class prefix, e.g. `del_1f3a…`.
pub fn generate_token(prefix: &str) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &random[..12])
}

#[derive(Default)]
pub struct ConfirmationStore {
    pending: Mutex<HashMap<String, PendingOperation>>,
}

impl ConfirmationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, operation: PendingOperation) {
        let mut pending = self.pending.lock();
        let now = Utc::now();
        pending.retain(|_, op| !op.is_expired(now));
        pending.insert(operation.token.clone(), operation);
    }

    /// Look up without consuming. Expired entries read as absent.
    pub fn peek(&self, token: &str) -> Option<PendingOperation> {
        let mut pending = self.pending.lock();
        let now = Utc::now();
        pending.retain(|_, op| !op.is_expired(now));
        pending.get(token).cloned()
    }

    /// Consume a token: the single permitted execution. A second take of
    /// the same token returns None.
    pub fn take(&self, token: &str) -> Option<PendingOperation> {
        let mut pending = self.pending.lock();
        let now = Utc::now();
        pending.retain(|_, op| !op.is_expired(now));
        pending.remove(token)
    }

    pub fn discard(&self, token: &str) {
        self.pending.lock().remove(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(token: &str, user_id: i64, created_at: DateTime<Utc>) -> PendingOperation {
        PendingOperation {
            token: token.to_string(),
            action: PendingAction::BatchDelete,
            user_id,
            filter: None,
            updates: None,
            matched_ids: vec![1, 2, 3],
            created_at,
        }
    }

    #[test]
    fn token_is_prefixed_and_unique() {
        let a = generate_token("del");
        let b = generate_token("del");
        assert!(a.starts_with("del_"));
        assert_ne!(a, b);
    }

    #[test]
    fn take_is_single_use() {
        let store = ConfirmationStore::new();
        store.store(op("del_abc", 1, Utc::now()));
        assert!(store.take("del_abc").is_some());
        assert!(store.take("del_abc").is_none());
    }

    #[test]
    fn expired_tokens_read_as_absent() {
        let store = ConfirmationStore::new();
        let stale = Utc::now() - Duration::seconds(CONFIRMATION_TTL_SECS + 1);
        store.store(op("upd_old", 1, stale));
        assert!(store.peek("upd_old").is_none());
        assert!(store.take("upd_old").is_none());
    }

    #[test]
    fn storing_garbage_collects_expired_entries() {
        let store = ConfirmationStore::new();
        let stale = Utc::now() - Duration::seconds(CONFIRMATION_TTL_SECS + 1);
        store.store(op("del_old", 1, stale));
        store.store(op("del_new", 1, Utc::now()));
        assert!(store.peek("del_old").is_none());
        assert!(store.peek("del_new").is_some());
    }
}
