//! Validation engine.
//!
//! Decides approve/reject for a (token, lock) pair and writes one
//! access record per attempt, approved or not. Rejection is a normal
//! outcome with a reason code, never an error.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::LocknetError;
use crate::metrics;
use crate::store::Store;

/// Why a validation attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No token row matched the (value, lock label) join.
    TokenNotFound,
    /// The token's lifecycle state is expired or revoked.
    TokenNotActive,
    /// The token is lifecycle-active but `now` is outside its window.
    TokenExpired,
}

impl RejectReason {
    /// Human-readable reason, as recorded in the audit trail.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TokenNotFound => "token not found",
            Self::TokenNotActive => "token not active",
            Self::TokenExpired => "token expired",
        }
    }

    const fn metric_label(&self) -> &'static str {
        match self {
            Self::TokenNotFound => "token_not_found",
            Self::TokenNotActive => "token_not_active",
            Self::TokenExpired => "token_expired",
        }
    }
}

/// Outcome of one validation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Access granted.
    Approved,
    /// Access denied for the given reason.
    Rejected(RejectReason),
}

impl Decision {
    /// Result text persisted in the access record: `approved` or
    /// `rejected (<reason>)`.
    #[must_use]
    pub fn result_text(&self) -> String {
        match self {
            Self::Approved => "approved".to_string(),
            Self::Rejected(reason) => format!("rejected ({})", reason.as_str()),
        }
    }

    /// Two-valued wire literal published on the response channel.
    #[must_use]
    pub const fn wire_str(&self) -> &'static str {
        match self {
            Self::Approved => "aprobado",
            Self::Rejected(_) => "rechazado",
        }
    }

    /// Whether access was granted.
    #[must_use]
    pub const fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Stateless engine over the store; safe to share across the bus
/// gateway and API handlers.
pub struct ValidationEngine {
    store: Store,
}

impl ValidationEngine {
    /// Build an engine over the given store.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Decide approve/reject for `token_value` presented at the lock
    /// with `lock_label` at time `now`, and append exactly one access
    /// record with a result consistent with the returned decision.
    ///
    /// The wall-clock window is re-checked even when the stored state
    /// is `active`: the sweep flips state only at coarse intervals, so
    /// trusting the state alone would approve tokens for up to one
    /// sweep interval after their window closed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lookup or the record write
    /// fails. A rejected attempt is NOT an error.
    pub fn validate(
        &self,
        token_value: &str,
        lock_label: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, LocknetError> {
        let row = self.store.lookup_validation(token_value, lock_label)?;

        let decision = match &row {
            None => Decision::Rejected(RejectReason::TokenNotFound),
            Some(row) if row.state != crate::model::TokenState::Active => {
                Decision::Rejected(RejectReason::TokenNotActive)
            }
            Some(row) if !row.window_contains(now) => {
                Decision::Rejected(RejectReason::TokenExpired)
            }
            Some(_) => Decision::Approved,
        };

        // Audit trail: for rejections the lock and user references are
        // resolved best-effort, independently of the failed join.
        let (lock_id, user_id) = match &row {
            Some(row) => (Some(row.lock_id), Some(row.user_id)),
            None => (
                self.store.resolve_lock_id(lock_label)?,
                self.store.resolve_token_owner(token_value)?,
            ),
        };
        self.store
            .record_access(lock_id, user_id, token_value, now, &decision.result_text())?;

        match decision {
            Decision::Approved => {
                info!(lock = %lock_label, "Access approved");
                metrics::record_validation("approved", "none");
            }
            Decision::Rejected(reason) => {
                debug!(lock = %lock_label, reason = reason.as_str(), "Access rejected");
                metrics::record_validation("rejected", reason.metric_label());
            }
        }

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn engine_with_reservation() -> (ValidationEngine, Store, DateTime<Utc>) {
        let store = Store::open_in_memory().unwrap();
        store.create_lock("101").unwrap();
        let start = Utc::now();
        store
            .create_reservation("ana", "101", "tok-1", start, start + Duration::days(3))
            .unwrap();
        (ValidationEngine::new(store.clone()), store, start)
    }

    #[test]
    fn test_approves_inside_window() {
        let (engine, store, start) = engine_with_reservation();

        let decision = engine.validate("tok-1", "101", start + Duration::days(1)).unwrap();
        assert_eq!(decision, Decision::Approved);

        let history = store.list_access_records().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].result, "approved");
        assert_eq!(history[0].lock.as_deref(), Some("101"));
        assert_eq!(history[0].user.as_deref(), Some("ana"));
    }

    #[test]
    fn test_rejects_unknown_token_with_best_effort_refs() {
        let (engine, store, start) = engine_with_reservation();

        let decision = engine.validate("ghost", "101", start).unwrap();
        assert_eq!(decision, Decision::Rejected(RejectReason::TokenNotFound));

        let history = store.list_access_records().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].result, "rejected (token not found)");
        // Lock resolved by label even though the join failed.
        assert_eq!(history[0].lock.as_deref(), Some("101"));
        assert_eq!(history[0].user, None);
    }

    #[test]
    fn test_rejects_known_token_at_wrong_lock() {
        let (engine, store, start) = engine_with_reservation();

        let decision = engine.validate("tok-1", "999", start).unwrap();
        assert_eq!(decision, Decision::Rejected(RejectReason::TokenNotFound));

        // Neither side of the join resolved a lock, but the token's
        // owner is still attributed.
        let history = store.list_access_records().unwrap();
        assert_eq!(history[0].lock, None);
        assert_eq!(history[0].user.as_deref(), Some("ana"));
    }

    #[test]
    fn test_rejects_revoked_token() {
        let (engine, store, start) = engine_with_reservation();
        store.revoke_token("tok-1").unwrap();

        let decision = engine.validate("tok-1", "101", start + Duration::days(1)).unwrap();
        assert_eq!(decision, Decision::Rejected(RejectReason::TokenNotActive));
    }

    #[test]
    fn test_rejects_closed_window_despite_active_state() {
        let (engine, store, start) = engine_with_reservation();

        // No sweep has run: the state column still says active.
        assert_eq!(
            store.find_token("tok-1").unwrap().unwrap().state,
            crate::model::TokenState::Active
        );

        let decision = engine.validate("tok-1", "101", start + Duration::days(4)).unwrap();
        assert_eq!(decision, Decision::Rejected(RejectReason::TokenExpired));

        let history = store.list_access_records().unwrap();
        assert_eq!(history[0].result, "rejected (token expired)");
    }

    #[test]
    fn test_rejects_before_window_opens() {
        let (engine, _store, start) = engine_with_reservation();

        let decision = engine.validate("tok-1", "101", start - Duration::hours(1)).unwrap();
        assert_eq!(decision, Decision::Rejected(RejectReason::TokenExpired));
    }

    #[test]
    fn test_every_attempt_writes_exactly_one_record() {
        let (engine, store, start) = engine_with_reservation();

        engine.validate("tok-1", "101", start).unwrap();
        engine.validate("ghost", "101", start).unwrap();
        engine.validate("tok-1", "101", start + Duration::days(5)).unwrap();

        assert_eq!(store.list_access_records().unwrap().len(), 3);
    }

    #[test]
    fn test_wire_mapping() {
        assert_eq!(Decision::Approved.wire_str(), "aprobado");
        assert_eq!(
            Decision::Rejected(RejectReason::TokenExpired).wire_str(),
            "rechazado"
        );
    }
}
