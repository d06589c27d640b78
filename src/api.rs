//! Access API: the synchronous request/response surface used by
//! external callers (UI, CLI, admin tools).
//!
//! This is the call contract only; the concrete transport (HTTP or
//! otherwise) is an external collaborator that wraps these methods.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::LocknetError;
use crate::lifecycle::{LifecycleManager, Reservation};
use crate::model::Lock;
use crate::store::{AccessEntry, Store, TokenDetails};

/// One lock as reported by List locks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockView {
    /// Row id.
    pub id: i64,
    /// Unique location label.
    pub label: String,
    /// Coarse current state.
    pub state: String,
}

impl From<Lock> for LockView {
    fn from(lock: Lock) -> Self {
        Self {
            id: lock.id,
            label: lock.label,
            state: lock.state,
        }
    }
}

/// The Access API service.
pub struct AccessApi {
    store: Store,
    lifecycle: Arc<LifecycleManager>,
    default_validity: chrono::Duration,
}

impl AccessApi {
    /// Build the API over the store and lifecycle manager.
    /// `default_validity` is applied to reservations, which the call
    /// contract creates without an explicit duration.
    #[must_use]
    pub fn new(
        store: Store,
        lifecycle: Arc<LifecycleManager>,
        default_validity: chrono::Duration,
    ) -> Self {
        Self {
            store,
            lifecycle,
            default_validity,
        }
    }

    /// List all locks.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn list_locks(&self) -> Result<Vec<LockView>, LocknetError> {
        Ok(self
            .store
            .list_locks()?
            .into_iter()
            .map(LockView::from)
            .collect())
    }

    /// Create a lock with the given label.
    ///
    /// # Errors
    ///
    /// [`LocknetError::LabelTaken`] if the label already exists.
    pub fn create_lock(&self, label: &str) -> Result<LockView, LocknetError> {
        let lock = self.store.create_lock(label)?;
        info!(label = %label, "Created lock");
        Ok(lock.into())
    }

    /// Create a reservation for `(user_name, lock_label)` with the
    /// default validity window.
    ///
    /// # Errors
    ///
    /// [`LocknetError::LockNotFound`] or
    /// [`LocknetError::LockAlreadyReserved`].
    pub async fn create_reservation(
        &self,
        user_name: &str,
        lock_label: &str,
    ) -> Result<Reservation, LocknetError> {
        self.lifecycle
            .create_reservation(user_name, lock_label, self.default_validity)
            .await
    }

    /// Revoke the token with the given value.
    ///
    /// # Errors
    ///
    /// [`LocknetError::TokenNotFound`] or
    /// [`LocknetError::TokenNotActive`].
    pub fn revoke_token(&self, token_value: &str) -> Result<(), LocknetError> {
        self.lifecycle.revoke_token(token_value)
    }

    /// List all tokens with their user, lock and window.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn list_tokens(&self) -> Result<Vec<TokenDetails>, LocknetError> {
        self.store.list_tokens()
    }

    /// List the access history, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn list_access_history(&self) -> Result<Vec<AccessEntry>, LocknetError> {
        self.store.list_access_records()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TokenState;

    fn api() -> AccessApi {
        let store = Store::open_in_memory().unwrap();
        let lifecycle = Arc::new(LifecycleManager::new(store.clone(), None));
        AccessApi::new(store, lifecycle, chrono::Duration::days(3))
    }

    #[tokio::test]
    async fn test_lock_round_trip() {
        let api = api();
        let created = api.create_lock("101").unwrap();
        assert_eq!(created.label, "101");
        assert_eq!(created.state, "free");

        let locks = api.list_locks().unwrap();
        assert_eq!(locks.len(), 1);

        let err = api.create_lock("101").unwrap_err();
        assert!(matches!(err, LocknetError::LabelTaken(_)));
    }

    #[tokio::test]
    async fn test_reservation_uses_default_validity() {
        let api = api();
        api.create_lock("101").unwrap();

        let reservation = api.create_reservation("ana", "101").await.unwrap();
        assert_eq!(reservation.end - reservation.start, chrono::Duration::days(3));

        let tokens = api.list_tokens().unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].user, "ana");
        assert_eq!(tokens[0].lock, "101");
        assert_eq!(tokens[0].state, TokenState::Active);
    }

    #[tokio::test]
    async fn test_revoke_through_api() {
        let api = api();
        api.create_lock("101").unwrap();
        let reservation = api.create_reservation("ana", "101").await.unwrap();

        api.revoke_token(&reservation.token).unwrap();
        assert_eq!(api.list_tokens().unwrap()[0].state, TokenState::Revoked);

        assert!(matches!(
            api.revoke_token(&reservation.token),
            Err(LocknetError::TokenNotActive)
        ));
        assert!(matches!(
            api.revoke_token("missing"),
            Err(LocknetError::TokenNotFound)
        ));
    }

    #[tokio::test]
    async fn test_views_serialize() {
        let api = api();
        api.create_lock("101").unwrap();
        api.create_reservation("ana", "101").await.unwrap();

        let locks = serde_json::to_value(api.list_locks().unwrap()).unwrap();
        assert_eq!(locks[0]["label"], "101");

        let tokens = serde_json::to_value(api.list_tokens().unwrap()).unwrap();
        assert_eq!(tokens[0]["state"], "active");
    }
}
