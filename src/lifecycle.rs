//! Token lifecycle management: reservation creation, revocation and
//! the periodic expiry sweep.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::bus::BusPublisher;
use crate::error::LocknetError;
use crate::metrics;
use crate::store::Store;

/// Generator for opaque token secret values.
pub struct TokenGenerator;

impl TokenGenerator {
    /// Generate a cryptographically-random token value: 32 random
    /// bytes, URL-safe base64 without padding (43 characters).
    #[must_use]
    pub fn generate() -> String {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; 32] = rng.gen();
        URL_SAFE_NO_PAD.encode(random_bytes)
    }
}

/// Human-readable echo of a newly created reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// User the token was issued to.
    pub user: String,
    /// Lock label the token is bound to.
    pub lock: String,
    /// The token secret value.
    pub token: String,
    /// Window start (inclusive).
    pub start: DateTime<Utc>,
    /// Window end (exclusive).
    pub end: DateTime<Utc>,
}

/// Creates tokens bound to (user, lock) pairs, revokes them on demand,
/// and retires them once they age out.
pub struct LifecycleManager {
    store: Store,
    publisher: Option<BusPublisher>,
}

impl LifecycleManager {
    /// Build a manager. `publisher` is optional: without a bus the
    /// reservation side effect is skipped and everything else works
    /// unchanged.
    #[must_use]
    pub fn new(store: Store, publisher: Option<BusPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Create a reservation: issue a fresh token for `(user_name,
    /// lock_label)` valid for `validity` from now, and best-effort
    /// publish the token value to the lock's assign channel. The
    /// reservation is durable before the publish is attempted; a
    /// publish failure is logged, never surfaced.
    ///
    /// # Errors
    ///
    /// [`LocknetError::LockNotFound`] if the label does not resolve;
    /// [`LocknetError::LockAlreadyReserved`] if an active, non-expired
    /// token already exists for the lock.
    pub async fn create_reservation(
        &self,
        user_name: &str,
        lock_label: &str,
        validity: Duration,
    ) -> Result<Reservation, LocknetError> {
        let value = TokenGenerator::generate();
        let start = Utc::now();
        let end = start + validity;

        let token = match self
            .store
            .create_reservation(user_name, lock_label, &value, start, end)
        {
            Ok(token) => token,
            Err(e) => {
                metrics::record_reservation("rejected");
                return Err(e);
            }
        };

        info!(
            user = %user_name,
            lock = %lock_label,
            token_id = token.id,
            end = %end,
            "Created reservation"
        );
        metrics::record_reservation("created");

        if let Some(publisher) = &self.publisher {
            publisher.publish_token(lock_label, &value).await;
        }

        Ok(Reservation {
            user: user_name.to_string(),
            lock: lock_label.to_string(),
            token: value,
            start,
            end,
        })
    }

    /// Transition a token from `active` to `revoked`.
    ///
    /// # Errors
    ///
    /// [`LocknetError::TokenNotFound`] if no such token exists;
    /// [`LocknetError::TokenNotActive`] if it is not active. Repeated
    /// revocation fails with `TokenNotActive`, it never panics.
    pub fn revoke_token(&self, token_value: &str) -> Result<(), LocknetError> {
        match self.store.revoke_token(token_value) {
            Ok(()) => {
                info!("Revoked token");
                metrics::record_revocation("revoked");
                Ok(())
            }
            Err(e @ LocknetError::TokenNotFound) => {
                metrics::record_revocation("not_found");
                Err(e)
            }
            Err(e @ LocknetError::TokenNotActive) => {
                metrics::record_revocation("not_active");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Transition every active token whose window ended at or before
    /// `now` to `expired`. Returns the number transitioned. Safe to
    /// run concurrently with validation and reservation creation.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, LocknetError> {
        let count = self.store.expire_tokens(now)?;
        if count > 0 {
            info!(count, "Swept expired tokens");
        }
        metrics::record_swept(count);
        Ok(count)
    }

    /// Run the sweep on a fixed period until shutdown. Fire-and-forget
    /// from the caller's perspective; a failed sweep is logged and the
    /// next tick tries again.
    pub async fn run_sweeper(
        self: Arc<Self>,
        period: StdDuration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_expired(Utc::now()) {
                        error!(error = %e, "Expiry sweep failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Expiry sweeper shutting down");
                    break;
                }
            }
        }
    }
}
