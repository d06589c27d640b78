//! Domain entities persisted by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a token.
///
/// The state is monotonic: `Active` may transition to `Expired` or
/// `Revoked`; nothing transitions out of `Expired` or `Revoked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenState {
    /// Token may grant access while its window is open.
    Active,
    /// Validity window closed; flipped by the sweep.
    Expired,
    /// Explicitly revoked before its window closed.
    Revoked,
}

impl TokenState {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    /// Parse the stored representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// A registered user. Created implicitly the first time a reservation
/// names them; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Row id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Unique contact handle; synthesized on implicit creation.
    pub email: String,
}

/// A physical lock, identified by a unique human-readable label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    /// Row id.
    pub id: i64,
    /// Unique location label, e.g. a room number.
    pub label: String,
    /// Coarse current state; created as `"free"`. This core persists
    /// and reports it but never transitions it.
    pub state: String,
}

/// An authorization token bound to a (user, lock) pair for a bounded
/// validity window `[start_at, end_at)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Row id.
    pub id: i64,
    /// Owning user.
    pub user_id: i64,
    /// Bound lock.
    pub lock_id: i64,
    /// Opaque unique secret value.
    pub value: String,
    /// Window start (inclusive).
    pub start_at: DateTime<Utc>,
    /// Window end (exclusive).
    pub end_at: DateTime<Utc>,
    /// Lifecycle state.
    pub state: TokenState,
}

impl Token {
    /// Whether `now` falls inside the validity window `[start_at, end_at)`.
    ///
    /// Checked independently of `state` during validation: the sweep
    /// flips state only at coarse intervals, so a token can be
    /// lifecycle-active yet already outside its window.
    #[must_use]
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        self.start_at <= now && now < self.end_at
    }
}

/// Immutable audit entry for one validation attempt. Lock and user
/// references are nullable so unresolvable attempts still leave a
/// durable trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRecord {
    /// Row id.
    pub id: i64,
    /// Lock involved, if its label resolved.
    pub lock_id: Option<i64>,
    /// User involved, if the token value resolved to an owner.
    pub user_id: Option<i64>,
    /// Raw token value presented.
    pub token_value: String,
    /// Time of the attempt.
    pub at: DateTime<Utc>,
    /// `approved` or `rejected (<reason>)`.
    pub result: String,
}
