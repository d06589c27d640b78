//! Durable persistence for users, locks, tokens and access records,
//! backed by SQLite.
//!
//! All multi-step operations run inside a single immediate transaction
//! so concurrent callers never observe partial writes. In particular
//! the reservation check-then-insert is one atomic unit: two
//! concurrent reservations for the same lock cannot both observe "no
//! active token". No component outside this module touches the
//! connection.
//!
//! Timestamps are stored as integer Unix milliseconds.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::error::LocknetError;
use crate::model::{AccessRecord, Lock, Token, TokenState};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    name  TEXT NOT NULL,
    email TEXT UNIQUE NOT NULL
);

CREATE TABLE IF NOT EXISTS locks (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT NOT NULL UNIQUE,
    state TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tokens (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL REFERENCES users(id),
    lock_id     INTEGER NOT NULL REFERENCES locks(id),
    value       TEXT UNIQUE NOT NULL,
    start_at_ms INTEGER NOT NULL,
    end_at_ms   INTEGER NOT NULL,
    state       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS access_records (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    lock_id     INTEGER REFERENCES locks(id),
    user_id     INTEGER REFERENCES users(id),
    token_value TEXT NOT NULL,
    at_ms       INTEGER NOT NULL,
    result      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tokens_lock_state ON tokens(lock_id, state);
CREATE INDEX IF NOT EXISTS idx_access_records_at ON access_records(at_ms);
";

/// Token row joined with its user and lock, as needed by listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDetails {
    /// Token secret value.
    pub token: String,
    /// Owning user's display name.
    pub user: String,
    /// Bound lock's label.
    pub lock: String,
    /// Window start (inclusive).
    pub start: DateTime<Utc>,
    /// Window end (exclusive).
    pub end: DateTime<Utc>,
    /// Lifecycle state.
    pub state: TokenState,
}

/// Access record joined with lock label and user name. The joins are
/// outer: unresolved references render as `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEntry {
    /// Record id.
    pub id: i64,
    /// Lock label, if the lock resolved when the record was written.
    pub lock: Option<String>,
    /// User name, if the token owner resolved.
    pub user: Option<String>,
    /// Raw token value presented.
    pub token: String,
    /// Time of the attempt.
    pub at: DateTime<Utc>,
    /// `approved` or `rejected (<reason>)`.
    pub result: String,
}

/// Result of the Token ⋈ User ⋈ Lock join performed for validation.
#[derive(Debug, Clone)]
pub struct ValidationRow {
    /// Token row id.
    pub token_id: i64,
    /// Lifecycle state at lookup time.
    pub state: TokenState,
    /// Window start (inclusive).
    pub start_at: DateTime<Utc>,
    /// Window end (exclusive).
    pub end_at: DateTime<Utc>,
    /// Owning user.
    pub user_id: i64,
    /// Bound lock.
    pub lock_id: i64,
}

impl ValidationRow {
    /// Whether `now` falls inside `[start_at, end_at)`.
    #[must_use]
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        self.start_at <= now && now < self.end_at
    }
}

/// SQLite-backed store. Cheap to clone; all clones share one
/// serialized connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and ensure the
    /// schema exists.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file cannot be opened or the
    /// schema cannot be created.
    pub fn open(path: &str) -> Result<Self, LocknetError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database. Used by tests.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, LocknetError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, LocknetError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A poisoned mutex only means another thread panicked while
        // holding the guard; the connection itself is still usable.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a lock with the given label in state `"free"`.
    ///
    /// # Errors
    ///
    /// Returns [`LocknetError::LabelTaken`] if the label exists.
    pub fn create_lock(&self, label: &str) -> Result<Lock, LocknetError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<i64> = tx
            .query_row("SELECT id FROM locks WHERE label = ?1", params![label], |row| {
                row.get(0)
            })
            .optional()?;
        if existing.is_some() {
            return Err(LocknetError::LabelTaken(label.to_string()));
        }

        tx.execute(
            "INSERT INTO locks (label, state) VALUES (?1, ?2)",
            params![label, "free"],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Lock {
            id,
            label: label.to_string(),
            state: "free".to_string(),
        })
    }

    /// List all locks.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn list_locks(&self) -> Result<Vec<Lock>, LocknetError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, label, state FROM locks ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Lock {
                id: row.get(0)?,
                label: row.get(1)?,
                state: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Transactionally create a reservation: resolve the lock, reject
    /// if an active non-expired token exists, get-or-create the user,
    /// and insert the token in state `active`. Either all writes land
    /// or none do.
    ///
    /// # Errors
    ///
    /// [`LocknetError::LockNotFound`] if the label does not resolve;
    /// [`LocknetError::LockAlreadyReserved`] if an active token with
    /// `end_at > start` exists for the lock.
    pub fn create_reservation(
        &self,
        user_name: &str,
        lock_label: &str,
        token_value: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Token, LocknetError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let lock_id: i64 = tx
            .query_row(
                "SELECT id FROM locks WHERE label = ?1",
                params![lock_label],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| LocknetError::LockNotFound(lock_label.to_string()))?;

        let active: Option<i64> = tx
            .query_row(
                "SELECT id FROM tokens
                 WHERE lock_id = ?1 AND state = 'active' AND end_at_ms > ?2",
                params![lock_id, start.timestamp_millis()],
                |row| row.get(0),
            )
            .optional()?;
        if active.is_some() {
            return Err(LocknetError::LockAlreadyReserved(lock_label.to_string()));
        }

        // Implicit user creation stays inside the same transaction so a
        // concurrent reservation naming the same new user cannot create
        // a duplicate row.
        let user_id: i64 = match tx
            .query_row(
                "SELECT id FROM users WHERE name = ?1",
                params![user_name],
                |row| row.get(0),
            )
            .optional()?
        {
            Some(id) => id,
            None => {
                tx.execute(
                    "INSERT INTO users (name, email) VALUES (?1, ?2)",
                    params![user_name, format!("{user_name}@demo.local")],
                )?;
                tx.last_insert_rowid()
            }
        };

        tx.execute(
            "INSERT INTO tokens (user_id, lock_id, value, start_at_ms, end_at_ms, state)
             VALUES (?1, ?2, ?3, ?4, ?5, 'active')",
            params![
                user_id,
                lock_id,
                token_value,
                start.timestamp_millis(),
                end.timestamp_millis()
            ],
        )?;
        let token_id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Token {
            id: token_id,
            user_id,
            lock_id,
            value: token_value.to_string(),
            start_at: start,
            end_at: end,
            state: TokenState::Active,
        })
    }

    /// Look up a token by its value.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn find_token(&self, value: &str) -> Result<Option<Token>, LocknetError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, user_id, lock_id, value, start_at_ms, end_at_ms, state
                 FROM tokens WHERE value = ?1",
                params![value],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((id, user_id, lock_id, value, start_ms, end_ms, state)) => Ok(Some(Token {
                id,
                user_id,
                lock_id,
                value,
                start_at: datetime_from_ms(start_ms),
                end_at: datetime_from_ms(end_ms),
                state: parse_state(&state)?,
            })),
        }
    }

    /// Transition a token from `active` to `revoked`.
    ///
    /// # Errors
    ///
    /// [`LocknetError::TokenNotFound`] if no such token exists;
    /// [`LocknetError::TokenNotActive`] if it is already expired or
    /// revoked (repeated revocation fails the same way, it never
    /// panics).
    pub fn revoke_token(&self, value: &str) -> Result<(), LocknetError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let state: Option<String> = tx
            .query_row(
                "SELECT state FROM tokens WHERE value = ?1",
                params![value],
                |row| row.get(0),
            )
            .optional()?;

        match state.as_deref() {
            None => Err(LocknetError::TokenNotFound),
            Some(s) if s != TokenState::Active.as_str() => Err(LocknetError::TokenNotActive),
            Some(_) => {
                tx.execute(
                    "UPDATE tokens SET state = 'revoked' WHERE value = ?1",
                    params![value],
                )?;
                tx.commit()?;
                Ok(())
            }
        }
    }

    /// Transition every active token whose window ended at or before
    /// `now` to `expired`. Returns the number of tokens transitioned.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    pub fn expire_tokens(&self, now: DateTime<Utc>) -> Result<usize, LocknetError> {
        let conn = self.conn();
        let count = conn.execute(
            "UPDATE tokens SET state = 'expired'
             WHERE state = 'active' AND end_at_ms <= ?1",
            params![now.timestamp_millis()],
        )?;
        Ok(count)
    }

    /// Join Token ⋈ User ⋈ Lock on (token value, lock label).
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn lookup_validation(
        &self,
        token_value: &str,
        lock_label: &str,
    ) -> Result<Option<ValidationRow>, LocknetError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT t.id, t.state, t.start_at_ms, t.end_at_ms, u.id, l.id
                 FROM tokens t
                 JOIN users u ON t.user_id = u.id
                 JOIN locks l ON t.lock_id = l.id
                 WHERE t.value = ?1 AND l.label = ?2",
                params![token_value, lock_label],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((token_id, state, start_ms, end_ms, user_id, lock_id)) => Ok(Some(ValidationRow {
                token_id,
                state: parse_state(&state)?,
                start_at: datetime_from_ms(start_ms),
                end_at: datetime_from_ms(end_ms),
                user_id,
                lock_id,
            })),
        }
    }

    /// Best-effort resolution of a lock id by label, for audit records.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn resolve_lock_id(&self, label: &str) -> Result<Option<i64>, LocknetError> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id FROM locks WHERE label = ?1",
            params![label],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Best-effort resolution of a token's owning user, for audit
    /// records.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn resolve_token_owner(&self, token_value: &str) -> Result<Option<i64>, LocknetError> {
        let conn = self.conn();
        conn.query_row(
            "SELECT user_id FROM tokens WHERE value = ?1",
            params![token_value],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Append an access record. Records are never mutated or deleted.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the insert fails.
    pub fn record_access(
        &self,
        lock_id: Option<i64>,
        user_id: Option<i64>,
        token_value: &str,
        at: DateTime<Utc>,
        result: &str,
    ) -> Result<AccessRecord, LocknetError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO access_records (lock_id, user_id, token_value, at_ms, result)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![lock_id, user_id, token_value, at.timestamp_millis(), result],
        )?;
        Ok(AccessRecord {
            id: conn.last_insert_rowid(),
            lock_id,
            user_id,
            token_value: token_value.to_string(),
            at,
            result: result.to_string(),
        })
    }

    /// List all tokens joined with user name and lock label.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn list_tokens(&self) -> Result<Vec<TokenDetails>, LocknetError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t.value, u.name, l.label, t.start_at_ms, t.end_at_ms, t.state
             FROM tokens t
             JOIN users u ON t.user_id = u.id
             JOIN locks l ON t.lock_id = l.id
             ORDER BY t.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (token, user, lock, start_ms, end_ms, state) = row?;
            out.push(TokenDetails {
                token,
                user,
                lock,
                start: datetime_from_ms(start_ms),
                end: datetime_from_ms(end_ms),
                state: parse_state(&state)?,
            });
        }
        Ok(out)
    }

    /// List the access history, newest first. Lock and user are outer
    /// joins: unresolved references come back as `None`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn list_access_records(&self) -> Result<Vec<AccessEntry>, LocknetError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT a.id, l.label, u.name, a.token_value, a.at_ms, a.result
             FROM access_records a
             LEFT JOIN locks l ON a.lock_id = l.id
             LEFT JOIN users u ON a.user_id = u.id
             ORDER BY a.at_ms DESC, a.id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AccessEntry {
                id: row.get(0)?,
                lock: row.get(1)?,
                user: row.get(2)?,
                token: row.get(3)?,
                at: datetime_from_ms(row.get(4)?),
                result: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Number of access records for the lock with the given label.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn count_access_records_for_lock(&self, label: &str) -> Result<i64, LocknetError> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*) FROM access_records a
             JOIN locks l ON a.lock_id = l.id
             WHERE l.label = ?1",
            params![label],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }
}

fn parse_state(s: &str) -> Result<TokenState, LocknetError> {
    TokenState::parse(s)
        .ok_or_else(|| LocknetError::Storage(format!("unknown token state: {s}")))
}

fn datetime_from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}
