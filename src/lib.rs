//! LockNet service library.
//!
//! Grants or denies physical-lock access based on short-lived
//! authorization tokens. Provides the durable store, token lifecycle
//! management (reservation, revocation, expiry sweep), the validation
//! engine with its audit trail, and the MQTT bus gateway.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod bus;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod model;
pub mod store;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::LocknetError;
