//! Prometheus metrics for the LockNet service.
//!
//! Provides counters for validation decisions, token lifecycle events
//! and bus activity.

use once_cell::sync::Lazy;
use prometheus::{register_counter, register_counter_vec, Counter, CounterVec};

/// Validation decisions counter.
pub static VALIDATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "locknet_validations_total",
        "Total number of validation attempts",
        &["result", "reason"]
    )
    .expect("Failed to register validations metric")
});

/// Reservations counter.
pub static RESERVATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "locknet_reservations_total",
        "Total number of reservation attempts",
        &["status"]
    )
    .expect("Failed to register reservations metric")
});

/// Token revocations counter.
pub static REVOCATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "locknet_revocations_total",
        "Total number of revocation attempts",
        &["status"]
    )
    .expect("Failed to register revocations metric")
});

/// Tokens expired by the sweep.
pub static TOKENS_EXPIRED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locknet_tokens_expired_total",
        "Total number of tokens transitioned to expired by the sweep"
    )
    .expect("Failed to register tokens_expired metric")
});

/// Bus publish attempts counter.
pub static BUS_PUBLISHES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "locknet_bus_publishes_total",
        "Total number of bus publish attempts",
        &["channel", "status"]
    )
    .expect("Failed to register bus_publishes metric")
});

/// Bus reconnection attempts counter.
pub static BUS_RECONNECTS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "locknet_bus_reconnects_total",
        "Total number of bus reconnection attempts"
    )
    .expect("Failed to register bus_reconnects metric")
});

/// Record a validation decision.
pub fn record_validation(result: &str, reason: &str) {
    VALIDATIONS.with_label_values(&[result, reason]).inc();
}

/// Record a reservation attempt.
pub fn record_reservation(status: &str) {
    RESERVATIONS.with_label_values(&[status]).inc();
}

/// Record a revocation attempt.
pub fn record_revocation(status: &str) {
    REVOCATIONS.with_label_values(&[status]).inc();
}

/// Record the tokens expired by one sweep.
pub fn record_swept(count: usize) {
    TOKENS_EXPIRED.inc_by(count as f64);
}

/// Record a bus publish attempt.
pub fn record_bus_publish(channel: &str, status: &str) {
    BUS_PUBLISHES.with_label_values(&[channel, status]).inc();
}

/// Record a bus reconnection attempt.
pub fn record_bus_reconnect() {
    BUS_RECONNECTS.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_validation() {
        record_validation("rejected", "token_expired");
        let value = VALIDATIONS
            .with_label_values(&["rejected", "token_expired"])
            .get();
        assert!(value > 0.0);
    }

    #[test]
    fn test_record_swept() {
        record_swept(3);
        assert!(TOKENS_EXPIRED.get() >= 3.0);
    }
}
