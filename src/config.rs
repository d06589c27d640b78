//! Centralized configuration for the LockNet service.
//!
//! All configuration is loaded from environment variables and validated
//! at startup.

use crate::error::LocknetError;
use std::env;
use std::time::Duration;

/// Reference deployment sweeps expired tokens every 5 minutes.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
/// Reservations default to a 3-day validity window.
const DEFAULT_RESERVATION_VALIDITY_SECS: i64 = 259_200;

/// LockNet service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // Persistence
    /// Path of the SQLite database file.
    pub database_path: String,

    // Message bus
    /// MQTT broker host.
    pub mqtt_host: String,
    /// MQTT broker port.
    pub mqtt_port: u16,
    /// MQTT client identifier.
    pub mqtt_client_id: String,
    /// Topic prefix; topics are `<prefix>/<lock>/<channel>`.
    pub topic_prefix: String,
    /// Delay between bus reconnection attempts.
    pub bus_reconnect_delay: Duration,

    // Lifecycle
    /// Period of the expired-token sweep.
    pub sweep_interval: Duration,
    /// Validity window applied to reservations created through the
    /// Access API.
    pub reservation_validity: chrono::Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, LocknetError> {
        dotenvy::dotenv().ok();

        let database_path =
            env::var("DATABASE_PATH").unwrap_or_else(|_| "locknet.db".to_string());

        let mqtt_host = env::var("MQTT_HOST").unwrap_or_else(|_| "localhost".to_string());
        let mqtt_port = parse_env("MQTT_PORT", 1883)?;
        let mqtt_client_id =
            env::var("MQTT_CLIENT_ID").unwrap_or_else(|_| "locknet-service".to_string());
        let topic_prefix = env::var("MQTT_TOPIC_PREFIX").unwrap_or_else(|_| "locknet".to_string());
        let bus_reconnect_delay =
            Duration::from_secs(parse_env("BUS_RECONNECT_DELAY_SECS", 5)?);

        let sweep_interval = Duration::from_secs(parse_env(
            "SWEEP_INTERVAL_SECS",
            DEFAULT_SWEEP_INTERVAL_SECS,
        )?);
        let validity_secs = parse_env(
            "RESERVATION_VALIDITY_SECS",
            DEFAULT_RESERVATION_VALIDITY_SECS,
        )?;
        if validity_secs <= 0 {
            return Err(LocknetError::config(format!(
                "RESERVATION_VALIDITY_SECS must be positive, got {validity_secs}"
            )));
        }
        let reservation_validity = chrono::Duration::seconds(validity_secs);

        Ok(Self {
            database_path,
            mqtt_host,
            mqtt_port,
            mqtt_client_id,
            topic_prefix,
            bus_reconnect_delay,
            sweep_interval,
            reservation_validity,
        })
    }
}

/// Parse environment variable with default value.
fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, LocknetError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .parse()
            .map_err(|e| LocknetError::config(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment mutations must not interleave across tests.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_config_from_env_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("DATABASE_PATH");
        env::remove_var("MQTT_HOST");
        env::remove_var("MQTT_PORT");
        env::remove_var("MQTT_TOPIC_PREFIX");
        env::remove_var("SWEEP_INTERVAL_SECS");
        env::remove_var("RESERVATION_VALIDITY_SECS");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_path, "locknet.db");
        assert_eq!(config.mqtt_host, "localhost");
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.topic_prefix, "locknet");
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.reservation_validity, chrono::Duration::days(3));
    }

    #[test]
    fn test_invalid_port_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("MQTT_PORT", "not-a-port");
        let result = Config::from_env();
        env::remove_var("MQTT_PORT");
        assert!(matches!(result, Err(LocknetError::Config(_))));
    }
}
