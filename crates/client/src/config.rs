//! Client configuration.
//!
//! Fixed at construction. Durations are carried as milliseconds when the
//! configuration is (de)serialized, e.g. `heartbeat_interval_ms = 25000`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use livewire_protocol::constants;

use crate::error::ClientError;

/// Configuration recognised by [`Client`](crate::Client).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint, `ws://` or `wss://`.
    pub endpoint: String,

    /// Opaque credential forwarded in the auth frame.
    pub credential: String,

    /// Stable device identifier. See [`DeviceIdentity`](crate::DeviceIdentity).
    pub device_id: String,

    pub auto_reconnect: bool,

    /// Failed attempts (including unexpected closures) tolerated before
    /// reconnection stops and a terminal error is raised.
    pub max_reconnect_attempts: u32,

    #[serde(rename = "reconnect_base_delay_ms", with = "duration_ms")]
    pub reconnect_base_delay: Duration,

    #[serde(rename = "heartbeat_interval_ms", with = "duration_ms")]
    pub heartbeat_interval: Duration,

    #[serde(rename = "heartbeat_timeout_ms", with = "duration_ms")]
    pub heartbeat_timeout: Duration,

    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,

    #[serde(rename = "write_timeout_ms", with = "duration_ms")]
    pub write_timeout: Duration,

    pub outbound_queue_capacity: usize,

    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            credential: String::new(),
            device_id: String::new(),
            auto_reconnect: true,
            max_reconnect_attempts: constants::MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: constants::RECONNECT_BASE_DELAY,
            heartbeat_interval: constants::HEARTBEAT_INTERVAL,
            heartbeat_timeout: constants::HEARTBEAT_TIMEOUT,
            connect_timeout: constants::CONNECT_TIMEOUT,
            write_timeout: constants::WRITE_TIMEOUT,
            outbound_queue_capacity: constants::OUTBOUND_QUEUE_CAPACITY,
            max_frame_size: constants::MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with defaults for everything but identity.
    pub fn new(
        endpoint: impl Into<String>,
        credential: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential: credential.into(),
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    /// Checks the configuration for values the client cannot run with.
    ///
    /// A heartbeat timeout at or above the interval is accepted with a warning.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.endpoint.is_empty() {
            return Err(ClientError::InvalidConfig("endpoint is empty".into()));
        }
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(ClientError::InvalidConfig(format!(
                "endpoint `{}` is not a ws:// or wss:// URL",
                self.endpoint
            )));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ClientError::InvalidConfig(
                "outbound_queue_capacity must be at least 1".into(),
            ));
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_timeout.is_zero() {
            return Err(ClientError::InvalidConfig(
                "heartbeat interval and timeout must be non-zero".into(),
            ));
        }
        if self.heartbeat_timeout >= self.heartbeat_interval {
            warn!(
                interval_ms = self.heartbeat_interval.as_millis() as u64,
                timeout_ms = self.heartbeat_timeout.as_millis() as u64,
                "heartbeat timeout is not shorter than the interval"
            );
        }
        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("credential", &"<redacted>")
            .field("device_id", &self.device_id)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("reconnect_base_delay", &self.reconnect_base_delay)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("heartbeat_timeout", &self.heartbeat_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("outbound_queue_capacity", &self.outbound_queue_capacity)
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ClientConfig {
        ClientConfig::new("ws://localhost:9000/stream", "token", "device-1")
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert!(config.auto_reconnect);
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.reconnect_base_delay, Duration::from_secs(1));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(25));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(10));
        assert_eq!(config.outbound_queue_capacity, 100);
    }

    #[test]
    fn validate_accepts_defaults_with_endpoint() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_endpoints() {
        let mut config = valid();
        config.endpoint.clear();
        assert!(matches!(config.validate(), Err(ClientError::InvalidConfig(_))));

        config.endpoint = "http://localhost".into();
        assert!(matches!(config.validate(), Err(ClientError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let mut config = valid();
        config.outbound_queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_tolerates_long_heartbeat_timeout() {
        let mut config = valid();
        config.heartbeat_timeout = config.heartbeat_interval * 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn debug_redacts_credential() {
        let out = format!("{:?}", valid());
        assert!(out.contains("<redacted>"));
        assert!(!out.contains("token"));
    }

    #[test]
    fn deserialize_uses_millisecond_keys_and_defaults() {
        let config: ClientConfig = serde_json::from_value(serde_json::json!({
            "endpoint": "wss://chat.example.com/ws",
            "credential": "abc",
            "heartbeat_interval_ms": 1000,
            "heartbeat_timeout_ms": 500,
        }))
        .unwrap();
        assert_eq!(config.heartbeat_interval, Duration::from_millis(1000));
        assert_eq!(config.heartbeat_timeout, Duration::from_millis(500));
        assert_eq!(config.reconnect_base_delay, Duration::from_secs(1));
        assert!(config.device_id.is_empty());
    }

    #[test]
    fn serialize_writes_millisecond_keys() {
        let json = serde_json::to_value(valid()).unwrap();
        assert_eq!(json["reconnect_base_delay_ms"], 1000);
        assert_eq!(json["heartbeat_interval_ms"], 25000);
        assert!(json.get("heartbeat_interval").is_none());
    }
}
