//! Configuration types for NEARPAY

use crate::error::PaymentError;
use crate::traits::PaymentResult;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Well-known identifier peers use to find the payment submission service
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x3357a7bb_762d_464a_8d9a_dca592d57d5b);

/// Human-readable name the service is advertised under
pub const SERVICE_NAME: &str = "Bitcoin Transaction Submission";

/// Largest frame accepted from a peer by default (1 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Main node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name for logging
    pub name: String,

    /// Logging level, overridden by `RUST_LOG`
    pub log_level: String,

    /// Listener configuration
    pub listener: ListenerConfig,

    /// Sending side configuration
    pub client: ClientConfig,

    /// Relay validator configuration
    pub relay: RelayConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "nearpay-node".to_string(),
            log_level: "info".to_string(),
            listener: ListenerConfig::default(),
            client: ClientConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_json(json: &str) -> PaymentResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> PaymentResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> PaymentResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PaymentError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Write configuration to a JSON file
    pub fn save(&self, path: &Path) -> PaymentResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Local address the service endpoint binds to
    pub listen_addr: String,

    /// Name the service is advertised under
    pub service_name: String,

    /// Identifier the service is advertised under
    pub service_uuid: Uuid,

    /// Largest request frame accepted, in bytes
    pub max_frame_size: u32,

    /// Optional note attached to every acknowledgment
    pub ack_memo: Option<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8338".to_string(),
            service_name: SERVICE_NAME.to_string(),
            service_uuid: SERVICE_UUID,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            ack_memo: None,
        }
    }
}

impl ListenerConfig {
    pub fn socket_addr(&self) -> PaymentResult<SocketAddr> {
        self.listen_addr
            .parse()
            .map_err(|_| PaymentError::InvalidAddress(self.listen_addr.clone()))
    }
}

/// Sending side configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// How long to wait for an acknowledgment, in milliseconds
    pub ack_timeout_ms: u64,

    /// Largest acknowledgment frame accepted, in bytes
    pub max_frame_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            ack_timeout_ms: 10000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Relay validator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Largest transaction accepted for relay, in bytes
    pub max_tx_size: usize,

    /// Pending relay queue capacity
    pub queue_capacity: usize,

    /// Transaction ids remembered for de-duplication; the oldest is
    /// forgotten first
    pub max_seen: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_tx_size: 100_000,
            queue_capacity: 1000,
            max_seen: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_listener_config() {
        let config = ListenerConfig::default();

        assert_eq!(config.service_uuid, SERVICE_UUID);
        assert_eq!(config.service_name, SERVICE_NAME);
        assert_eq!(config.socket_addr().unwrap().port(), 8338);
    }

    #[test]
    fn test_invalid_listen_addr() {
        let config = ListenerConfig {
            listen_addr: "not-an-address".into(),
            ..Default::default()
        };

        assert!(matches!(
            config.socket_addr(),
            Err(PaymentError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = NodeConfig::from_json(r#"{ "listener": { "ack_memo": "thanks" } }"#).unwrap();

        assert_eq!(config.listener.ack_memo.as_deref(), Some("thanks"));
        assert_eq!(config.listener.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(config.log_level, "info");

        let config = NodeConfig::from_json(r#"{ "relay": { "max_tx_size": 10 } }"#).unwrap();
        assert_eq!(config.relay.max_tx_size, 10);
        assert_eq!(config.relay.max_seen, 10_000);
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");

        let mut config = NodeConfig::default();
        config.listener.listen_addr = "127.0.0.1:9000".into();
        config.relay.max_tx_size = 512;
        config.save(&path).unwrap();

        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = NodeConfig::load(&dir.path().join("absent.json")).unwrap_err();

        assert!(matches!(err, PaymentError::Config(_)));
    }
}
