//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (RELAY_*)
//! - TOML configuration file

use anyhow::{bail, Context, Result};
use relay_core::{DispatcherConfig, RegistryConfig};
use relay_protocol::codec::MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "RELAY_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Presence configuration.
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Drop a channel's entry when its last subscriber leaves.
    #[serde(default = "default_true")]
    pub prune_empty_channels: bool,
}

/// Presence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Heartbeat staleness threshold in milliseconds.
    #[serde(default = "default_presence_timeout")]
    pub timeout_ms: u64,

    /// Sweep period in milliseconds. Defaults to the timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_interval_ms: Option<u64>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("RELAY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("RELAY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_presence_timeout() -> u64 {
    6_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            presence: PresenceConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            prune_empty_channels: true,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_presence_timeout(),
            sweep_interval_ms: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl PresenceConfig {
    /// Heartbeat staleness threshold.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Period between presence sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.unwrap_or(self.timeout_ms))
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// `RELAY_CONFIG` names an explicit file; otherwise the default paths
    /// are tried in order.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or the
    /// result is invalid.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_file(shellexpand::tilde(&path).as_ref());
        }

        let config_paths = [
            "relay.toml",
            "/etc/relay/relay.toml",
            "~/.config/relay/relay.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the result
    /// is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Check values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.presence.timeout_ms == 0 {
            bail!("presence.timeout_ms must be greater than zero");
        }
        if self.presence.sweep_interval_ms == Some(0) {
            bail!("presence.sweep_interval_ms must be greater than zero");
        }
        if self.limits.max_message_size > MAX_FRAME_SIZE {
            bail!(
                "limits.max_message_size {} exceeds the frame limit {}",
                self.limits.max_message_size,
                MAX_FRAME_SIZE
            );
        }
        if !self.transport.websocket_path.starts_with('/') {
            bail!(
                "transport.websocket_path must start with '/': {}",
                self.transport.websocket_path
            );
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Dispatcher settings derived from this configuration.
    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            registry: RegistryConfig {
                prune_empty_channels: self.limits.prune_empty_channels,
            },
            presence_timeout: self.presence.timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/");
        assert_eq!(config.presence.timeout(), Duration::from_millis(6000));
        assert_eq!(config.presence.sweep_interval(), config.presence.timeout());
        assert!(config.limits.prune_empty_channels);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let config = Config {
            host: "not a host".to_string(),
            ..Config::default()
        };
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [transport]
            websocket_path = "/ws"

            [presence]
            timeout_ms = 10000
            sweep_interval_ms = 2500

            [limits]
            prune_empty_channels = false
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.presence.timeout(), Duration::from_secs(10));
        assert_eq!(config.presence.sweep_interval(), Duration::from_millis(2500));
        assert!(!config.limits.prune_empty_channels);
        assert_eq!(config.limits.max_message_size, 64 * 1024);

        let dispatcher = config.dispatcher_config();
        assert_eq!(dispatcher.presence_timeout, Duration::from_secs(10));
        assert!(!dispatcher.registry.prune_empty_channels);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.presence.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.presence.sweep_interval_ms = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transport.websocket_path = "ws".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.limits.max_message_size = MAX_FRAME_SIZE;
        assert!(config.validate().is_ok());
        config.limits.max_message_size = MAX_FRAME_SIZE + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_reports_path() {
        let path = std::env::temp_dir().join(format!("relay-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "port = \"eighty\"").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));

        std::fs::remove_file(&path).unwrap();
    }
}
