//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (GRAPHCAST_HOST, GRAPHCAST_PORT)
//! - TOML configuration file

use anyhow::{Context, Result};
use graphcast_core::{HubConfig, OverflowPolicy};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

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

    /// Hub configuration.
    #[serde(default)]
    pub hub: HubSettings,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

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

    /// Query parameter carrying the graph id on the WebSocket endpoint.
    #[serde(default = "default_channel_param")]
    pub channel_param: String,

    /// Path of the publish endpoint. `{id}` marks the graph id segment.
    #[serde(default = "default_publish_path")]
    pub publish_path: String,
}

/// Overflow policy as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowSetting {
    /// Drop the oldest queued payload.
    #[default]
    DropOldest,
    /// Disconnect the slow member.
    Disconnect,
}

impl From<OverflowSetting> for OverflowPolicy {
    fn from(setting: OverflowSetting) -> Self {
        match setting {
            OverflowSetting::DropOldest => OverflowPolicy::DropOldest,
            OverflowSetting::Disconnect => OverflowPolicy::Disconnect,
        }
    }
}

/// Hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Pending payloads buffered per connection.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// What to do when a connection's queue is full.
    #[serde(default)]
    pub overflow_policy: OverflowSetting,

    /// Per-write timeout in milliseconds. 0 disables it.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,

    /// Maximum number of graphs with live connections.
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,

    /// Drop graphs once their last connection leaves.
    #[serde(default = "default_true")]
    pub reclaim_empty_channels: bool,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum publish payload size in bytes.
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
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
    std::env::var("GRAPHCAST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("GRAPHCAST_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_channel_param() -> String {
    "graphuuid".to_string()
}

fn default_publish_path() -> String {
    "/graphs/{id}/publish".to_string()
}

fn default_queue_capacity() -> usize {
    64
}

fn default_send_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_max_channels() -> usize {
    10_000
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_payload_size() -> usize {
    64 * 1024 // 64 KB
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
            hub: HubSettings::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            channel_param: default_channel_param(),
            publish_path: default_publish_path(),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            overflow_policy: OverflowSetting::default(),
            send_timeout_ms: default_send_timeout(),
            max_channels: default_max_channels(),
            reclaim_empty_channels: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_payload_size: default_max_payload_size(),
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

impl HubSettings {
    /// Build the hub configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_capacity: self.queue_capacity,
            overflow_policy: self.overflow_policy.into(),
            send_timeout: (self.send_timeout_ms > 0)
                .then(|| Duration::from_millis(self.send_timeout_ms)),
            max_channels: self.max_channels,
            reclaim_empty_channels: self.reclaim_empty_channels,
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        // Try to load from default paths
        let config_paths = [
            "graphcast.toml",
            "/etc/graphcast/graphcast.toml",
            "~/.config/graphcast/graphcast.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Route of the publish endpoint in axum's path syntax.
    ///
    /// # Errors
    ///
    /// Returns an error unless `publish_path` contains `{id}` exactly once.
    pub fn publish_route(&self) -> Result<String> {
        let path = &self.transport.publish_path;
        if path.matches("{id}").count() != 1 {
            anyhow::bail!("publish_path must contain {{id}} exactly once: {}", path);
        }
        Ok(path.replace("{id}", ":graph_id"))
    }
}
