// src/config.rs

//! Manages server configuration: loading, defaults, and validation.

use crate::core::notice::NoticeFormat;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Pairing policy.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PairingConfig {
    /// Close a connection that waited this long without being paired. `None` waits forever.
    #[serde(default, with = "humantime_serde")]
    pub wait_timeout: Option<Duration>,
    /// How often the coordinator checks the waiting connection against `wait_timeout`.
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            wait_timeout: None,
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(1)
}

/// Per-connection resource limits.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LimitsConfig {
    /// The largest WebSocket message (and frame) a client may send, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// The number of frames buffered for a connection before relayed messages are dropped.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    /// How long a client gets to complete the TLS and WebSocket handshakes.
    #[serde(default = "default_handshake_timeout", with = "humantime_serde")]
    pub handshake_timeout: Duration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            outbound_queue: default_outbound_queue(),
            handshake_timeout: default_handshake_timeout(),
        }
    }
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB, well above any SDP blob
}
fn default_outbound_queue() -> usize {
    256
}
fn default_handshake_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Configuration for TLS encryption.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cert_path")]
    pub cert_path: String,
    #[serde(default = "default_key_path")]
    pub key_path: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_path: default_cert_path(),
            key_path: default_key_path(),
        }
    }
}

fn default_cert_path() -> String {
    "pairlink.crt".to_string()
}
fn default_key_path() -> String {
    "pairlink.key".to_string()
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9090
}

/// The validated server configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    #[serde(default)]
    pub notice_format: NoticeFormat,
    #[serde(default)]
    pub pairing: PairingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    10000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            notice_format: NoticeFormat::default(),
            pairing: PairingConfig::default(),
            limits: LimitsConfig::default(),
            tls: TlsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid configuration in '{path}'"))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.limits.max_message_size == 0 {
            return Err(anyhow!("limits.max_message_size cannot be 0"));
        }
        if self.limits.outbound_queue == 0 {
            return Err(anyhow!("limits.outbound_queue cannot be 0"));
        }
        if self.limits.handshake_timeout.is_zero() {
            return Err(anyhow!("limits.handshake_timeout cannot be 0"));
        }
        if self.pairing.sweep_interval.is_zero() {
            return Err(anyhow!("pairing.sweep_interval cannot be 0"));
        }

        if let Some(timeout) = self.pairing.wait_timeout {
            if timeout.is_zero() {
                return Err(anyhow!(
                    "pairing.wait_timeout cannot be 0; omit it to wait forever"
                ));
            }
            if timeout < self.pairing.sweep_interval {
                warn!(
                    "pairing.wait_timeout ({:?}) is shorter than pairing.sweep_interval ({:?}); waiters are checked only once per sweep.",
                    timeout, self.pairing.sweep_interval
                );
            }
        }

        if self.tls.enabled {
            if self.tls.cert_path.trim().is_empty() {
                return Err(anyhow!("tls.cert_path cannot be empty when TLS is enabled"));
            }
            if self.tls.key_path.trim().is_empty() {
                return Err(anyhow!("tls.key_path cannot be empty when TLS is enabled"));
            }
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }
}
