//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the pool proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (ephemeral port range, session limits).
    pub listener: ListenerConfig,

    /// Backend pool endpoint.
    pub pool: PoolConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// TLS policy for both legs.
    pub tls: TlsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// First port of the ephemeral bind range (inclusive).
    pub port_range_start: u16,

    /// Last port of the ephemeral bind range (inclusive).
    pub port_range_end: u16,

    /// Maximum concurrent proxy sessions (backpressure).
    pub max_sessions: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port_range_start: 20000,
            port_range_end: 25000,
            max_sessions: 1024,
        }
    }
}

/// Backend pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool address as `host:port`. The host may need resolution.
    pub address: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:1094".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Outbound pool connect timeout in seconds.
    pub connect_secs: u64,

    /// Pool response timeout in seconds.
    pub response_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            response_secs: 30,
        }
    }
}

/// TLS activation policy.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plaintext on both legs.
    Off,
    /// Switch to TLS when the peer is able.
    Optional,
    /// Require TLS on the client leg.
    Strict,
}

/// TLS configuration for both legs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    pub mode: TlsMode,

    /// Path to the server certificate chain (PEM), client leg.
    pub cert_path: Option<String>,

    /// Path to the server private key (PEM), client leg.
    pub key_path: Option<String>,

    /// Path to the trust anchors (PEM) used to verify the pool, pool leg.
    pub ca_path: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            mode: TlsMode::Off,
            cert_path: None,
            key_path: None,
            ca_path: None,
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Whether to expose Prometheus metrics.
    pub metrics_enabled: bool,

    /// Metrics exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9100".to_string(),
        }
    }
}
