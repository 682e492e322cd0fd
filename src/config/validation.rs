//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, port range ordered)
//! - Check the TLS material paths are consistent with the selected mode
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::{ProxyConfig, TlsMode};

/// A single semantic configuration problem.
#[derive(Debug, PartialEq, Eq)]
pub enum ValidationError {
    EmptyPortRange { start: u16, end: u16 },
    BadPoolAddress(String),
    ZeroTimeout(&'static str),
    IncompleteTlsMaterial,
    BadMetricsAddress(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyPortRange { start, end } => {
                write!(f, "port range {}..={} is empty or reversed", start, end)
            }
            ValidationError::BadPoolAddress(addr) => {
                write!(f, "pool address {:?} is not host:port", addr)
            }
            ValidationError::ZeroTimeout(name) => {
                write!(f, "timeout {} must be greater than zero", name)
            }
            ValidationError::IncompleteTlsMaterial => {
                write!(f, "tls cert_path and key_path must be set together")
            }
            ValidationError::BadMetricsAddress(addr) => {
                write!(f, "metrics address {:?} is not a socket address", addr)
            }
        }
    }
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let listener = &config.listener;
    if listener.port_range_start == 0 || listener.port_range_start > listener.port_range_end {
        errors.push(ValidationError::EmptyPortRange {
            start: listener.port_range_start,
            end: listener.port_range_end,
        });
    }

    if split_host_port(&config.pool.address).is_none() {
        errors.push(ValidationError::BadPoolAddress(config.pool.address.clone()));
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("connect_secs"));
    }
    if config.timeouts.response_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("response_secs"));
    }

    if config.tls.mode != TlsMode::Off
        && config.tls.cert_path.is_some() != config.tls.key_path.is_some()
    {
        errors.push(ValidationError::IncompleteTlsMaterial);
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::BadMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Split a `host:port` string, returning the host and parsed port.
pub fn split_host_port(address: &str) -> Option<(&str, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    let port: u16 = port.parse().ok()?;
    Some((host, port))
}
