//! TLS capability and transition gate.
//!
//! # Responsibilities
//! - Load certificate/key/CA material into rustls configs at startup
//! - Answer capability queries during protocol negotiation
//! - Perform the per-leg plaintext-to-TLS transition at a phase boundary
//!
//! # Design Decisions
//! - The gate is a capability/transition API; credential provisioning and
//!   certificate stores stay outside this crate (PEM files on disk)
//! - Client leg upgrades are server-side accepts, pool leg upgrades are
//!   client-side connects; both produce the same unified stream type

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::RootCertStore;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

use crate::config::schema::{TlsConfig, TlsMode};
use crate::wire::frame::tls_bits;

/// Error type for TLS gate construction.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("no private key found in {0}")]
    NoKey(String),

    #[error("invalid TLS material: {0}")]
    Material(#[from] rustls::Error),

    #[error("pool host {0:?} is not a valid TLS server name")]
    BadServerName(String),
}

/// Decides whether and when each leg switches to encrypted framing, and
/// performs the switch.
pub struct TlsGate {
    mode: TlsMode,
    acceptor: Option<TlsAcceptor>,
    connector: Option<TlsConnector>,
    pool_server_name: Option<ServerName<'static>>,
}

impl TlsGate {
    /// Build the gate from configuration. `pool_host` is the hostname used
    /// for pool-side certificate verification.
    pub fn from_config(cfg: &TlsConfig, pool_host: &str) -> Result<Self, TlsError> {
        if cfg.mode == TlsMode::Off {
            return Ok(Self {
                mode: TlsMode::Off,
                acceptor: None,
                connector: None,
                pool_server_name: None,
            });
        }

        let acceptor = match (&cfg.cert_path, &cfg.key_path) {
            (Some(cert), Some(key)) => Some(load_acceptor(Path::new(cert), Path::new(key))?),
            _ => None,
        };

        let connector = match &cfg.ca_path {
            Some(ca) => Some(load_connector(Path::new(ca))?),
            None => None,
        };

        let pool_server_name = if connector.is_some() {
            let name = ServerName::try_from(pool_host.to_string())
                .map_err(|_| TlsError::BadServerName(pool_host.to_string()))?;
            Some(name)
        } else {
            None
        };

        Ok(Self {
            mode: cfg.mode,
            acceptor,
            connector,
            pool_server_name,
        })
    }

    /// Whether the client leg must switch to TLS for this negotiation.
    pub fn requires_tls(&self, _version: i32, options: i32) -> bool {
        match self.mode {
            TlsMode::Off => false,
            TlsMode::Optional => {
                self.acceptor.is_some() && options & tls_bits::OPT_ABLE_TLS != 0
            }
            TlsMode::Strict => self.acceptor.is_some(),
        }
    }

    /// Capability options advertised to the pool in the protocol request.
    pub fn capability_options(&self) -> i32 {
        if self.mode != TlsMode::Off && self.connector.is_some() {
            tls_bits::OPT_ABLE_TLS
        } else {
            0
        }
    }

    /// TLS flag word advertised to the client in the protocol reply.
    pub fn reply_flags(&self, client_options: i32) -> i32 {
        if !self.requires_tls(0, client_options) {
            return 0;
        }
        match self.mode {
            TlsMode::Strict => tls_bits::FLAG_TLS_REQUIRED | tls_bits::FLAG_TLS_LOGIN,
            _ => tls_bits::FLAG_TLS_LOGIN,
        }
    }

    /// Switch the client leg to encrypted framing (server-side accept).
    pub async fn transition_client(&self, tcp: TcpStream) -> io::Result<TlsStream<TcpStream>> {
        let acceptor = self
            .acceptor
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "no server credentials"))?;
        Ok(TlsStream::from(acceptor.accept(tcp).await?))
    }

    /// Switch the pool leg to encrypted framing (client-side connect).
    pub async fn transition_pool(&self, tcp: TcpStream) -> io::Result<TlsStream<TcpStream>> {
        let (connector, name) = match (&self.connector, &self.pool_server_name) {
            (Some(connector), Some(name)) => (connector, name.clone()),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "no pool trust anchors",
                ))
            }
        };
        Ok(TlsStream::from(connector.connect(name, tcp).await?))
    }
}

fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let certs = read_pem(cert_path, |reader| {
        rustls_pemfile::certs(reader).collect::<Result<Vec<_>, _>>()
    })?;
    let key = read_pem(key_path, |reader| rustls_pemfile::private_key(reader))?
        .ok_or_else(|| TlsError::NoKey(key_path.display().to_string()))?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_connector(ca_path: &Path) -> Result<TlsConnector, TlsError> {
    let certs = read_pem(ca_path, |reader| {
        rustls_pemfile::certs(reader).collect::<Result<Vec<_>, _>>()
    })?;
    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots.add(cert)?;
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

fn read_pem<T>(
    path: &Path,
    parse: impl FnOnce(&mut BufReader<File>) -> io::Result<T>,
) -> Result<T, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    parse(&mut reader).map_err(|source| TlsError::Read {
        path: path.display().to_string(),
        source,
    })
}
