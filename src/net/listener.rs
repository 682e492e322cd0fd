//! Session listener.
//!
//! # Responsibilities
//! - Bind a listening socket on a free port from the configured range,
//!   reachable from the redirected client
//! - Accept connections and construct one proxy session per connection,
//!   pool leg first
//! - Enforce the max_sessions limit via semaphore
//! - Report the bound address used as the protocol-level redirect target

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::ProxyConfig;
use crate::lifecycle::{SessionTracker, Shutdown};
use crate::net::addr::bind_candidates;
use crate::session::ProxySession;
use crate::tls::TlsGate;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// No port in the configured range could be bound.
    RangeExhausted {
        start: u16,
        end: u16,
        last: std::io::Error,
    },
    /// Failed to read back the bound address.
    Bind(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::RangeExhausted { start, end, last } => {
                write!(f, "no free port in {}..={}: {}", start, end, last)
            }
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// Accepts redirected clients and runs one proxy session per connection.
pub struct SessionListener {
    bound: SocketAddr,
    proxy_id: Uuid,
    shutdown: Shutdown,
    sessions: SessionTracker,
}

impl SessionListener {
    /// Bind within the configured port range, on an address reachable
    /// from `client_address`, and start accepting.
    pub async fn start(
        config: Arc<ProxyConfig>,
        gate: Arc<TlsGate>,
        client_address: IpAddr,
    ) -> Result<Self, ListenerError> {
        let listener = bind_in_range(&config, client_address).await?;
        let bound = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %bound,
            pool = %config.pool.address,
            max_sessions = config.listener.max_sessions,
            "Session listener bound"
        );

        let shutdown = Shutdown::new();
        let sessions = SessionTracker::new();
        let limit = Arc::new(Semaphore::new(config.listener.max_sessions));
        tokio::spawn(accept_loop(
            listener,
            config,
            gate,
            limit,
            sessions.clone(),
            shutdown.subscribe(),
        ));

        Ok(Self {
            bound,
            proxy_id: Uuid::new_v4(),
            shutdown,
            sessions,
        })
    }

    /// The address handed back to the client as its redirect target.
    pub fn bound_address(&self) -> SocketAddr {
        self.bound
    }

    /// Opaque token identifying this proxy instance in logs.
    pub fn proxy_id(&self) -> Uuid {
        self.proxy_id
    }

    /// Sessions currently being proxied.
    pub fn active_sessions(&self) -> u64 {
        self.sessions.active()
    }

    /// Close the listening socket. Established sessions run on; a second
    /// call is a no-op.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }
}

async fn bind_in_range(
    config: &ProxyConfig,
    client_address: IpAddr,
) -> Result<TcpListener, ListenerError> {
    let (start, end) = (
        config.listener.port_range_start,
        config.listener.port_range_end,
    );
    let mut last = None;
    for port in start..=end {
        for ip in bind_candidates(client_address) {
            match TcpListener::bind((ip, port)).await {
                Ok(listener) => return Ok(listener),
                Err(err) => last = Some(err),
            }
        }
    }
    Err(ListenerError::RangeExhausted {
        start,
        end,
        last: last.unwrap_or_else(|| std::io::Error::other("empty port range")),
    })
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<ProxyConfig>,
    gate: Arc<TlsGate>,
    limit: Arc<Semaphore>,
    sessions: SessionTracker,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        // Acquire the session slot first (backpressure), then accept.
        let permit = tokio::select! {
            _ = shutdown_rx.recv() => break,
            permit = limit.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let accepted = tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                tracing::debug!(peer_addr = %peer, "Connection accepted");
                metrics::counter!("proxy_sessions_total").increment(1);
                let config = Arc::clone(&config);
                let gate = Arc::clone(&gate);
                let guard = sessions.track();
                tokio::spawn(async move {
                    let _permit = permit;
                    let _guard = guard;
                    run_session(stream, peer, config, gate).await;
                });
            }
            Err(err) => {
                tracing::warn!(%err, "accept failed");
            }
        }
    }
    tracing::info!("Session listener stopped");
}

async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<ProxyConfig>,
    gate: Arc<TlsGate>,
) {
    match ProxySession::establish(stream, &config, gate).await {
        Ok(session) => {
            tracing::debug!(peer_addr = %peer, session = %session.id(), "session established");
            session.run().await;
        }
        Err(err) => {
            tracing::warn!(peer_addr = %peer, %err, "session not established");
        }
    }
}
