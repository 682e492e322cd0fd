//! Proxy session subsystem.
//!
//! # Data Flow
//! ```text
//! client socket ──▶ ClientLeg ──(decoded: protocol/login; else raw)──▶ PoolLeg ──▶ pool
//! pool socket   ──▶ FrameDecoder ──▶ PoolLeg ──▶ ClientLeg ──▶ client
//! ```
//!
//! # Design Decisions
//! - One tokio task owns the whole session; cross-leg coordination is a
//!   direct method call on that task, never shared state behind a lock
//! - The loop is a flat pipeline: decode, route by phase, handle; each
//!   step returns a tagged result instead of dispatching through handler
//!   chains
//! - The pool connect is awaited before any client byte is processed,
//!   bounded by the configured connect timeout

pub mod client_leg;
pub mod fault;
mod io;
pub mod pool_leg;

pub use fault::{Leg, SessionError};

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::ProxyConfig;
use crate::session::client_leg::ClientLeg;
use crate::session::pool_leg::PoolLeg;
use crate::tls::TlsGate;
use crate::wire::{ClientFrame, Phase, PoolFrame};

/// One client connection paired with one pool connection.
pub struct ProxySession {
    id: Uuid,
    client: ClientLeg,
    pool: PoolLeg,
    gate: Arc<TlsGate>,
    torn_down: bool,
}

impl ProxySession {
    /// Pair the accepted client connection with a fresh pool connection.
    /// Fails without consuming any client bytes.
    pub async fn establish(
        client_stream: TcpStream,
        config: &ProxyConfig,
        gate: Arc<TlsGate>,
    ) -> Result<Self, SessionError> {
        if let Err(err) = client_stream.set_nodelay(true) {
            tracing::warn!(%err, "failed to set TCP_NODELAY on client leg");
        }
        let pool_stream = match connect_pool(
            &config.pool.address,
            Duration::from_secs(config.timeouts.connect_secs),
        )
        .await
        {
            Ok(stream) => stream,
            Err(err) => {
                // No session exists yet; refuse the client directly with
                // the same wire error the fault boundary would produce.
                metrics::counter!("proxy_faults_total").increment(1);
                let mut client_stream = client_stream;
                let _ = client_stream.write_all(&err.to_wire().encode(0)).await;
                let _ = client_stream.shutdown().await;
                return Err(err);
            }
        };
        if let Err(err) = pool_stream.set_nodelay(true) {
            tracing::warn!(%err, "failed to set TCP_NODELAY on pool leg");
        }

        Ok(Self {
            id: Uuid::new_v4(),
            client: ClientLeg::new(client_stream),
            pool: PoolLeg::new(
                pool_stream,
                Duration::from_secs(config.timeouts.response_secs),
            ),
            gate,
            torn_down: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn torn_down(&self) -> bool {
        self.torn_down
    }

    /// Whether the client is currently waiting on the pool for anything.
    pub fn outstanding_request(&self) -> bool {
        self.client.has_pending() || self.pool.deadline().is_some()
    }

    pub(crate) async fn send_client_error(
        &mut self,
        reply: crate::wire::messages::ErrorReply,
    ) -> std::io::Result<()> {
        self.client.send_error(reply).await
    }

    /// Close both legs, pool first. Safe to call more than once.
    pub async fn teardown(&mut self) {
        self.torn_down = true;
        self.pool.shutdown().await;
        self.client.shutdown().await;
    }

    /// Run the session to completion. Every exit path goes through the
    /// fault boundary, which tears both legs down exactly once.
    pub async fn run(mut self) {
        tracing::debug!(session = %self.id, "proxy session started");
        if let Err(err) = self.drive().await {
            fault::terminate(&mut self, err).await;
        }
        tracing::debug!(session = %self.id, "proxy session finished");
    }

    async fn drive(&mut self) -> Result<(), SessionError> {
        let mut client_buf = [0u8; 8192];
        let mut pool_buf = [0u8; 8192];

        loop {
            // Drain everything already buffered before blocking again.
            while self.pump_client().await? || self.pump_pool().await? {}

            let deadline = self.pool.deadline();
            let event = tokio::select! {
                read = self.client.read(&mut client_buf) => Event::Client(read),
                read = self.pool.read(&mut pool_buf) => Event::Pool(read),
                _ = deadline_sleep(deadline) => Event::Timeout,
            };

            match event {
                Event::Client(read) => {
                    let n = read.map_err(SessionError::client_io)?;
                    if n == 0 {
                        return Err(SessionError::Disconnected(Leg::Client));
                    }
                    metrics::counter!("proxy_relayed_bytes_total", "leg" => "client")
                        .increment(n as u64);
                    self.client.extend_decoder(&client_buf[..n]);
                }
                Event::Pool(read) => {
                    let n = read.map_err(SessionError::pool_io)?;
                    if n == 0 {
                        return Err(SessionError::Disconnected(Leg::Pool));
                    }
                    metrics::counter!("proxy_relayed_bytes_total", "leg" => "pool")
                        .increment(n as u64);
                    self.pool.extend_decoder(&pool_buf[..n]);
                }
                Event::Timeout => {
                    return Err(SessionError::Timeout(self.pool.response_timeout_secs()));
                }
            }
        }
    }

    /// Handle at most one decoded client frame.
    async fn pump_client(&mut self) -> Result<bool, SessionError> {
        let frame = self
            .client
            .next_frame()
            .map_err(SessionError::from_request)?;
        let Some(frame) = frame else {
            return Ok(false);
        };

        match frame {
            ClientFrame::Probe => {
                self.client
                    .answer_probe()
                    .await
                    .map_err(SessionError::client_io)?;
            }
            ClientFrame::Protocol(request) => {
                if self.client.phase() != Phase::ExpectProtocol {
                    return Err(SessionError::Violation("protocol request out of phase"));
                }
                self.client.begin_protocol(request)?;
                self.pool
                    .begin_negotiation(request, self.gate.capability_options())
                    .await
                    .map_err(SessionError::pool_io)?;
            }
            ClientFrame::Login(request) => {
                if self.client.phase() != Phase::ExpectLogin {
                    return Err(SessionError::Violation("login request out of phase"));
                }
                self.client.begin_login(request.stream_id)?;
                if self.client.tls_due(&self.gate) {
                    self.client.upgrade_tls(&self.gate).await?;
                }
                self.pool.send_login(&request, &self.gate).await?;
            }
            ClientFrame::Raw(bytes) => {
                if self.client.phase() != Phase::Passthrough {
                    return Err(SessionError::Violation("data frame relayed before login"));
                }
                self.client
                    .note_stream_id(u16::from_be_bytes([bytes[0], bytes[1]]));
                self.pool
                    .send_raw(&bytes)
                    .await
                    .map_err(SessionError::pool_io)?;
            }
        }
        Ok(true)
    }

    /// Handle at most one decoded pool frame.
    async fn pump_pool(&mut self) -> Result<bool, SessionError> {
        let frame = self.pool.next_frame().map_err(|source| SessionError::Framing {
            leg: Leg::Pool,
            source,
        })?;
        let Some(frame) = frame else {
            return Ok(false);
        };

        match frame {
            PoolFrame::Handshake(_) => {
                self.pool.on_handshake().await?;
            }
            PoolFrame::Protocol { reply, .. } => {
                self.pool.complete_protocol(&reply, &self.gate).await?;
                self.client.on_protocol_reply(&reply, &self.gate).await?;
            }
            PoolFrame::Login { reply, .. } => {
                self.pool.complete_login();
                self.client.on_login_reply(&reply).await?;
            }
            PoolFrame::Refused { error, .. } => {
                return Err(SessionError::Refused {
                    errno: error.errno,
                    message: error.message,
                });
            }
            PoolFrame::Raw(bytes) => {
                self.pool.note_reply_arrival();
                self.client
                    .on_raw(&bytes)
                    .await
                    .map_err(SessionError::client_io)?;
            }
        }
        Ok(true)
    }
}

enum Event {
    Client(std::io::Result<usize>),
    Pool(std::io::Result<usize>),
    Timeout,
}

async fn deadline_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Resolve the pool address and connect, bounded per attempt by the
/// connect timeout.
async fn connect_pool(address: &str, connect_timeout: Duration) -> Result<TcpStream, SessionError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(address)
        .await
        .map_err(|err| SessionError::Resolve(format!("{address}: {err}")))?
        .collect();
    if addrs.is_empty() {
        return Err(SessionError::Resolve(address.to_string()));
    }

    let mut last = None;
    for addr in addrs {
        match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(err)) => last = Some(SessionError::pool_io(err)),
            Err(_) => {
                last = Some(SessionError::pool_io(std::io::Error::new(
                    ErrorKind::TimedOut,
                    format!("connect to {addr} timed out"),
                )))
            }
        }
    }
    Err(last.expect("at least one connect attempt"))
}
