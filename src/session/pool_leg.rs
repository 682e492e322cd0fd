//! Pool-facing session leg.
//!
//! # Responsibilities
//! - Drive the handshake → protocol → login sequence against the pool
//! - Mirror the sequence in its decode phase; the phase never rolls back
//! - Own the single response timer: arming replaces, arrival cancels
//! - Relay raw frames once the session reaches passthrough
//!
//! # Design Decisions
//! - The timer is a plain deadline the session loop polls, not a spawned
//!   task; replacing it is a field assignment, so stacking is impossible
//! - The client's protocol request is queued here until the pool finishes
//!   its handshake, then forwarded with this proxy's own TLS capability

use std::io;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::session::fault::SessionError;
use crate::session::io::LegIo;
use crate::tls::TlsGate;
use crate::wire::frame::tls_bits;
use crate::wire::messages::{encode_probe, LoginRequest, ProtocolReply, ProtocolRequest};
use crate::wire::{FrameDecoder, FramingError, Phase, PoolFrame};

pub struct PoolLeg {
    io: LegIo,
    decoder: FrameDecoder,
    phase: Phase,
    deadline: Option<Instant>,
    response_timeout: Duration,
    queued_protocol: Option<ProtocolRequest>,
    pool_tls_flags: i32,
    closed: bool,
}

impl PoolLeg {
    pub fn new(stream: TcpStream, response_timeout: Duration) -> Self {
        Self {
            io: LegIo::Plain(stream),
            decoder: FrameDecoder::new(),
            phase: Phase::ExpectHandshake,
            deadline: None,
            response_timeout,
            queued_protocol: None,
            pool_tls_flags: 0,
            closed: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn extend_decoder(&mut self, data: &[u8]) {
        self.decoder.extend(data);
    }

    pub fn next_frame(&mut self) -> Result<Option<PoolFrame>, FramingError> {
        self.decoder.decode_reply(self.phase)
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.io.read(buf).await
    }

    /// Open the negotiation: send the handshake probe and hold the
    /// client's protocol request until the pool answers. Client option
    /// bits pass through; the TLS ability bit is per leg.
    pub async fn begin_negotiation(
        &mut self,
        request: ProtocolRequest,
        local_options: i32,
    ) -> io::Result<()> {
        let options = (request.options & !tls_bits::OPT_ABLE_TLS) | local_options;
        self.queued_protocol = Some(ProtocolRequest { options, ..request });
        self.io.write_all(&encode_probe()).await?;
        self.phase = Phase::ExpectHandshake;
        self.arm_timer();
        Ok(())
    }

    /// Handshake answered: forward the queued protocol request.
    pub async fn on_handshake(&mut self) -> Result<(), SessionError> {
        let request = self
            .queued_protocol
            .take()
            .ok_or_else(|| SessionError::Internal("handshake reply with no queued request".into()))?;
        self.io
            .write_all(&request.encode())
            .await
            .map_err(SessionError::pool_io)?;
        self.phase = Phase::ExpectProtocol;
        self.arm_timer();
        Ok(())
    }

    /// Protocol negotiation succeeded: record the pool's TLS flags and
    /// switch this leg to TLS now if the pool demands it for everything.
    pub async fn complete_protocol(
        &mut self,
        reply: &ProtocolReply,
        gate: &TlsGate,
    ) -> Result<(), SessionError> {
        self.cancel_timer();
        self.pool_tls_flags = reply.tls_flags();
        if self.pool_tls_flags & tls_bits::FLAG_TLS_REQUIRED != 0 {
            self.upgrade_tls(gate).await?;
        }
        Ok(())
    }

    /// Relay the login, switching to TLS first when the pool asked for an
    /// encrypted login.
    pub async fn send_login(
        &mut self,
        request: &LoginRequest,
        gate: &TlsGate,
    ) -> Result<(), SessionError> {
        if !self.io.is_tls() && self.pool_tls_flags & tls_bits::FLAG_TLS_LOGIN != 0 {
            self.upgrade_tls(gate).await?;
        }
        self.io
            .write_all(&request.encode())
            .await
            .map_err(SessionError::pool_io)?;
        self.phase = Phase::ExpectLogin;
        self.arm_timer();
        Ok(())
    }

    /// Login reply arrived; the timer stays off until the next send.
    pub fn complete_login(&mut self) {
        self.cancel_timer();
    }

    /// Relay an opaque client frame. Passthrough is sticky.
    pub async fn send_raw(&mut self, bytes: &Bytes) -> io::Result<()> {
        self.phase = Phase::Passthrough;
        self.io.write_all(bytes).await?;
        self.arm_timer();
        Ok(())
    }

    /// A passthrough reply arrived; quiesce the timer until the next send.
    pub fn note_reply_arrival(&mut self) {
        self.cancel_timer();
    }

    fn arm_timer(&mut self) {
        // Replaces any prior deadline; there is never more than one.
        self.deadline = Some(Instant::now() + self.response_timeout);
    }

    fn cancel_timer(&mut self) {
        self.deadline = None;
    }

    pub fn response_timeout_secs(&self) -> u64 {
        self.response_timeout.as_secs()
    }

    async fn upgrade_tls(&mut self, gate: &TlsGate) -> Result<(), SessionError> {
        let tcp = self
            .io
            .take_plain()
            .ok_or_else(|| SessionError::Internal("pool leg already encrypted".into()))?;
        let tls = gate
            .transition_pool(tcp)
            .await
            .map_err(SessionError::pool_io)?;
        self.io = LegIo::Tls(Box::new(tls));
        tracing::debug!("pool leg switched to TLS");
        Ok(())
    }

    /// Disconnect and close. A second call is a no-op.
    pub async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel_timer();
        let _ = self.io.shutdown().await;
    }
}
