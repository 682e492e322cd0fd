//! Client-facing session leg.
//!
//! # Responsibilities
//! - Answer the handshake probe locally
//! - Intercept protocol and login requests, holding them as the pending
//!   request until the matching reply is sent
//! - Re-key pool replies to the client's original stream id
//! - Relay everything after login byte-exact
//! - Carry the client-visible error reply on faults
//!
//! The leg owns its decode phase and pending state; nothing else mutates
//! them.

use std::io;

use bytes::Bytes;
use tokio::net::TcpStream;

use crate::session::fault::SessionError;
use crate::session::io::LegIo;
use crate::tls::TlsGate;
use crate::wire::frame::tls_bits;
use crate::wire::messages::{ErrorReply, HandshakeReply, LoginReply, ProtocolReply, ProtocolRequest};
use crate::wire::{ClientFrame, FrameDecoder, Phase, RequestError};

pub struct ClientLeg {
    io: LegIo,
    decoder: FrameDecoder,
    phase: Phase,
    pending_protocol: Option<ProtocolRequest>,
    pending_login: Option<u16>,
    /// Version and options from the accepted protocol request, kept past
    /// the reply for the TLS decision at the login boundary.
    negotiated_version: i32,
    negotiated_options: i32,
    last_stream_id: u16,
    closed: bool,
}

impl ClientLeg {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            io: LegIo::Plain(stream),
            decoder: FrameDecoder::new(),
            phase: Phase::ExpectHandshake,
            pending_protocol: None,
            pending_login: None,
            negotiated_version: 0,
            negotiated_options: 0,
            last_stream_id: 0,
            closed: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn has_pending(&self) -> bool {
        self.pending_protocol.is_some() || self.pending_login.is_some()
    }

    pub fn note_stream_id(&mut self, stream_id: u16) {
        self.last_stream_id = stream_id;
    }

    pub fn extend_decoder(&mut self, data: &[u8]) {
        self.decoder.extend(data);
    }

    pub fn next_frame(&mut self) -> Result<Option<ClientFrame>, RequestError> {
        self.decoder.decode_request(self.phase)
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.io.read(buf).await
    }

    /// Answer the handshake probe locally; the pool leg does its own
    /// handshake later.
    pub async fn answer_probe(&mut self) -> io::Result<()> {
        self.io.write_all(&HandshakeReply::local().encode()).await?;
        self.phase = Phase::ExpectProtocol;
        Ok(())
    }

    /// Accept a protocol request as the pending request.
    pub fn begin_protocol(&mut self, request: ProtocolRequest) -> Result<(), SessionError> {
        if self.pending_protocol.is_some() {
            return Err(SessionError::Violation("protocol request already pending"));
        }
        self.last_stream_id = request.stream_id;
        self.negotiated_version = request.version;
        self.negotiated_options = request.options;
        self.pending_protocol = Some(request);
        Ok(())
    }

    /// Accept a login request as the pending request.
    pub fn begin_login(&mut self, stream_id: u16) -> Result<(), SessionError> {
        if self.pending_login.is_some() {
            return Err(SessionError::Violation("login request already pending"));
        }
        self.last_stream_id = stream_id;
        self.pending_login = Some(stream_id);
        Ok(())
    }

    /// Build the protocol reply for the client: the pool's flag words,
    /// re-keyed to the pending request, with the TLS word replaced by this
    /// leg's own requirements.
    pub async fn on_protocol_reply(
        &mut self,
        reply: &ProtocolReply,
        gate: &TlsGate,
    ) -> Result<(), SessionError> {
        let pending = self
            .pending_protocol
            .take()
            .ok_or_else(|| SessionError::Internal("protocol reply with no pending request".into()))?;
        let mut words = reply.words.clone();
        let ours = gate.reply_flags(self.negotiated_options);
        words[1] =
            (words[1] & !(tls_bits::FLAG_TLS_REQUIRED | tls_bits::FLAG_TLS_LOGIN)) | ours;
        self.io
            .write_all(&ProtocolReply { words }.encode(pending.stream_id))
            .await
            .map_err(SessionError::client_io)?;
        self.phase = Phase::ExpectLogin;
        Ok(())
    }

    pub async fn on_login_reply(&mut self, reply: &LoginReply) -> Result<(), SessionError> {
        let stream_id = self
            .pending_login
            .take()
            .ok_or_else(|| SessionError::Internal("login reply with no pending request".into()))?;
        self.io
            .write_all(&reply.encode(stream_id))
            .await
            .map_err(SessionError::client_io)?;
        self.phase = Phase::Passthrough;
        Ok(())
    }

    /// Relay a passthrough frame from the pool, untouched.
    pub async fn on_raw(&mut self, bytes: &Bytes) -> io::Result<()> {
        self.io.write_all(bytes).await
    }

    /// Write one error reply keyed to the last known stream id.
    pub async fn send_error(&mut self, reply: ErrorReply) -> io::Result<()> {
        self.io.write_all(&reply.encode(self.last_stream_id)).await
    }

    pub fn tls_active(&self) -> bool {
        self.io.is_tls()
    }

    /// Whether the client-leg TLS transition is due at this phase boundary.
    pub fn tls_due(&self, gate: &TlsGate) -> bool {
        !self.tls_active() && gate.requires_tls(self.negotiated_version, self.negotiated_options)
    }

    /// Switch this leg to encrypted framing at the login phase boundary.
    ///
    /// The negotiation is half-duplex, so nothing should be buffered when
    /// the switch happens; anything that is belongs to the TLS handshake
    /// and cannot be replayed into it.
    pub async fn upgrade_tls(&mut self, gate: &TlsGate) -> Result<(), SessionError> {
        if self.decoder.buffered() > 0 {
            return Err(SessionError::Violation(
                "client data overlaps the TLS transition",
            ));
        }
        let tcp = self
            .io
            .take_plain()
            .ok_or_else(|| SessionError::Internal("client leg already encrypted".into()))?;
        let tls = gate
            .transition_client(tcp)
            .await
            .map_err(SessionError::client_io)?;
        self.io = LegIo::Tls(Box::new(tls));
        tracing::debug!("client leg switched to TLS");
        Ok(())
    }

    /// Close the client socket. A second call is a no-op.
    pub async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.io.shutdown().await;
    }
}
