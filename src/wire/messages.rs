//! Typed negotiation messages.
//!
//! Only the three messages needed to negotiate a session are structured:
//! the generic handshake, the protocol/capability exchange and the login.
//! Everything else crosses the proxy as an opaque frame. Encoders always
//! produce a complete frame (header plus body) ready for the socket;
//! decoders operate on the body slice the frame decoder already isolated.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::frame::{
    errno, request, status, FrameHeader, HANDSHAKE_PROBE, HANDSHAKE_PROBE_LEN, PROTOCOL_VERSION,
};

/// Length of the opaque session identifier in a login reply.
pub const SESSION_ID_LEN: usize = 16;

/// Length of the fixed, NUL-padded username field in a login request.
const USERNAME_LEN: usize = 8;

/// Structured-message decode failure.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{0} body truncated")]
    Truncated(&'static str),

    #[error("handshake probe does not match the protocol magic")]
    BadProbe,

    #[error("login username is not valid UTF-8")]
    BadUsername,
}

/// Encode the 20-byte handshake probe a client opens the connection with.
pub fn encode_probe() -> [u8; HANDSHAKE_PROBE_LEN] {
    let mut buf = [0u8; HANDSHAKE_PROBE_LEN];
    for (i, word) in HANDSHAKE_PROBE.iter().enumerate() {
        buf[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
    }
    buf
}

/// Check a 20-byte slice against the handshake probe magic.
pub fn is_probe(buf: &[u8]) -> bool {
    buf.len() == HANDSHAKE_PROBE_LEN && buf == encode_probe().as_slice()
}

/// Fixed-size reply to the handshake probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeReply {
    pub version: i32,
    pub flags: i32,
}

impl HandshakeReply {
    pub fn local() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags: 0,
        }
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, CodecError> {
        if body.len() < 8 {
            return Err(CodecError::Truncated("handshake reply"));
        }
        Ok(Self {
            version: body.get_i32(),
            flags: body.get_i32(),
        })
    }

    /// Handshake replies are always keyed to stream 0.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_slice(&FrameHeader::new(0, status::OK, 8).encode());
        buf.put_i32(self.version);
        buf.put_i32(self.flags);
        buf.freeze()
    }
}

/// Protocol/capability negotiation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolRequest {
    pub stream_id: u16,
    pub version: i32,
    pub options: i32,
    pub expect: i32,
}

impl ProtocolRequest {
    pub fn decode(stream_id: u16, mut body: &[u8]) -> Result<Self, CodecError> {
        if body.len() < 12 {
            return Err(CodecError::Truncated("protocol request"));
        }
        Ok(Self {
            stream_id,
            version: body.get_i32(),
            options: body.get_i32(),
            expect: body.get_i32(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(20);
        buf.put_slice(&FrameHeader::new(self.stream_id, request::PROTOCOL, 12).encode());
        buf.put_i32(self.version);
        buf.put_i32(self.options);
        buf.put_i32(self.expect);
        buf.freeze()
    }
}

/// Protocol reply: a run of i32 flag words. The first word is the server's
/// protocol version, the second its TLS flags; further words are relayed
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolReply {
    pub words: Vec<i32>,
}

impl ProtocolReply {
    pub fn decode(mut body: &[u8]) -> Result<Self, CodecError> {
        if body.len() < 8 || body.len() % 4 != 0 {
            return Err(CodecError::Truncated("protocol reply"));
        }
        let mut words = Vec::with_capacity(body.len() / 4);
        while body.has_remaining() {
            words.push(body.get_i32());
        }
        Ok(Self { words })
    }

    pub fn tls_flags(&self) -> i32 {
        self.words.get(1).copied().unwrap_or(0)
    }

    pub fn encode(&self, stream_id: u16) -> Bytes {
        let body_len = (self.words.len() * 4) as i32;
        let mut buf = BytesMut::with_capacity(8 + self.words.len() * 4);
        buf.put_slice(&FrameHeader::new(stream_id, status::OK, body_len).encode());
        for word in &self.words {
            buf.put_i32(*word);
        }
        buf.freeze()
    }
}

/// Login request fields relayed pool-ward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub stream_id: u16,
    pub pid: i32,
    pub username: String,
    pub token: Bytes,
}

impl LoginRequest {
    pub fn decode(stream_id: u16, body: Bytes) -> Result<Self, CodecError> {
        if body.len() < 4 + USERNAME_LEN {
            return Err(CodecError::Truncated("login request"));
        }
        let mut cursor = body.clone();
        let pid = cursor.get_i32();
        let name_raw = cursor.split_to(USERNAME_LEN);
        let name_end = name_raw
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(USERNAME_LEN);
        let username = std::str::from_utf8(&name_raw[..name_end])
            .map_err(|_| CodecError::BadUsername)?
            .to_string();
        Ok(Self {
            stream_id,
            pid,
            username,
            token: cursor,
        })
    }

    pub fn encode(&self) -> Bytes {
        let body_len = (4 + USERNAME_LEN + self.token.len()) as i32;
        let mut buf = BytesMut::with_capacity(8 + body_len as usize);
        buf.put_slice(&FrameHeader::new(self.stream_id, request::LOGIN, body_len).encode());
        buf.put_i32(self.pid);
        let mut name = [0u8; USERNAME_LEN];
        let take = self.username.len().min(USERNAME_LEN);
        name[..take].copy_from_slice(&self.username.as_bytes()[..take]);
        buf.put_slice(&name);
        buf.put_slice(&self.token);
        buf.freeze()
    }
}

/// Login reply carrying the opaque session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginReply {
    pub session_id: [u8; SESSION_ID_LEN],
}

impl LoginReply {
    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        if body.len() < SESSION_ID_LEN {
            return Err(CodecError::Truncated("login reply"));
        }
        let mut session_id = [0u8; SESSION_ID_LEN];
        session_id.copy_from_slice(&body[..SESSION_ID_LEN]);
        Ok(Self { session_id })
    }

    pub fn encode(&self, stream_id: u16) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 + SESSION_ID_LEN);
        buf.put_slice(&FrameHeader::new(stream_id, status::OK, SESSION_ID_LEN as i32).encode());
        buf.put_slice(&self.session_id);
        buf.freeze()
    }
}

/// Error reply: numeric error plus a NUL-terminated message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    pub errno: i32,
    pub message: String,
}

impl ErrorReply {
    pub fn new(errno: i32, message: impl Into<String>) -> Self {
        Self {
            errno,
            message: message.into(),
        }
    }

    /// Decode a refusal body. Tolerant of garbage: anything unreadable
    /// still surfaces as a server error rather than a decode failure.
    pub fn decode(mut body: &[u8]) -> Self {
        if body.len() < 4 {
            return Self::new(errno::SERVER_ERROR, "unreadable error reply");
        }
        let errno = body.get_i32();
        let text = body.strip_suffix(&[0]).unwrap_or(body);
        Self {
            errno,
            message: String::from_utf8_lossy(text).into_owned(),
        }
    }

    pub fn encode(&self, stream_id: u16) -> Bytes {
        let body_len = (4 + self.message.len() + 1) as i32;
        let mut buf = BytesMut::with_capacity(8 + body_len as usize);
        buf.put_slice(&FrameHeader::new(stream_id, status::ERROR, body_len).encode());
        buf.put_i32(self.errno);
        buf.put_slice(self.message.as_bytes());
        buf.put_u8(0);
        buf.freeze()
    }
}
