//! Stateful frame reassembly.
//!
//! # Responsibilities
//! - Accumulate raw socket reads and slice out complete frames
//! - Tolerate partial frames and coalesced frames across reads
//! - Decode the negotiation messages according to the owning leg's phase
//! - Fail the connection on implausible declared lengths
//!
//! # Design Decisions
//! - The decoder never consumes bytes until header and body are fully
//!   buffered; "need more bytes" is a plain `Ok(None)` with no side effects
//! - The phase is passed in by the owning leg on every call rather than
//!   shared by back-reference; the decoder holds no cross-object state
//! - At most one frame is produced per call

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::frame::{status, FrameHeader, HANDSHAKE_PROBE_LEN, HEADER_LEN, MAX_BODY_LEN};
use super::frame::request;
use super::messages::{
    is_probe, CodecError, ErrorReply, HandshakeReply, LoginReply, LoginRequest, ProtocolReply,
    ProtocolRequest,
};

/// Which structured message, if any, the next inbound frame should be
/// parsed as. Advances only forward; `Passthrough` is sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ExpectHandshake,
    ExpectProtocol,
    ExpectLogin,
    Passthrough,
}

/// Unrecoverable framing fault. The connection must be closed; no reply
/// can be framed on a stream whose length prefix cannot be trusted.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("declared body length {0} is outside 0..={MAX_BODY_LEN}")]
    BadLength(i32),
}

/// Client-direction decode failure.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Malformed(#[from] CodecError),
}

/// A decoded pool-to-proxy frame.
#[derive(Debug)]
pub enum PoolFrame {
    Handshake(HandshakeReply),
    Protocol { stream_id: u16, reply: ProtocolReply },
    Login { stream_id: u16, reply: LoginReply },
    /// Non-ok status during negotiation.
    Refused { stream_id: u16, error: ErrorReply },
    /// Complete frame, untouched, header included.
    Raw(Bytes),
}

/// A decoded client-to-proxy frame.
#[derive(Debug)]
pub enum ClientFrame {
    Probe,
    Protocol(ProtocolRequest),
    Login(LoginRequest),
    /// Complete frame, untouched, header included.
    Raw(Bytes),
}

/// Reassembles a byte stream into frames for one leg.
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Append raw bytes from a socket read.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes currently buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Slice out one complete frame, or report that more bytes are needed.
    fn take_frame(&mut self) -> Result<Option<(FrameHeader, Bytes)>, FramingError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = FrameHeader::decode(&self.buf[..HEADER_LEN]);
        if header.body_len < 0 || header.body_len > MAX_BODY_LEN {
            return Err(FramingError::BadLength(header.body_len));
        }
        let total = HEADER_LEN + header.body_len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }
        let raw = self.buf.split_to(total).freeze();
        Ok(Some((header, raw)))
    }

    /// Decode one pool-to-proxy frame.
    ///
    /// During negotiation a frame that fails to parse is dropped and
    /// logged; the response timer eventually converts the silence into a
    /// timeout fault.
    pub fn decode_reply(&mut self, phase: Phase) -> Result<Option<PoolFrame>, FramingError> {
        loop {
            let Some((header, raw)) = self.take_frame()? else {
                return Ok(None);
            };
            if phase == Phase::Passthrough {
                return Ok(Some(PoolFrame::Raw(raw)));
            }
            let body = &raw[HEADER_LEN..];
            if header.code != status::OK {
                return Ok(Some(PoolFrame::Refused {
                    stream_id: header.stream_id,
                    error: ErrorReply::decode(body),
                }));
            }
            let parsed = match phase {
                Phase::ExpectHandshake => {
                    HandshakeReply::decode(body).map(PoolFrame::Handshake)
                }
                Phase::ExpectProtocol => ProtocolReply::decode(body).map(|reply| {
                    PoolFrame::Protocol {
                        stream_id: header.stream_id,
                        reply,
                    }
                }),
                Phase::ExpectLogin => LoginReply::decode(body).map(|reply| PoolFrame::Login {
                    stream_id: header.stream_id,
                    reply,
                }),
                Phase::Passthrough => unreachable!(),
            };
            match parsed {
                Ok(frame) => return Ok(Some(frame)),
                Err(err) => {
                    tracing::warn!(?phase, %err, "dropping unparseable pool reply");
                    continue;
                }
            }
        }
    }

    /// Decode one client-to-proxy frame.
    ///
    /// The handshake probe is the only unframed message; afterwards frames
    /// are parsed by request code and the leg enforces phase ordering.
    pub fn decode_request(&mut self, phase: Phase) -> Result<Option<ClientFrame>, RequestError> {
        if phase == Phase::ExpectHandshake {
            if self.buf.len() < HANDSHAKE_PROBE_LEN {
                return Ok(None);
            }
            let probe = self.buf.split_to(HANDSHAKE_PROBE_LEN);
            if !is_probe(&probe) {
                return Err(CodecError::BadProbe.into());
            }
            return Ok(Some(ClientFrame::Probe));
        }
        let Some((header, raw)) = self.take_frame()? else {
            return Ok(None);
        };
        if phase == Phase::Passthrough {
            return Ok(Some(ClientFrame::Raw(raw)));
        }
        match header.code {
            request::PROTOCOL => {
                let req = ProtocolRequest::decode(header.stream_id, &raw[HEADER_LEN..])?;
                Ok(Some(ClientFrame::Protocol(req)))
            }
            request::LOGIN => {
                let req = LoginRequest::decode(header.stream_id, raw.slice(HEADER_LEN..))?;
                Ok(Some(ClientFrame::Login(req)))
            }
            _ => Ok(Some(ClientFrame::Raw(raw))),
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::messages::encode_probe;

    fn raw_frame(stream_id: u16, code: u16, body: &[u8]) -> Vec<u8> {
        let mut bytes = FrameHeader::new(stream_id, code, body.len() as i32)
            .encode()
            .to_vec();
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn reassembles_across_arbitrary_split_points() {
        let frame = raw_frame(4, status::OK, &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        // Every split point, including mid-header.
        for split in 0..frame.len() {
            let mut decoder = FrameDecoder::new();
            decoder.extend(&frame[..split]);
            assert!(
                decoder.decode_reply(Phase::Passthrough).unwrap().is_none(),
                "no frame should surface from {split} bytes"
            );
            decoder.extend(&frame[split..]);
            match decoder.decode_reply(Phase::Passthrough).unwrap() {
                Some(PoolFrame::Raw(raw)) => assert_eq!(&raw[..], &frame[..]),
                other => panic!("expected raw frame, got {other:?}"),
            }
            assert_eq!(decoder.buffered(), 0);
        }
    }

    #[test]
    fn no_bytes_consumed_while_incomplete() {
        let frame = raw_frame(1, status::OK, &[0u8; 32]);
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame[..HEADER_LEN + 3]);
        assert!(decoder.decode_reply(Phase::Passthrough).unwrap().is_none());
        assert_eq!(decoder.buffered(), HEADER_LEN + 3);
    }

    #[test]
    fn coalesced_frames_come_out_one_per_call() {
        let a = raw_frame(1, status::OK, b"first");
        let b = raw_frame(2, status::OK, b"second");
        let mut decoder = FrameDecoder::new();
        let mut joined = a.clone();
        joined.extend_from_slice(&b);
        decoder.extend(&joined);

        match decoder.decode_reply(Phase::Passthrough).unwrap() {
            Some(PoolFrame::Raw(raw)) => assert_eq!(&raw[..], &a[..]),
            other => panic!("unexpected {other:?}"),
        }
        match decoder.decode_reply(Phase::Passthrough).unwrap() {
            Some(PoolFrame::Raw(raw)) => assert_eq!(&raw[..], &b[..]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(decoder.decode_reply(Phase::Passthrough).unwrap().is_none());
    }

    #[test]
    fn negative_length_is_fatal() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&FrameHeader::new(1, status::OK, -20).encode());
        assert!(matches!(
            decoder.decode_reply(Phase::ExpectHandshake),
            Err(FramingError::BadLength(-20))
        ));
    }

    #[test]
    fn oversized_length_is_fatal_without_buffering_it() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&FrameHeader::new(1, status::OK, i32::MAX).encode());
        assert!(matches!(
            decoder.decode_reply(Phase::Passthrough),
            Err(FramingError::BadLength(_))
        ));
    }

    #[test]
    fn refusal_surfaces_in_any_negotiation_phase() {
        let refusal = ErrorReply::new(3012, "not ready").encode(6);
        for phase in [Phase::ExpectHandshake, Phase::ExpectProtocol, Phase::ExpectLogin] {
            let mut decoder = FrameDecoder::new();
            decoder.extend(&refusal);
            match decoder.decode_reply(phase).unwrap() {
                Some(PoolFrame::Refused { stream_id, error }) => {
                    assert_eq!(stream_id, 6);
                    assert_eq!(error.errno, 3012);
                    assert_eq!(error.message, "not ready");
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn unparseable_reply_is_dropped_not_fatal() {
        // OK status but a 4-byte body where a handshake reply needs 8.
        let short = raw_frame(0, status::OK, &[0, 0, 0, 1]);
        let mut decoder = FrameDecoder::new();
        decoder.extend(&short);
        assert!(decoder.decode_reply(Phase::ExpectHandshake).unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn probe_then_protocol_request() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encode_probe());
        assert!(matches!(
            decoder.decode_request(Phase::ExpectHandshake).unwrap(),
            Some(ClientFrame::Probe)
        ));

        let req = ProtocolRequest {
            stream_id: 1,
            version: 1,
            options: 0,
            expect: 0,
        };
        decoder.extend(&req.encode());
        match decoder.decode_request(Phase::ExpectProtocol).unwrap() {
            Some(ClientFrame::Protocol(got)) => assert_eq!(got, req),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_probe_is_malformed() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0u8; HANDSHAKE_PROBE_LEN]);
        assert!(matches!(
            decoder.decode_request(Phase::ExpectHandshake),
            Err(RequestError::Malformed(CodecError::BadProbe))
        ));
    }

    #[test]
    fn unknown_request_code_is_raw() {
        let frame = raw_frame(9, 3999, b"opaque");
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame);
        match decoder.decode_request(Phase::ExpectProtocol).unwrap() {
            Some(ClientFrame::Raw(raw)) => assert_eq!(&raw[..], &frame[..]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
