//! Terminal fault handling.
//!
//! # Responsibilities
//! - Classify every way a session can die into one taxonomy
//! - Convert a fault into at most one client-visible error reply
//! - Tear both legs down exactly once
//! - Escalate unclassified defects to process-level error reporting
//!
//! # Design Decisions
//! - All error conversion happens here; the legs and the decoder never
//!   build client-visible replies themselves
//! - Ordinary disconnects log at reduced severity; defects log at error
//!   severity and bump a fault counter so operators see them independent
//!   of the client-visible reply

use thiserror::Error;

use crate::session::ProxySession;
use crate::wire::frame::errno;
use crate::wire::messages::{CodecError, ErrorReply};
use crate::wire::{FramingError, RequestError};

/// Which side of the session an I/O-level fault belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Client,
    Pool,
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Leg::Client => write!(f, "client"),
            Leg::Pool => write!(f, "pool"),
        }
    }
}

/// Everything that can terminate a proxy session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{leg} leg i/o failure: {source}")]
    Io {
        leg: Leg,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} connection closed")]
    Disconnected(Leg),

    #[error("{leg} leg framing fault: {source}")]
    Framing {
        leg: Leg,
        #[source]
        source: FramingError,
    },

    #[error("malformed request: {0}")]
    Malformed(#[from] CodecError),

    #[error("pool refused negotiation: {message}")]
    Refused { errno: i32, message: String },

    #[error("no response from pool within {0} seconds")]
    Timeout(u64),

    #[error("failed to resolve pool address: {0}")]
    Resolve(String),

    #[error("protocol violation: {0}")]
    Violation(&'static str),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    pub fn client_io(source: std::io::Error) -> Self {
        Self::Io {
            leg: Leg::Client,
            source,
        }
    }

    pub fn pool_io(source: std::io::Error) -> Self {
        Self::Io {
            leg: Leg::Pool,
            source,
        }
    }

    /// Lift a client-direction decode failure, tagging framing faults
    /// with the leg they killed.
    pub fn from_request(err: RequestError) -> Self {
        match err {
            RequestError::Framing(source) => Self::Framing {
                leg: Leg::Client,
                source,
            },
            RequestError::Malformed(source) => Self::Malformed(source),
        }
    }

    /// An ordinary peer-went-away condition, as opposed to a defect.
    pub fn is_disconnect(&self) -> bool {
        match self {
            SessionError::Disconnected(_) => true,
            SessionError::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }

    /// Map the fault to its wire-defined error reply.
    pub fn to_wire(&self) -> ErrorReply {
        match self {
            SessionError::Refused { errno, message } => ErrorReply::new(*errno, message.clone()),
            SessionError::Timeout(_) | SessionError::Io { .. } | SessionError::Disconnected(_) => {
                ErrorReply::new(errno::IO_ERROR, self.to_string())
            }
            SessionError::Resolve(_) => ErrorReply::new(errno::FS_ERROR, self.to_string()),
            SessionError::Malformed(_) | SessionError::Violation(_) => {
                ErrorReply::new(errno::ARG_INVALID, self.to_string())
            }
            SessionError::Framing { .. } | SessionError::Internal(_) => {
                ErrorReply::new(errno::SERVER_ERROR, self.to_string())
            }
        }
    }
}

/// Terminal stage: convert the fault into at most one client-visible
/// error reply and close both legs. Safe to call more than once.
pub async fn terminate(session: &mut ProxySession, err: SessionError) {
    if session.torn_down() {
        return;
    }

    metrics::counter!("proxy_faults_total").increment(1);

    if err.is_disconnect() {
        tracing::debug!(session = %session.id(), %err, "session ended by disconnect");
    } else if matches!(err, SessionError::Internal(_)) {
        // Escalated so operators see the defect independent of the
        // client-visible reply.
        tracing::error!(session = %session.id(), %err, "unclassified defect in proxy session");
    } else {
        tracing::warn!(session = %session.id(), %err, "proxy session fault");
    }

    let reply = match &err {
        // A stream whose length prefix cannot be trusted gets no reply.
        SessionError::Framing { .. } => None,
        // The client is gone; nothing to say to it.
        SessionError::Disconnected(Leg::Client) => None,
        SessionError::Io {
            leg: Leg::Client, ..
        } => None,
        // A pool-side disconnect only warrants a reply when the client is
        // actually waiting on something.
        SessionError::Disconnected(Leg::Pool) | SessionError::Io { leg: Leg::Pool, .. } => {
            session.outstanding_request().then(|| err.to_wire())
        }
        _ => Some(err.to_wire()),
    };

    if let Some(reply) = reply {
        if let Err(write_err) = session.send_client_error(reply).await {
            tracing::debug!(session = %session.id(), %write_err, "error reply not delivered");
        }
    }

    session.teardown().await;
}
