//! Per-leg stream handle.
//!
//! A leg starts out as a plain TCP stream and may switch to encrypted
//! framing exactly once, at a negotiation phase boundary. The handle is
//! taken out of the leg for the duration of the switch.

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsStream;

pub enum LegIo {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    /// Placeholder while a TLS transition owns the stream.
    Detached,
}

impl LegIo {
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            LegIo::Plain(stream) => stream.read(buf).await,
            LegIo::Tls(stream) => stream.read(buf).await,
            LegIo::Detached => Err(detached()),
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            LegIo::Plain(stream) => stream.write_all(buf).await,
            LegIo::Tls(stream) => stream.write_all(buf).await,
            LegIo::Detached => Err(detached()),
        }
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            LegIo::Plain(stream) => stream.shutdown().await,
            LegIo::Tls(stream) => stream.shutdown().await,
            LegIo::Detached => Ok(()),
        }
    }

    /// Take the plain stream out for a TLS transition, leaving the leg
    /// detached. Returns `None` when the leg is already encrypted.
    pub fn take_plain(&mut self) -> Option<TcpStream> {
        match std::mem::replace(self, LegIo::Detached) {
            LegIo::Plain(stream) => Some(stream),
            other => {
                *self = other;
                None
            }
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, LegIo::Tls(_))
    }
}

fn detached() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "leg stream detached")
}
