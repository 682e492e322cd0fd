//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use pool_proxy::config::ProxyConfig;
use pool_proxy::tls::TlsGate;
use pool_proxy::wire::frame::{status, FrameHeader, HEADER_LEN};
use pool_proxy::wire::messages::{
    ErrorReply, HandshakeReply, LoginReply, LoginRequest, ProtocolReply, ProtocolRequest,
    SESSION_ID_LEN,
};
use pool_proxy::SessionListener;

/// Scripted pool behavior for one test.
#[derive(Debug, Clone)]
pub enum PoolScript {
    /// Complete the negotiation, then echo every raw frame back.
    Normal {
        flags: Vec<i32>,
        session_id: [u8; SESSION_ID_LEN],
    },
    /// Accept the connection and never answer anything.
    Silent,
    /// Complete handshake and protocol, refuse the login.
    RefuseLogin { errno: i32, message: String },
    /// Complete the negotiation, then close on the first raw frame.
    DropAfterLogin,
}

/// Start a mock pool speaking the scripted behavior on an ephemeral port.
pub async fn start_mock_pool(script: PoolScript) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let script = script.clone();
                    tokio::spawn(async move {
                        let _ = serve_pool_conn(socket, script).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn serve_pool_conn(mut socket: TcpStream, script: PoolScript) -> std::io::Result<()> {
    if let PoolScript::Silent = script {
        let mut sink = [0u8; 1024];
        while socket.read(&mut sink).await? > 0 {}
        return Ok(());
    }

    // Handshake probe, then the protocol request.
    let mut probe = [0u8; 20];
    socket.read_exact(&mut probe).await?;
    socket
        .write_all(&HandshakeReply::local().encode())
        .await?;

    let protocol = read_frame(&mut socket).await?;
    let protocol_stream = FrameHeader::decode(&protocol).stream_id;
    let flags = match &script {
        PoolScript::Normal { flags, .. } => flags.clone(),
        _ => vec![0, 0, 0],
    };
    socket
        .write_all(&ProtocolReply { words: flags }.encode(protocol_stream))
        .await?;

    let login = read_frame(&mut socket).await?;
    let login_stream = FrameHeader::decode(&login).stream_id;
    match script {
        PoolScript::RefuseLogin { errno, message } => {
            socket
                .write_all(&ErrorReply::new(errno, message).encode(login_stream))
                .await?;
            return Ok(());
        }
        PoolScript::Normal { session_id, .. } => {
            socket
                .write_all(&LoginReply { session_id }.encode(login_stream))
                .await?;
            loop {
                let frame = read_frame(&mut socket).await?;
                socket.write_all(&frame).await?;
            }
        }
        PoolScript::DropAfterLogin => {
            socket
                .write_all(&LoginReply { session_id: [9; SESSION_ID_LEN] }.encode(login_stream))
                .await?;
            let _ = read_frame(&mut socket).await?;
            Ok(())
        }
        PoolScript::Silent => unreachable!(),
    }
}

/// Read one complete frame (header plus body) off a socket.
pub async fn read_frame(socket: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut frame = vec![0u8; HEADER_LEN];
    socket.read_exact(&mut frame).await?;
    let body_len = FrameHeader::decode(&frame).body_len as usize;
    frame.resize(HEADER_LEN + body_len, 0);
    socket.read_exact(&mut frame[HEADER_LEN..]).await?;
    Ok(frame)
}

/// Start the proxy against `pool_addr`, binding within a ten-port range.
pub async fn start_proxy(
    pool_addr: SocketAddr,
    port_base: u16,
    response_secs: u64,
) -> SessionListener {
    let mut config = ProxyConfig::default();
    config.listener.port_range_start = port_base;
    config.listener.port_range_end = port_base + 9;
    config.pool.address = pool_addr.to_string();
    config.timeouts.response_secs = response_secs;
    config.timeouts.connect_secs = 2;

    let gate = Arc::new(TlsGate::from_config(&config.tls, "127.0.0.1").unwrap());
    SessionListener::start(Arc::new(config), gate, "127.0.0.1".parse().unwrap())
        .await
        .unwrap()
}

/// A storage-protocol client talking to the proxy.
pub struct TestClient {
    pub stream: TcpStream,
}

impl TestClient {
    pub async fn connect(listener: &SessionListener) -> Self {
        let port = listener.bound_address().port();
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        Self { stream }
    }

    /// Send the probe and consume the fixed-size handshake reply.
    pub async fn handshake(&mut self) {
        self.stream
            .write_all(&pool_proxy::wire::messages::encode_probe())
            .await
            .unwrap();
        let reply = read_frame(&mut self.stream).await.unwrap();
        let header = FrameHeader::decode(&reply);
        assert_eq!(header.code, status::OK);
        assert_eq!(header.body_len, 8);
    }

    /// Negotiate the protocol; returns the reply's flag words.
    pub async fn negotiate(&mut self, stream_id: u16, options: i32) -> Vec<i32> {
        let request = ProtocolRequest {
            stream_id,
            version: 1,
            options,
            expect: 0,
        };
        self.stream.write_all(&request.encode()).await.unwrap();
        let reply = read_frame(&mut self.stream).await.unwrap();
        let header = FrameHeader::decode(&reply);
        assert_eq!(header.stream_id, stream_id);
        assert_eq!(header.code, status::OK);
        ProtocolReply::decode(&reply[HEADER_LEN..]).unwrap().words
    }

    /// Log in; returns the session id.
    pub async fn login(&mut self, stream_id: u16, username: &str) -> [u8; SESSION_ID_LEN] {
        let request = LoginRequest {
            stream_id,
            pid: 100,
            username: username.into(),
            token: Bytes::new(),
        };
        self.stream.write_all(&request.encode()).await.unwrap();
        let reply = read_frame(&mut self.stream).await.unwrap();
        let header = FrameHeader::decode(&reply);
        assert_eq!(header.stream_id, stream_id);
        assert_eq!(header.code, status::OK);
        LoginReply::decode(&reply[HEADER_LEN..]).unwrap().session_id
    }

    /// Read one frame and expect a wire error, returning (errno, message).
    pub async fn expect_error(&mut self) -> (i32, String) {
        let reply = read_frame(&mut self.stream).await.unwrap();
        let header = FrameHeader::decode(&reply);
        assert_eq!(header.code, status::ERROR);
        let error = ErrorReply::decode(&reply[HEADER_LEN..]);
        (error.errno, error.message)
    }
}
