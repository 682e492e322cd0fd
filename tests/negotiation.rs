//! Negotiation tests for the pool proxy.

use tokio::io::AsyncReadExt;

use pool_proxy::wire::frame::errno;

mod common;

use common::{start_mock_pool, start_proxy, PoolScript, TestClient};

#[tokio::test]
async fn full_negotiation_relays_flags_and_session() {
    let session_id = [0xab; 16];
    let pool = start_mock_pool(PoolScript::Normal {
        flags: vec![0, 0, 0],
        session_id,
    })
    .await;
    let proxy = start_proxy(pool, 28200, 30).await;

    let mut client = TestClient::connect(&proxy).await;
    client.handshake().await;

    let flags = client.negotiate(1, 0).await;
    assert_eq!(flags, vec![0, 0, 0]);

    let granted = client.login(7, "alice").await;
    assert_eq!(granted, session_id);
}

#[tokio::test]
async fn handshake_is_answered_locally() {
    // The pool never speaks; the probe must still be answered, since the
    // pool-side negotiation only starts at the protocol request.
    let pool = start_mock_pool(PoolScript::Silent).await;
    let proxy = start_proxy(pool, 28210, 30).await;

    let mut client = TestClient::connect(&proxy).await;
    client.handshake().await;
}

#[tokio::test]
async fn pool_silence_becomes_one_io_error_and_close() {
    let pool = start_mock_pool(PoolScript::Silent).await;
    let proxy = start_proxy(pool, 28220, 1).await;

    let mut client = TestClient::connect(&proxy).await;
    client.handshake().await;

    let request = pool_proxy::wire::messages::ProtocolRequest {
        stream_id: 5,
        version: 1,
        options: 0,
        expect: 0,
    };
    tokio::io::AsyncWriteExt::write_all(&mut client.stream, &request.encode())
        .await
        .unwrap();

    let (code, message) = client.expect_error().await;
    assert_eq!(code, errno::IO_ERROR);
    assert!(message.contains("1 second"), "got {message:?}");

    // Both legs close after the single error reply.
    let mut probe = [0u8; 1];
    assert_eq!(client.stream.read(&mut probe).await.unwrap(), 0);
}

#[tokio::test]
async fn login_refusal_is_forwarded_then_closed() {
    let pool = start_mock_pool(PoolScript::RefuseLogin {
        errno: 3010,
        message: "permission denied".into(),
    })
    .await;
    let proxy = start_proxy(pool, 28230, 30).await;

    let mut client = TestClient::connect(&proxy).await;
    client.handshake().await;
    client.negotiate(1, 0).await;

    let request = pool_proxy::wire::messages::LoginRequest {
        stream_id: 7,
        pid: 100,
        username: "alice".into(),
        token: bytes::Bytes::new(),
    };
    tokio::io::AsyncWriteExt::write_all(&mut client.stream, &request.encode())
        .await
        .unwrap();

    let (code, message) = client.expect_error().await;
    assert_eq!(code, 3010);
    assert_eq!(message, "permission denied");

    let mut probe = [0u8; 1];
    assert_eq!(client.stream.read(&mut probe).await.unwrap(), 0);
}

#[tokio::test]
async fn pool_connect_failure_refuses_the_client() {
    // Nothing listens on this address; the client still gets a wire error
    // rather than a bare close.
    let pool = "127.0.0.1:1".parse().unwrap();
    let proxy = start_proxy(pool, 28240, 30).await;

    let mut client = TestClient::connect(&proxy).await;
    let (code, _message) = client.expect_error().await;
    assert_eq!(code, errno::IO_ERROR);
}
