//! Raw relay tests for the pool proxy.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use pool_proxy::wire::frame::{errno, FrameHeader};

mod common;

use common::{read_frame, start_mock_pool, start_proxy, PoolScript, TestClient};

async fn logged_in_client(port_base: u16) -> (pool_proxy::SessionListener, TestClient) {
    let pool = start_mock_pool(PoolScript::Normal {
        flags: vec![0, 0, 0],
        session_id: [1; 16],
    })
    .await;
    let proxy = start_proxy(pool, port_base, 30).await;

    let mut client = TestClient::connect(&proxy).await;
    client.handshake().await;
    client.negotiate(1, 0).await;
    client.login(7, "alice").await;
    (proxy, client)
}

#[tokio::test]
async fn opaque_frames_round_trip_byte_identical() {
    let (_proxy, mut client) = logged_in_client(28300).await;

    // A 37-byte opaque request: 8-byte header plus 29 payload bytes.
    let payload: Vec<u8> = (0u8..29).collect();
    let mut frame = FrameHeader::new(11, 3010, payload.len() as i32).encode().to_vec();
    frame.extend_from_slice(&payload);
    assert_eq!(frame.len(), 37);

    client.stream.write_all(&frame).await.unwrap();
    let echoed = read_frame(&mut client.stream).await.unwrap();
    assert_eq!(echoed, frame);
}

#[tokio::test]
async fn coalesced_raw_frames_stay_ordered() {
    let (_proxy, mut client) = logged_in_client(28310).await;

    let mut first = FrameHeader::new(21, 3010, 4).encode().to_vec();
    first.extend_from_slice(b"aaaa");
    let mut second = FrameHeader::new(22, 3011, 6).encode().to_vec();
    second.extend_from_slice(b"bbbbbb");

    let mut joined = first.clone();
    joined.extend_from_slice(&second);
    client.stream.write_all(&joined).await.unwrap();

    let echo1 = read_frame(&mut client.stream).await.unwrap();
    let echo2 = read_frame(&mut client.stream).await.unwrap();
    assert_eq!(echo1, first);
    assert_eq!(echo2, second);
}

#[tokio::test]
async fn raw_frame_before_login_is_arg_invalid() {
    let pool = start_mock_pool(PoolScript::Normal {
        flags: vec![0, 0, 0],
        session_id: [1; 16],
    })
    .await;
    let proxy = start_proxy(pool, 28320, 30).await;

    let mut client = TestClient::connect(&proxy).await;
    client.handshake().await;
    client.negotiate(1, 0).await;

    // Data frame without having logged in: protocol violation.
    let mut frame = FrameHeader::new(9, 3010, 4).encode().to_vec();
    frame.extend_from_slice(b"data");
    client.stream.write_all(&frame).await.unwrap();

    let (code, _message) = client.expect_error().await;
    assert_eq!(code, errno::ARG_INVALID);

    let mut probe = [0u8; 1];
    assert_eq!(client.stream.read(&mut probe).await.unwrap(), 0);
}

#[tokio::test]
async fn pool_drop_mid_session_closes_the_client_too() {
    let pool = start_mock_pool(PoolScript::DropAfterLogin).await;
    let proxy = start_proxy(pool, 28330, 30).await;

    let mut client = TestClient::connect(&proxy).await;
    client.handshake().await;
    client.negotiate(1, 0).await;
    client.login(7, "alice").await;

    let mut frame = FrameHeader::new(31, 3010, 4).encode().to_vec();
    frame.extend_from_slice(b"ping");
    client.stream.write_all(&frame).await.unwrap();

    // The request was outstanding, so exactly one error reply precedes
    // the close.
    let (code, _message) = client.expect_error().await;
    assert_eq!(code, errno::IO_ERROR);

    let mut probe = [0u8; 1];
    assert_eq!(client.stream.read(&mut probe).await.unwrap(), 0);
}

#[tokio::test]
async fn malformed_probe_ends_the_session() {
    let pool = start_mock_pool(PoolScript::Normal {
        flags: vec![0, 0, 0],
        session_id: [1; 16],
    })
    .await;
    let proxy = start_proxy(pool, 28340, 30).await;

    let mut client = TestClient::connect(&proxy).await;
    client.stream.write_all(&[0u8; 20]).await.unwrap();

    let (code, _message) = client.expect_error().await;
    assert_eq!(code, errno::ARG_INVALID);

    let mut probe = [0u8; 1];
    assert_eq!(client.stream.read(&mut probe).await.unwrap(), 0);
}
