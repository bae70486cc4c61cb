//! Black-box tests that drive a real loopback TCP pair through the opening handshake and a
//! full message exchange.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wsforge::close::StatusCode;
use wsforge::config::{AcceptOptions, WebSocketConfig};
use wsforge::error::Error;
use wsforge::handshake::{accept_async, accept_async_with_config, connect_async};
use wsforge::{MessageType, WebSocketStream};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn bind_loopback() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("ws://{addr}"))
}

#[tokio::test]
async fn echoes_a_text_message() {
    init_logging();
    let (listener, url) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let connection = accept_async(WebSocketStream::Plain(tcp)).await.unwrap();
        let (message_type, bytes) = connection.read().await.unwrap();
        connection.write(message_type, &bytes).await.unwrap();
    });

    let connection = connect_async(&url).await.unwrap();
    connection.write(MessageType::Text, b"hello").await.unwrap();
    let (message_type, bytes) = connection.read().await.unwrap();
    assert_eq!(message_type, MessageType::Text);
    assert_eq!(bytes, b"hello");

    server.await.unwrap();
}

#[tokio::test]
async fn round_trips_a_fragmented_binary_message() {
    init_logging();
    let (listener, url) = bind_loopback().await;
    let payload = vec![7u8; 50_000];
    let expected = payload.clone();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let options = AcceptOptions {
            config: WebSocketConfig {
                read_limit: 1 << 20,
                ..Default::default()
            },
            ..Default::default()
        };
        let connection = accept_async_with_config(WebSocketStream::Plain(tcp), options)
            .await
            .unwrap();
        let (message_type, bytes) = connection.read().await.unwrap();
        connection.write(message_type, &bytes).await.unwrap();
    });

    let options = wsforge::config::DialOptions {
        config: WebSocketConfig {
            max_frame_size: Some(4096),
            read_limit: 1 << 20,
            ..Default::default()
        },
        ..Default::default()
    };
    let connection = wsforge::handshake::connect_async_with_config(&url, options)
        .await
        .unwrap();

    connection
        .write(MessageType::Binary, &payload)
        .await
        .unwrap();
    let (message_type, bytes) = connection.read().await.unwrap();
    assert_eq!(message_type, MessageType::Binary);
    assert_eq!(bytes, expected);

    server.await.unwrap();
}

#[tokio::test]
async fn ping_resolves_once_the_peer_answers() {
    init_logging();
    let (listener, url) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let connection = accept_async(WebSocketStream::Plain(tcp)).await.unwrap();
        // The connection engine answers pings inline while reading; give it a frame to read.
        let _ = connection.read().await;
    });

    let connection = connect_async(&url).await.unwrap();
    connection.ping().await.unwrap();
    connection.close(StatusCode::NORMAL_CLOSURE, "bye").await.unwrap();

    let _ = server.await;
}

#[tokio::test]
async fn close_handshake_carries_the_code_and_reason_to_the_peer() {
    init_logging();
    let (listener, url) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let connection = accept_async(WebSocketStream::Plain(tcp)).await.unwrap();
        match connection.read().await {
            Err(Error::Close(close_err)) => close_err,
            other => panic!("expected a close error, got {other:?}"),
        }
    });

    let connection = connect_async(&url).await.unwrap();
    connection
        .close(StatusCode::GOING_AWAY, "shutting down")
        .await
        .unwrap();

    let close_err = server.await.unwrap();
    assert_eq!(close_err.code, StatusCode::GOING_AWAY);
    assert_eq!(close_err.reason, "shutting down");
}

#[tokio::test]
async fn oversize_message_is_rejected_by_the_reader() {
    init_logging();
    let (listener, url) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let options = AcceptOptions {
            config: WebSocketConfig {
                max_message_size: Some(16),
                max_frame_size: Some(4096),
                ..Default::default()
            },
            ..Default::default()
        };
        let connection = accept_async_with_config(WebSocketStream::Plain(tcp), options)
            .await
            .unwrap();
        let result = connection.read().await;
        assert!(matches!(result, Err(Error::MaxMessageSize)));
    });

    let connection = connect_async(&url).await.unwrap();
    let _ = connection.write(MessageType::Binary, &vec![1u8; 1024]).await;

    server.await.unwrap();
}

#[tokio::test]
async fn reserved_bit_set_forces_a_protocol_error_close() {
    init_logging();
    let (listener, url) = bind_loopback().await;
    let addr = url.trim_start_matches("ws://").to_string();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let connection = accept_async(WebSocketStream::Plain(tcp)).await.unwrap();
        connection.read().await
    });

    // Perform the opening handshake by hand, then write a frame with RSV1 set: the one thing a
    // real client using `Connection` could never do, which is exactly why this has to be a raw
    // socket instead of `connect_async`.
    let mut raw = TcpStream::connect(&addr).await.unwrap();
    let request = format!(
        "GET / HTTP/1.1\r\nHost: {addr}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n"
    );
    raw.write_all(request.as_bytes()).await.unwrap();

    let mut response = vec![0u8; 4096];
    let n = raw.read(&mut response).await.unwrap();
    assert!(String::from_utf8_lossy(&response[..n]).contains("101"));

    // fin=1, rsv1=1, opcode=text; masked, zero-length payload, arbitrary mask key.
    let frame = [0b1100_0001u8, 0b1000_0000, 0, 0, 0, 0];
    raw.write_all(&frame).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("server task should finish")
        .unwrap();
    assert!(matches!(result, Err(Error::RSVNotZero)));
}

#[tokio::test]
async fn concurrent_close_calls_emit_exactly_one_close_frame() {
    init_logging();
    let (listener, url) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let connection = accept_async(WebSocketStream::Plain(tcp)).await.unwrap();
        let _ = connection.read().await;
    });

    let connection = connect_async(&url).await.unwrap();
    let a = connection.clone();
    let b = connection.clone();
    let (r1, r2) = tokio::join!(
        a.close(StatusCode::NORMAL_CLOSURE, "first"),
        b.close(StatusCode::NORMAL_CLOSURE, "second"),
    );
    assert!(r1.is_ok());
    assert!(r2.is_ok());

    server.await.unwrap();
}

#[tokio::test]
async fn a_second_concurrent_writer_fails_promptly() {
    init_logging();
    let (listener, url) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let connection = accept_async(WebSocketStream::Plain(tcp)).await.unwrap();
        let _ = connection.read().await;
    });

    let connection = connect_async(&url).await.unwrap();

    {
        let _first_writer = connection.writer(MessageType::Binary).await.unwrap();
        let second = connection.writer(MessageType::Binary).await;
        assert!(matches!(second, Err(Error::ConcurrentWriter)));
    }

    connection
        .close(StatusCode::NORMAL_CLOSURE, "done")
        .await
        .unwrap();
    let _ = server.await;
}
