//! TCP and WebSocket transports against in-process agents.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use tokio_tungstenite::tungstenite::Message;

use crate::{
    codec::{encode_frame, FrameDecoder},
    CopilotClient, CopilotError,
};

fn answer(request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    let result = match request.get("method").and_then(Value::as_str) {
        Some("ping") => json!({}),
        Some("status") => json!({"version": "tcp-test"}),
        _ => json!({}),
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

/// A one-connection agent listening on TCP.
async fn spawn_tcp_agent() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();

    tokio::spawn(async move {
        let (mut stream, _addr) = listener.accept().await.expect("accept");
        let mut decoder = FrameDecoder::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let messages = decoder.push(&chunk[..n]).expect("decode");
            for message in messages {
                if let Some(reply) = answer(&message) {
                    let frame = encode_frame(&reply).expect("encode");
                    if stream.write_all(&frame).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    port
}

/// A one-connection agent listening on a WebSocket; each frame carries one
/// Content-Length-framed message, same as every other transport.
async fn spawn_ws_agent() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();

    tokio::spawn(async move {
        let (stream, _addr) = listener.accept().await.expect("accept");
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("ws accept");
        let (mut sink, mut source) = ws.split();
        let mut decoder = FrameDecoder::new();

        while let Some(Ok(message)) = source.next().await {
            let payload = match message {
                Message::Binary(payload) => payload.to_vec(),
                Message::Text(payload) => payload.as_bytes().to_vec(),
                Message::Close(_) => break,
                _ => continue,
            };
            let messages = decoder.push(&payload).expect("decode");
            for message in messages {
                if let Some(reply) = answer(&message) {
                    let frame = encode_frame(&reply).expect("encode");
                    if sink.send(Message::Binary(frame.into())).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    port
}

#[tokio::test]
async fn tcp_transport_connects_and_serves_rpcs() {
    let port = spawn_tcp_agent().await;

    let client = CopilotClient::builder()
        .tcp("127.0.0.1", port)
        .handshake_timeout(Duration::from_secs(5))
        .rpc_timeout(Duration::from_secs(5))
        .build();
    client.start().await.expect("start");

    let status = client.status().await.expect("status");
    assert_eq!(status.version.as_deref(), Some("tcp-test"));

    client.stop().await.expect("stop");
}

#[tokio::test]
async fn tcp_connect_failure_surfaces_as_a_transport_error() {
    // Nothing listens on this port.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);

    let client = CopilotClient::builder().tcp("127.0.0.1", port).build();
    let error = client.start().await.expect_err("must fail");
    assert!(matches!(error, CopilotError::Transport(_)), "{error}");
}

#[tokio::test]
async fn websocket_transport_connects_and_serves_rpcs() {
    let port = spawn_ws_agent().await;

    let client = CopilotClient::builder()
        .websocket(format!("ws://127.0.0.1:{port}"))
        .handshake_timeout(Duration::from_secs(5))
        .rpc_timeout(Duration::from_secs(5))
        .build();
    client.start().await.expect("start");

    let status = client.status().await.expect("status");
    assert_eq!(status.version.as_deref(), Some("tcp-test"));

    client.stop().await.expect("stop");
}
