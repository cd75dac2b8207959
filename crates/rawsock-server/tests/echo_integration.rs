//! Echo service integration tests.

use std::time::Duration;

use rawsock_server::{build_server, ServerConfig};
use rawsock_ws::{encode_masked_frame, ShutdownSignal};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const UPGRADE_REQUEST: &[u8] = b"GET / HTTP/1.1\r\n\
    Host: 127.0.0.1:9607\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Key: x3JJHMbDL1EzLkh9GBhXDw==\r\n\
    Sec-WebSocket-Version: 13\r\n\r\n";

async fn read_until_blank_line(stream: &mut TcpStream) -> String {
    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        assert_eq!(stream.read(&mut byte).await.unwrap(), 1);
        response.push(byte[0]);
    }
    String::from_utf8(response).unwrap()
}

#[tokio::test]
async fn test_echo_server_round_trip() {
    let config = ServerConfig::default();
    let shutdown = ShutdownSignal::new();
    let server = build_server(&config, shutdown.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move { server.serve(listener).await });

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(UPGRADE_REQUEST).await.unwrap();
    let response = read_until_blank_line(&mut client).await;
    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(response.contains("Sec-WebSocket-Accept: HSmrc0sMlYUkAGmm5OPpG2HaGWk=\r\n"));

    client
        .write_all(&encode_masked_frame("héllo".as_bytes(), [9, 8, 7, 6]))
        .await
        .unwrap();
    let mut frame = [0u8; 8];
    client.read_exact(&mut frame).await.unwrap();
    assert_eq!(frame[..2], [0x81, 6]);
    assert_eq!(&frame[2..], "héllo".as_bytes());

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("server should stop")
        .unwrap()
        .unwrap();
}
