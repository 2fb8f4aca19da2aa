//! End-to-end handshakes between two connections over an in-memory stream

#![allow(clippy::expect_used, clippy::unwrap_used)]

use futures::{SinkExt, StreamExt};
use opcua_uacp::config::{ClientConfig, ServerConfig};
use opcua_uacp::core::codec::UacpCodec;
use opcua_uacp::error::ProtocolError;
use opcua_uacp::protocol::dispatcher::Dispatcher;
use opcua_uacp::protocol::message::*;
use opcua_uacp::protocol::status::StatusCode;
use opcua_uacp::transport::UacpConnection;
use std::time::Duration;
use tokio_util::codec::Framed;

fn server_config() -> ServerConfig {
    ServerConfig {
        receive_buffer_size: 16384,
        send_buffer_size: 32768,
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn test_connect_and_accept() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let server = tokio::spawn(async move {
        UacpConnection::accept(server_io, &server_config()).await
    });

    let client = UacpConnection::connect(client_io, &ClientConfig::default())
        .await
        .expect("client handshake");
    let server = server.await.unwrap().expect("server handshake");

    assert_eq!(client.limits().send_buffer_size, 16384);
    assert_eq!(client.limits().receive_buffer_size, 32768);
    assert_eq!(server.limits().receive_buffer_size, 16384);
    assert_eq!(server.limits().send_buffer_size, 32768);
    assert_eq!(
        server.peer_endpoint_url().and_then(|url| url.as_str()),
        Some("opc.tcp://localhost:4840")
    );
}

#[tokio::test]
async fn test_chunks_flow_both_ways() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let server = tokio::spawn(async move {
        let mut conn = UacpConnection::accept(server_io, &server_config()).await?;
        let dispatcher = Dispatcher::new();
        dispatcher.register(&MESSAGE_TYPE_MESSAGE, |chunk| {
            let mut reply = chunk.payload.to_vec();
            reply.reverse();
            Ok(Some(Generic::new(MESSAGE_TYPE_MESSAGE, CHUNK_FINAL, reply)))
        })?;
        conn.serve(&dispatcher).await
    });

    let mut client = UacpConnection::connect(client_io, &ClientConfig::default())
        .await
        .unwrap();
    client
        .send_chunk(Generic::new(MESSAGE_TYPE_MESSAGE, CHUNK_FINAL, vec![1u8, 2, 3]))
        .await
        .unwrap();
    let reply = client.recv_chunk().await.unwrap();
    assert_eq!(&reply.payload[..], &[3, 2, 1]);

    client
        .close(StatusCode::BAD_SECURE_CHANNEL_CLOSED, "done")
        .await
        .unwrap();
    match server.await.unwrap() {
        Err(ProtocolError::RemoteError { code, reason }) => {
            assert_eq!(code, StatusCode::BAD_SECURE_CHANNEL_CLOSED);
            assert_eq!(reason, "done");
        }
        other => panic!("expected RemoteError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_chunk_larger_than_peer_buffer_is_refused() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let server = tokio::spawn(async move {
        UacpConnection::accept(server_io, &server_config()).await
    });
    let mut client = UacpConnection::connect(client_io, &ClientConfig::default())
        .await
        .unwrap();
    let _server = server.await.unwrap().unwrap();

    let chunk = Generic::new(MESSAGE_TYPE_MESSAGE, CHUNK_FINAL, vec![0u8; 16384]);
    assert!(matches!(
        client.send_chunk(chunk).await,
        Err(ProtocolError::MessageTooLarge {
            size: 16392,
            max: 16384
        })
    ));
}

fn limited_server(max_message_size: u32, max_chunk_count: u32) -> ServerConfig {
    ServerConfig {
        max_message_size,
        max_chunk_count,
        ..ServerConfig::default()
    }
}

fn intermediate(len: usize) -> Generic {
    Generic::new(MESSAGE_TYPE_MESSAGE, CHUNK_INTERMEDIATE, vec![0u8; len])
}

#[tokio::test]
async fn test_sender_honours_peer_chunk_count() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let server = tokio::spawn(async move {
        UacpConnection::accept(server_io, &limited_server(0, 2)).await
    });
    let mut client = UacpConnection::connect(client_io, &ClientConfig::default())
        .await
        .unwrap();
    let mut server = server.await.unwrap().unwrap();
    assert_eq!(client.limits().max_chunk_count, 2);

    client.send_chunk(intermediate(100)).await.unwrap();
    client.send_chunk(intermediate(100)).await.unwrap();
    match client.send_chunk(intermediate(100)).await {
        Err(ProtocolError::ProtocolViolation { status, .. }) => {
            assert_eq!(status, StatusCode::BAD_TCP_MESSAGE_TOO_LARGE);
        }
        other => panic!("expected chunk count violation, got {other:?}"),
    }

    // abort ends the oversized message and the next one starts fresh
    client
        .send_chunk(Generic::new(MESSAGE_TYPE_MESSAGE, CHUNK_ABORT, Vec::<u8>::new()))
        .await
        .unwrap();
    client.send_chunk(intermediate(100)).await.unwrap();
    client
        .send_chunk(Generic::new(MESSAGE_TYPE_MESSAGE, CHUNK_FINAL, vec![1u8]))
        .await
        .unwrap();

    let mut received = Vec::new();
    for _ in 0..5 {
        received.push(server.recv_chunk().await.unwrap().chunk_type);
    }
    assert_eq!(
        received,
        vec![
            CHUNK_INTERMEDIATE,
            CHUNK_INTERMEDIATE,
            CHUNK_ABORT,
            CHUNK_INTERMEDIATE,
            CHUNK_FINAL
        ]
    );
}

#[tokio::test]
async fn test_sender_honours_peer_message_size() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let server = tokio::spawn(async move {
        UacpConnection::accept(server_io, &limited_server(20_000, 0)).await
    });
    let mut client = UacpConnection::connect(client_io, &ClientConfig::default())
        .await
        .unwrap();
    let _server = server.await.unwrap().unwrap();

    client.send_chunk(intermediate(8_000)).await.unwrap();
    client.send_chunk(intermediate(8_000)).await.unwrap();
    assert!(matches!(
        client.send_chunk(intermediate(8_000)).await,
        Err(ProtocolError::MessageTooLarge {
            size: 24_000,
            max: 20_000
        })
    ));
    assert!(matches!(
        client
            .send_chunk(Generic::new(MESSAGE_TYPE_MESSAGE, CHUNK_FINAL, vec![0u8; 5_000]))
            .await,
        Err(ProtocolError::MessageTooLarge { .. })
    ));
    client
        .send_chunk(Generic::new(MESSAGE_TYPE_MESSAGE, CHUNK_FINAL, vec![0u8; 4_000]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_receiver_closes_on_too_many_chunks() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let server = tokio::spawn(async move {
        let mut conn = UacpConnection::accept(server_io, &limited_server(0, 2)).await?;
        let mut results = Vec::new();
        for _ in 0..3 {
            results.push(conn.recv_chunk().await);
        }
        Ok::<_, ProtocolError>(results)
    });

    // a peer that ignores the Acknowledge limits
    let mut peer = Framed::new(client_io, UacpCodec::default());
    peer.send(Message::Hello(Hello::new(
        0,
        65535,
        65535,
        0,
        "opc.tcp://localhost:4840",
    )))
    .await
    .unwrap();
    match peer.next().await.unwrap().unwrap() {
        Message::Acknowledge(ack) => assert_eq!(ack.max_chunk_count, 2),
        other => panic!("expected Acknowledge, got {other:?}"),
    }
    for _ in 0..3 {
        peer.send(Message::Generic(intermediate(10))).await.unwrap();
    }

    match peer.next().await.unwrap().unwrap() {
        Message::Error(err) => assert_eq!(err.code, StatusCode::BAD_TCP_MESSAGE_TOO_LARGE),
        other => panic!("expected Error, got {other:?}"),
    }
    let results = server.await.unwrap().unwrap();
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(matches!(
        results[2],
        Err(ProtocolError::ProtocolViolation { .. })
    ));
}

#[tokio::test]
async fn test_reverse_connection() {
    let (server_io, client_io) = tokio::io::duplex(1 << 16);
    let server = tokio::spawn(async move {
        UacpConnection::reverse_connect(server_io, &server_config()).await
    });

    let client_config = ClientConfig {
        endpoint_url: String::new(),
        ..ClientConfig::default()
    };
    let client = UacpConnection::accept_reverse(client_io, &client_config)
        .await
        .expect("reverse handshake");
    let server = server.await.unwrap().expect("server side");

    assert_eq!(
        client
            .handshake()
            .peer_server_uri()
            .and_then(|uri| uri.as_str()),
        Some(ServerConfig::default().server_uri.as_str())
    );
    assert_eq!(
        server.peer_endpoint_url().and_then(|url| url.as_str()),
        Some(ServerConfig::default().endpoint_url.as_str())
    );
}

#[tokio::test]
async fn test_server_rejection_reaches_client() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let server = tokio::spawn(async move {
        let config = ServerConfig {
            protocol_version: 5,
            ..ServerConfig::default()
        };
        UacpConnection::accept(server_io, &config).await
    });

    let client = UacpConnection::connect(client_io, &ClientConfig::default()).await;
    match client {
        Err(ProtocolError::RemoteError { code, .. }) => {
            assert_eq!(code, StatusCode::BAD_PROTOCOL_VERSION_UNSUPPORTED);
        }
        other => panic!("expected RemoteError, got {other:?}"),
    }
    assert!(matches!(
        server.await.unwrap(),
        Err(ProtocolError::ProtocolViolation { .. })
    ));
}

#[tokio::test]
async fn test_malformed_hello_gets_decoding_error() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let server = tokio::spawn(async move {
        UacpConnection::accept(server_io, &ServerConfig::default()).await
    });

    // HEL F whose endpoint URL prefix is -5
    let mut peer = Framed::new(client_io, UacpCodec::default());
    let mut raw = vec![0x48u8, 0x45, 0x4c, 0x46, 0x20, 0x00, 0x00, 0x00];
    raw.extend_from_slice(&[0u8; 20]);
    raw.extend_from_slice(&(-5i32).to_le_bytes());
    tokio::io::AsyncWriteExt::write_all(peer.get_mut(), &raw)
        .await
        .unwrap();

    match peer.next().await.unwrap().unwrap() {
        Message::Error(err) => assert_eq!(err.code, StatusCode::BAD_DECODING_ERROR),
        other => panic!("expected Error, got {other:?}"),
    }
    assert!(matches!(
        server.await.unwrap(),
        Err(ProtocolError::InvalidLength(-5))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_times_out() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let config = ServerConfig {
        handshake_timeout: Duration::from_millis(500),
        ..ServerConfig::default()
    };
    let server = tokio::spawn(async move { UacpConnection::accept(server_io, &config).await });

    let mut peer = Framed::new(client_io, UacpCodec::default());
    match peer.next().await.unwrap().unwrap() {
        Message::Error(err) => assert_eq!(err.code, StatusCode::BAD_TIMEOUT),
        other => panic!("expected Error, got {other:?}"),
    }
    assert!(matches!(server.await.unwrap(), Err(ProtocolError::Timeout)));
}

#[tokio::test]
async fn test_violation_reported_when_peer_already_gone() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let server = tokio::spawn(async move {
        UacpConnection::accept(server_io, &limited_server(0, 1)).await
    });

    let mut peer = Framed::new(client_io, UacpCodec::default());
    peer.send(Message::Hello(Hello::new(
        0,
        65535,
        65535,
        0,
        "opc.tcp://localhost:4840",
    )))
    .await
    .unwrap();
    let mut server = server.await.unwrap().unwrap();
    peer.send(Message::Generic(intermediate(10))).await.unwrap();
    peer.send(Message::Generic(intermediate(10))).await.unwrap();
    drop(peer);

    // the closing Error cannot be delivered, the violation still surfaces
    assert!(server.recv_chunk().await.is_ok());
    assert!(matches!(
        server.recv_chunk().await,
        Err(ProtocolError::ProtocolViolation { .. })
    ));
    assert!(matches!(
        server.recv_chunk().await,
        Err(ProtocolError::ConnectionClosed)
    ));
}
