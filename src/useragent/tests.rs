use super::codec::NetstringCodec;
use super::*;
use crate::event::UaEventKind;
use anyhow::Result;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::codec::Framed;

#[tokio::test]
async fn test_baresip_command_and_events() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let (client, mut channels) = BaresipClientBuilder::new()
        .with_addr(addr.to_string())
        .build();
    let client = Arc::new(client);
    let serve_client = client.clone();
    let serve_handle = tokio::spawn(async move { serve_client.serve().await });

    let (socket, _) = listener.accept().await?;
    let mut peer = Framed::new(socket, NetstringCodec::default());

    timeout(Duration::from_secs(1), channels.connected.recv())
        .await?
        .expect("connected signal");

    client
        .command(CMD_DIAL, "sip:bob@example.com", "dial_cmd_1")
        .await?;
    let frame = timeout(Duration::from_secs(1), peer.next())
        .await?
        .expect("command frame")?;
    let command: serde_json::Value = serde_json::from_slice(&frame)?;
    assert_eq!(command["command"], "dial");
    assert_eq!(command["params"], "sip:bob@example.com");
    assert_eq!(command["token"], "dial_cmd_1");

    peer.send(Bytes::from_static(
        br#"{"response":true,"ok":true,"data":"","token":"dial_cmd_1"}"#,
    ))
    .await?;
    peer.send(Bytes::from_static(
        br#"{"event":true,"class":"call","type":"CALL_OUTGOING","id":"c-1","peeruri":"sip:bob@example.com"}"#,
    ))
    .await?;

    let response = timeout(Duration::from_secs(1), channels.responses.recv())
        .await?
        .expect("response");
    assert!(response.ok);
    assert_eq!(response.token, "dial_cmd_1");

    let event = timeout(Duration::from_secs(1), channels.events.recv())
        .await?
        .expect("event");
    assert_eq!(event.kind, UaEventKind::CallOutgoing);
    assert_eq!(event.id, "c-1");

    drop(peer);
    let result = timeout(Duration::from_secs(1), serve_handle).await??;
    assert!(result.is_err(), "peer close must end serve with an error");
    Ok(())
}

#[tokio::test]
async fn test_malformed_frames_are_skipped() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (client, mut channels) = BaresipClientBuilder::new()
        .with_addr(addr.to_string())
        .build();
    tokio::spawn(async move { client.serve().await });

    let (socket, _) = listener.accept().await?;
    let mut peer = Framed::new(socket, NetstringCodec::default());
    peer.send(Bytes::from_static(b"{not json")).await?;
    peer.send(Bytes::from_static(
        br#"{"event":true,"type":"REGISTER_OK","accountaor":"sip:alice@example.com"}"#,
    ))
    .await?;

    let event = timeout(Duration::from_secs(1), channels.events.recv())
        .await?
        .expect("event");
    assert_eq!(event.kind, UaEventKind::RegisterOk);
    assert_eq!(event.account_aor, "sip:alice@example.com");
    Ok(())
}

#[tokio::test]
async fn test_command_fails_when_not_serving() {
    let (client, _channels) = BaresipClientBuilder::new()
        .with_addr("127.0.0.1:1")
        .with_command_timeout(Duration::from_millis(50))
        .build();
    let result = client.command(CMD_HANGUP, "", "hangup_cmd_1").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_serve_fails_without_socket() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    let (client, _channels) = BaresipClientBuilder::new()
        .with_addr(addr.to_string())
        .build();
    assert!(client.serve().await.is_err());
    Ok(())
}
