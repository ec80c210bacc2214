use std::time::Duration;

use grow_broker::BrokerConfig;
use grow_core::stomp::{StompCommand, StompFrame};

use crate::integration::init_tracing;
use crate::utils::{StompClient, start_broker};

#[tokio::test]
async fn test_connect_negotiates_heartbeat() {
    init_tracing();
    let (url, service) = start_broker(BrokerConfig {
        heartbeat_ms: 100,
        ..Default::default()
    })
    .await
    .unwrap();

    let (mut client, connected) = StompClient::handshake(&url, "0,100").await.unwrap();

    assert_eq!(connected.get_header("version"), Some("1.2"));
    assert_eq!(connected.get_header("heart-beat"), Some("100,100"));
    assert!(connected.get_header("server").is_some());
    assert_eq!(service.client_count(), 1);

    // Only the broker sends heart-beats, as the client asked for.
    let beat = client.next_raw().await.unwrap().unwrap();
    assert_eq!(beat.into_text().unwrap().as_str(), "\n");
}

#[tokio::test]
async fn test_silent_client_is_dropped() {
    init_tracing();
    let (url, _service) = start_broker(BrokerConfig {
        heartbeat_ms: 100,
        ..Default::default()
    })
    .await
    .unwrap();

    // Promises a heart-beat every 100 ms and never sends one.
    let (mut client, _) = StompClient::handshake(&url, "100,0").await.unwrap();

    let frames = client.until_closed().await.unwrap();
    assert!(frames.is_empty());
}

#[tokio::test]
async fn test_frame_before_connect_is_rejected() {
    init_tracing();
    let (url, _service) = start_broker(BrokerConfig::default()).await.unwrap();
    let mut client = StompClient::connect(&url).await.unwrap();

    client.subscribe("sub-0", "/topic/room/r1").await.unwrap();

    let frames = client.until_closed().await.unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, StompCommand::Error);
    assert_eq!(frames[0].get_header("message"), Some("expected CONNECT"));
}

#[tokio::test]
async fn test_unsupported_version_is_rejected() {
    init_tracing();
    let (url, _service) = start_broker(BrokerConfig::default()).await.unwrap();
    let mut client = StompClient::connect(&url).await.unwrap();

    client
        .send(&StompFrame::new(StompCommand::Connect).header("accept-version", "1.0,1.1"))
        .await
        .unwrap();

    let frames = client.until_closed().await.unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, StompCommand::Error);
}

#[tokio::test]
async fn test_garbage_frame_is_rejected() {
    init_tracing();
    let (url, _service) = start_broker(BrokerConfig::default()).await.unwrap();
    let (mut client, _) = StompClient::handshake(&url, "0,0").await.unwrap();

    client
        .send(&StompFrame::new(StompCommand::Subscribe).header("id", "sub-0"))
        .await
        .unwrap();

    let frames = client.until_closed().await.unwrap();
    assert_eq!(frames[0].command, StompCommand::Error);
    assert!(
        frames[0]
            .body_str()
            .unwrap()
            .contains("requires id and destination")
    );
}

#[tokio::test]
async fn test_unparsable_frame_closes_connection() {
    init_tracing();
    let (url, _service) = start_broker(BrokerConfig::default()).await.unwrap();
    let (mut client, _) = StompClient::handshake(&url, "0,0").await.unwrap();

    client.send_text("HELLO\nno-colon-here\n\n\0").await.unwrap();

    let frames = client.until_closed().await.unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, StompCommand::Error);
    assert!(
        frames[0]
            .get_header("message")
            .unwrap()
            .starts_with("malformed frame")
    );
}

#[tokio::test]
async fn test_huge_heartbeat_is_capped() {
    init_tracing();
    let (url, service) = start_broker(BrokerConfig {
        heartbeat_ms: 100,
        ..Default::default()
    })
    .await
    .unwrap();

    let (mut client, _) = StompClient::handshake(
        &url,
        "18446744073709551615,18446744073709551615",
    )
    .await
    .unwrap();

    client
        .send(
            &StompFrame::new(StompCommand::Subscribe)
                .header("id", "sub-0")
                .header("destination", "/topic/room/r1")
                .header("receipt", "r-1"),
        )
        .await
        .unwrap();
    let receipt = client.recv().await.unwrap();
    assert_eq!(receipt.get_header("receipt-id"), Some("r-1"));
    assert_eq!(service.client_count(), 1);
}

#[tokio::test]
async fn test_receipts_and_disconnect() {
    init_tracing();
    let (url, service) = start_broker(BrokerConfig::default()).await.unwrap();
    let (mut client, _) = StompClient::handshake(&url, "0,0").await.unwrap();

    client
        .send(
            &StompFrame::new(StompCommand::Subscribe)
                .header("id", "sub-0")
                .header("destination", "/topic/room/r1")
                .header("receipt", "r-1"),
        )
        .await
        .unwrap();
    let receipt = client.recv().await.unwrap();
    assert_eq!(receipt.command, StompCommand::Receipt);
    assert_eq!(receipt.get_header("receipt-id"), Some("r-1"));
    assert_eq!(service.subscriber_count("/topic/room/r1"), 1);

    client
        .send(&StompFrame::new(StompCommand::Disconnect).header("receipt", "bye"))
        .await
        .unwrap();
    let frames = client.until_closed().await.unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].get_header("receipt-id"), Some("bye"));

    let start = std::time::Instant::now();
    while service.client_count() > 0 && start.elapsed() < Duration::from_secs(2) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(service.client_count(), 0);
    assert_eq!(service.subscriber_count("/topic/room/r1"), 0);
}
