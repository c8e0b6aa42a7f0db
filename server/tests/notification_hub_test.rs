//! Integration tests for the per-business notification stream.

mod common;

use chatdesk_server::db::models::Role;
use common::{connect, expect_close, expect_silence, next_json, start_test_server};
use futures_util::SinkExt;
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn test_client_read_receipt_reaches_admin_stream() {
    let server = start_test_server().await;

    let mut hub = connect(&server.hub_url("b1", &server.admin_token())).await;
    assert_eq!(next_json(&mut hub).await["type"], "CONNECTED");

    let mut client = connect(&server.chat_url("conv1", &server.client_token())).await;
    next_json(&mut client).await;
    client
        .send(Message::text(
            json!({"type": "MARK_AS_READ"}).to_string(),
        ))
        .await
        .unwrap();

    let pushed = next_json(&mut hub).await;
    assert_eq!(pushed["type"], "MESSAGES_READ");
    assert_eq!(pushed["payload"]["conversationId"], "conv1");
    assert_eq!(pushed["payload"]["readBy"], "Carol");
    assert_eq!(pushed["payload"]["userId"], "c1");
}

#[tokio::test]
async fn test_hub_requires_matching_business() {
    let server = start_test_server().await;

    let other_business = server.token("a2", Role::Admin, Some("b2"));
    let mut ws = connect(&server.hub_url("b1", &other_business)).await;
    assert_eq!(expect_close(&mut ws).await, 4003);

    let no_business = server.token("c1", Role::Client, None);
    let mut ws = connect(&server.hub_url("b1", &no_business)).await;
    assert_eq!(expect_close(&mut ws).await, 4003);

    let mut ws = connect(&format!(
        "ws://{}/ws/notifications?token={}",
        server.addr,
        server.admin_token()
    ))
    .await;
    assert_eq!(expect_close(&mut ws).await, 1008);
}

#[tokio::test]
async fn test_admin_read_receipt_targets_only_conversation_owner() {
    let server = start_test_server().await;

    let mut carol = connect(&server.hub_url("b1", &server.client_token())).await;
    assert_eq!(next_json(&mut carol).await["type"], "CONNECTED");
    let dave_token = server.token("c2", Role::Client, Some("b1"));
    let mut dave = connect(&server.hub_url("b1", &dave_token)).await;
    assert_eq!(next_json(&mut dave).await["type"], "CONNECTED");

    let mut admin = connect(&server.chat_url("conv1", &server.admin_token())).await;
    next_json(&mut admin).await;
    admin
        .send(Message::text(
            json!({"type": "MARK_AS_READ"}).to_string(),
        ))
        .await
        .unwrap();

    let pushed = next_json(&mut carol).await;
    assert_eq!(pushed["type"], "MESSAGES_READ");
    assert_eq!(pushed["payload"]["readBy"], "Alice Admin");
    expect_silence(&mut dave, Duration::from_millis(300)).await;
}
