//! Integration tests for chat room sockets: connect, backlog, messaging,
//! read receipts and rejection codes.

mod common;

use chatdesk_server::db::models::Role;
use common::{connect, expect_close, expect_silence, next_json, start_test_server};
use futures_util::SinkExt;
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

fn text(value: serde_json::Value) -> Message {
    Message::text(value.to_string())
}

#[tokio::test]
async fn test_client_message_reaches_offline_admins_through_hub() {
    let server = start_test_server().await;

    // Admin is only on the notification stream, not in the room
    let mut hub = connect(&server.hub_url("b1", &server.admin_token())).await;
    let connected = next_json(&mut hub).await;
    assert_eq!(connected["type"], "CONNECTED");
    assert_eq!(connected["payload"]["userId"], "a1");

    let mut client = connect(&server.chat_url("conv1", &server.client_token())).await;
    let backlog = next_json(&mut client).await;
    assert_eq!(backlog["type"], "HISTORY");
    assert_eq!(backlog["messages"], json!([]));
    assert_eq!(backlog["unreadCount"], 0);

    client
        .send(text(json!({"type": "SEND_MESSAGE", "content": "hi"})))
        .await
        .unwrap();

    let echoed = next_json(&mut client).await;
    assert_eq!(echoed["type"], "NEW_MESSAGE");
    assert_eq!(echoed["message"]["content"], "hi");
    assert_eq!(echoed["message"]["senderType"], "CLIENT");
    assert_eq!(echoed["message"]["userId"], "c1");
    assert_eq!(echoed["message"]["conversationId"], "conv1");

    let pushed = next_json(&mut hub).await;
    assert_eq!(pushed["type"], "NEW_MESSAGE");
    assert_eq!(pushed["payload"]["conversationId"], "conv1");
    assert_eq!(pushed["payload"]["message"]["content"], "hi");
    assert!(pushed["payload"]["notificationId"].is_string());

    // The durable record is visible to every admin of the business
    let resp = reqwest::Client::new()
        .get(format!("{}/api/notifications", server.base_url))
        .bearer_auth(server.admin_token())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let notifications = body["notifications"].as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["type"], "NEW_MESSAGE");
    assert_eq!(notifications[0]["content"], "hi");
}

#[tokio::test]
async fn test_admin_mark_as_read_is_seen_by_client() {
    let server = start_test_server().await;

    let mut client = connect(&server.chat_url("conv1", &server.client_token())).await;
    assert_eq!(next_json(&mut client).await["type"], "HISTORY");
    let mut admin = connect(&server.chat_url("conv1", &server.admin_token())).await;
    assert_eq!(next_json(&mut admin).await["type"], "HISTORY");

    client
        .send(text(json!({"type": "SEND_MESSAGE", "content": "hello"})))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await["type"], "NEW_MESSAGE");
    assert_eq!(next_json(&mut admin).await["message"]["content"], "hello");

    admin
        .send(text(json!({"type": "MARK_AS_READ"})))
        .await
        .unwrap();

    let receipt = next_json(&mut client).await;
    assert_eq!(receipt["type"], "MESSAGES_READ");
    assert_eq!(receipt["readBy"], "Alice Admin");
    assert_eq!(receipt["userId"], "a1");
    assert_eq!(receipt["senderType"], "ADMIN");
    assert_eq!(receipt["conversationId"], "conv1");
    expect_silence(&mut admin, Duration::from_millis(300)).await;

    let rows: i64 = server
        .db
        .lock()
        .unwrap()
        .query_row(
            "SELECT COUNT(*) FROM conversation_reads WHERE user_id = 'a1' AND conversation_id = 'conv1'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(rows, 1);

    // An admin in the room means no offline-admin notification was recorded
    let records: i64 = server
        .db
        .lock()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM notifications", [], |row| row.get(0))
        .unwrap();
    assert_eq!(records, 0);
}

#[tokio::test]
async fn test_protocol_errors_keep_socket_usable() {
    let server = start_test_server().await;
    let mut client = connect(&server.chat_url("conv1", &server.client_token())).await;
    next_json(&mut client).await;

    client.send(text(json!({"type": "DANCE"}))).await.unwrap();
    let err = next_json(&mut client).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["error"], "Unknown message type");

    client.send(Message::text("not json")).await.unwrap();
    assert_eq!(next_json(&mut client).await["error"], "Invalid message format");

    client
        .send(text(json!({"type": "SEND_MESSAGE", "content": ""})))
        .await
        .unwrap();
    assert_eq!(
        next_json(&mut client).await["error"],
        "Missing message content or media"
    );

    client
        .send(text(json!({"type": "REQUEST_HISTORY", "page": 1, "limit": 5})))
        .await
        .unwrap();
    let history = next_json(&mut client).await;
    assert_eq!(history["type"], "HISTORY");
    assert_eq!(history["totalCount"], 0);
    assert_eq!(history["hasMore"], false);
}

#[tokio::test]
async fn test_reconnect_replaces_previous_socket() {
    let server = start_test_server().await;
    let url = server.chat_url("conv1", &server.client_token());

    let mut first = connect(&url).await;
    next_json(&mut first).await;
    let mut second = connect(&url).await;
    next_json(&mut second).await;

    assert_eq!(expect_close(&mut first).await, 4000);

    second
        .send(text(json!({"type": "SEND_MESSAGE", "content": "still here"})))
        .await
        .unwrap();
    assert_eq!(next_json(&mut second).await["message"]["content"], "still here");
}

#[tokio::test]
async fn test_connect_rejections_use_close_codes() {
    let server = start_test_server().await;

    let mut ws = connect(&format!(
        "ws://{}/ws/chat?token={}",
        server.addr,
        server.client_token()
    ))
    .await;
    assert_eq!(expect_close(&mut ws).await, 1008);

    let expired = server.token_with_ttl("c1", Role::Client, Some("b1"), chrono::Duration::minutes(-10));
    let mut ws = connect(&server.chat_url("conv1", &expired)).await;
    assert_eq!(expect_close(&mut ws).await, 4001);

    let mut ws = connect(&server.chat_url("conv1", "garbage")).await;
    assert_eq!(expect_close(&mut ws).await, 4002);

    let stranger = server.token("c9", Role::Client, Some("b1"));
    let mut ws = connect(&server.chat_url("conv1", &stranger)).await;
    assert_eq!(expect_close(&mut ws).await, 4003);

    let mut ws = connect(&server.chat_url("ghost", &server.client_token())).await;
    assert_eq!(expect_close(&mut ws).await, 4004);
}

#[tokio::test]
async fn test_plain_http_on_ws_endpoint_is_upgrade_required() {
    let server = start_test_server().await;
    let resp = reqwest::get(format!(
        "{}/ws/chat?conversationId=conv1&token={}",
        server.base_url,
        server.client_token()
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 426);
}
