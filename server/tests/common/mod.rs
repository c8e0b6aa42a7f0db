//! Shared harness: start the real router on a random port with a temp data dir.

#![allow(dead_code)]

use chatdesk_server::auth::jwt::issue_access_token;
use chatdesk_server::auth::Identity;
use chatdesk_server::db::models::Role;
use chatdesk_server::db::{format_timestamp, DbPool};
use chatdesk_server::rooms::RoomSettings;
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub base_url: String,
    pub db: DbPool,
    pub jwt_secret: Vec<u8>,
    _data_dir: tempfile::TempDir,
}

/// Start the server on 127.0.0.1:0 with businesses `b1` and `b2`, admin `a1`
/// ("Alice Admin") of `b1`, clients `c1` ("Carol") and `c2` ("Dave"), and
/// conversation `conv1` between `c1` and `b1`.
pub async fn start_test_server() -> TestServer {
    let data_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_path = data_dir.path().to_str().unwrap().to_string();

    let db = chatdesk_server::db::init_db(&data_path).expect("Failed to init DB");
    let jwt_secret = chatdesk_server::auth::jwt::load_or_generate_jwt_secret(&data_path)
        .expect("Failed to generate JWT secret");
    seed(&db);

    let state = chatdesk_server::state::AppState::new(
        db.clone(),
        jwt_secret.clone(),
        RoomSettings::default(),
    );
    let app = chatdesk_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        base_url: format!("http://{}", addr),
        db,
        jwt_secret,
        _data_dir: data_dir,
    }
}

fn seed(db: &DbPool) {
    let conn = db.lock().unwrap();
    let now = format_timestamp(&chrono::Utc::now());
    conn.execute_batch(&format!(
        "INSERT INTO businesses (id, name, created_at, updated_at) VALUES ('b1', 'Acme', '{now}', '{now}');
         INSERT INTO businesses (id, name, created_at, updated_at) VALUES ('b2', 'Globex', '{now}', '{now}');
         INSERT INTO users (id, email, name, role, business_id, created_at, updated_at)
             VALUES ('a1', 'alice@acme.test', 'Alice Admin', 'ADMIN', 'b1', '{now}', '{now}');
         INSERT INTO users (id, email, name, role, business_id, created_at, updated_at)
             VALUES ('c1', 'carol@example.test', 'Carol', 'CLIENT', NULL, '{now}', '{now}');
         INSERT INTO users (id, email, name, role, business_id, created_at, updated_at)
             VALUES ('c2', 'dave@example.test', 'Dave', 'CLIENT', NULL, '{now}', '{now}');
         INSERT INTO conversations (id, business_id, user_id, created_at, updated_at)
             VALUES ('conv1', 'b1', 'c1', '{now}', '{now}');"
    ))
    .unwrap();
}

impl TestServer {
    pub fn token(&self, user_id: &str, role: Role, business_id: Option<&str>) -> String {
        self.token_with_ttl(user_id, role, business_id, chrono::Duration::hours(1))
    }

    pub fn token_with_ttl(
        &self,
        user_id: &str,
        role: Role,
        business_id: Option<&str>,
        ttl: chrono::Duration,
    ) -> String {
        let identity = Identity {
            user_id: user_id.to_string(),
            role,
            business_id: business_id.map(str::to_string),
            name: None,
        };
        issue_access_token(&self.jwt_secret, &identity, ttl).unwrap()
    }

    pub fn admin_token(&self) -> String {
        self.token("a1", Role::Admin, Some("b1"))
    }

    pub fn client_token(&self) -> String {
        self.token("c1", Role::Client, Some("b1"))
    }

    pub fn chat_url(&self, conversation_id: &str, token: &str) -> String {
        format!(
            "ws://{}/ws/chat?conversationId={}&token={}",
            self.addr, conversation_id, token
        )
    }

    pub fn hub_url(&self, business_id: &str, token: &str) -> String {
        format!(
            "ws://{}/ws/notifications?businessId={}&token={}",
            self.addr, business_id, token
        )
    }
}

pub async fn connect(url: &str) -> WsStream {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws
}

/// Next JSON text frame, skipping pings.
pub async fn next_json(ws: &mut WsStream) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("Timed out waiting for a frame")
            .expect("Stream ended")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Expected text frame, got {:?}", other),
        }
    }
}

/// Assert no text frame arrives within `wait`.
pub async fn expect_silence(ws: &mut WsStream, wait: Duration) {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            Ok(other) => panic!("Expected no frame, got {:?}", other),
        }
    }
}

/// Wait for the server's close frame and return its code.
pub async fn expect_close(ws: &mut WsStream) -> u16 {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("Timed out waiting for close");
        match msg {
            Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("Expected close frame, got {:?}", other),
        }
    }
}
