use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use crate::ws::registry::ConnectionHandle;
use crate::ws::ParticipantId;

/// Ping interval: server sends WebSocket ping every 30 seconds.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts to register with an actor that may be stopping concurrently.
const JOIN_ATTEMPTS: usize = 3;

/// Close code when no actor would accept the connection.
pub const CLOSE_UNAVAILABLE: u16 = 1011;

/// The actor a socket belongs to: a chat room or a notification hub.
pub trait ConnectionOwner: Send + Sync + 'static {
    /// Register the connection. False if the actor stopped before accepting it.
    fn join(
        &self,
        participant: &ParticipantId,
        connection: &ConnectionHandle,
    ) -> impl Future<Output = bool> + Send;

    /// Hand an inbound text frame to the actor's mailbox.
    fn deliver(&self, participant: &ParticipantId, text: String);

    fn leave(&self, participant: &ParticipantId, connection_id: Uuid);
}

/// Run the actor-per-connection pump for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards frames queued by the owning actor
/// - Ping task: keeps the connection honest about abrupt disconnects
/// - Reader loop: forwards text frames to the owning actor
///
/// `resolve` is called again if the resolved actor stops before accepting the
/// join, so a connection racing an idle cleanup lands on the fresh instance.
pub async fn run_connection<O, R>(socket: WebSocket, participant: ParticipantId, resolve: R)
where
    O: ConnectionOwner,
    R: Fn() -> O + Send,
{
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let connection = ConnectionHandle::new(tx.clone());

    // Spawn writer task first so the backlog sent on join has somewhere to go
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let mut owner = None;
    for attempt in 1..=JOIN_ATTEMPTS {
        let candidate = resolve();
        if candidate.join(&participant, &connection).await {
            owner = Some(candidate);
            break;
        }
        tracing::debug!(participant = %participant, attempt, "Actor stopped before join, re-resolving");
    }
    let Some(owner) = owner else {
        tracing::error!(participant = %participant, "No actor accepted the connection");
        let _ = tx.send(Message::Close(Some(CloseFrame {
            code: CLOSE_UNAVAILABLE,
            reason: "Actor unavailable".into(),
        })));
        drop(tx);
        drop(connection);
        let _ = writer_handle.await;
        return;
    };

    tracing::info!(
        participant = %participant,
        connection_id = %connection.id,
        "WebSocket actor started"
    );

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: forward incoming frames to the owning actor
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    owner.deliver(&participant, text.to_string());
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        participant = %participant,
                        bytes = data.len(),
                        "Ignoring binary frame (protocol is JSON text)"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        participant = %participant,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    participant = %participant,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(participant = %participant, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks, then deregister
    writer_handle.abort();
    ping_handle.abort();
    owner.leave(&participant, connection.id);

    tracing::info!(
        participant = %participant,
        connection_id = %connection.id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives frames from the mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}
