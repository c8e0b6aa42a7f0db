//! Per-business notification hub.
//!
//! Holds the live admin and client sockets of one business and pushes
//! `{type, payload}` frames to them when a chat room calls `notify`. State is
//! in-memory only and rebuilt as participants reconnect.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::db::models::{NotificationKind, Role};
use crate::db::format_timestamp;
use crate::rooms::directory::{ActorHandle, Spawn};
use crate::rooms::NotificationHubs;
use crate::ws::connection::ConnectionOwner;
use crate::ws::protocol::HubFrame;
use crate::ws::registry::{ConnectionHandle, ConnectionRegistry};
use crate::ws::ParticipantId;

/// Cross-actor notify call from a chat room to a business hub.
#[derive(Debug, Clone)]
pub struct NotifyRequest {
    pub business_id: String,
    pub event: NotificationKind,
    pub sender_role: Role,
    /// Single recipient; when None the whole `target_role` set is notified
    pub target_user_id: Option<String>,
    pub target_role: Role,
    pub payload: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("business id is required")]
    MissingBusinessId,
    #[error("notify for business {requested} reached hub {hub}")]
    BusinessMismatch { requested: String, hub: String },
    #[error("notification hub is unavailable")]
    Unavailable,
    #[error("notify timed out after {0:?}")]
    Timeout(Duration),
}

pub enum HubCommand {
    Join {
        participant: ParticipantId,
        connection: ConnectionHandle,
        ack: oneshot::Sender<()>,
    },
    Leave {
        participant: ParticipantId,
        connection_id: Uuid,
    },
    Notify {
        request: NotifyRequest,
        reply: oneshot::Sender<Result<usize, NotifyError>>,
    },
    Tick {
        now: DateTime<Utc>,
    },
}

#[derive(Clone)]
pub struct HubHandle {
    business_id: String,
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Ask the hub to push an event. Waits at most `timeout` for the count.
    pub async fn notify(&self, request: NotifyRequest, timeout: Duration) -> Result<usize, NotifyError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Notify { request, reply })
            .map_err(|_| NotifyError::Unavailable)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NotifyError::Unavailable),
            Err(_) => Err(NotifyError::Timeout(timeout)),
        }
    }

    pub fn tick(&self, now: DateTime<Utc>) -> bool {
        self.tx.send(HubCommand::Tick { now }).is_ok()
    }
}

impl ActorHandle for HubHandle {
    fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    fn same_actor(&self, other: &Self) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

impl ConnectionOwner for HubHandle {
    async fn join(&self, participant: &ParticipantId, connection: &ConnectionHandle) -> bool {
        let (ack, accepted) = oneshot::channel();
        let sent = self.tx.send(HubCommand::Join {
            participant: participant.clone(),
            connection: connection.clone(),
            ack,
        });
        sent.is_ok() && accepted.await.is_ok()
    }

    fn deliver(&self, participant: &ParticipantId, _text: String) {
        // Hub sockets are push-only
        tracing::debug!(
            business_id = %self.business_id,
            participant = %participant,
            "Ignoring inbound frame on notification socket"
        );
    }

    fn leave(&self, participant: &ParticipantId, connection_id: Uuid) {
        let _ = self.tx.send(HubCommand::Leave {
            participant: participant.clone(),
            connection_id,
        });
    }
}

pub struct NotificationHub {
    business_id: String,
    admins: ConnectionRegistry,
    clients: ConnectionRegistry,
    cleanup_deadline: Option<DateTime<Utc>>,
    idle_cleanup: chrono::Duration,
}

impl NotificationHub {
    pub fn new(business_id: impl Into<String>, idle_cleanup: chrono::Duration) -> Self {
        Self {
            business_id: business_id.into(),
            admins: ConnectionRegistry::new(),
            clients: ConnectionRegistry::new(),
            cleanup_deadline: None,
            idle_cleanup,
        }
    }

    fn registry(&mut self, role: Role) -> &mut ConnectionRegistry {
        match role {
            Role::Admin => &mut self.admins,
            Role::Client => &mut self.clients,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.admins.is_empty() && self.clients.is_empty()
    }

    pub fn cleanup_deadline(&self) -> Option<DateTime<Utc>> {
        self.cleanup_deadline
    }

    pub fn join(&mut self, participant: ParticipantId, connection: ConnectionHandle) {
        let welcome = HubFrame {
            kind: "CONNECTED".to_string(),
            payload: json!({
                "message": "Connected to notification server",
                "userId": participant.user_id,
                "timestamp": format_timestamp(&Utc::now()),
            }),
        };
        connection.send(welcome.to_message());

        tracing::info!(
            business_id = %self.business_id,
            participant = %participant,
            "Participant joined notification hub"
        );
        self.registry(participant.role).add(participant, connection);
        self.cleanup_deadline = None;
    }

    pub fn leave(&mut self, participant: &ParticipantId, connection_id: Uuid, now: DateTime<Utc>) {
        if self
            .registry(participant.role)
            .remove_if_current(participant, connection_id)
        {
            tracing::info!(
                business_id = %self.business_id,
                participant = %participant,
                "Participant left notification hub"
            );
        }
        self.schedule_if_idle(now);
    }

    /// Push `request` to the matching sockets and return how many were reached.
    pub fn notify(&mut self, request: NotifyRequest) -> Result<usize, NotifyError> {
        if request.business_id.is_empty() {
            return Err(NotifyError::MissingBusinessId);
        }
        if request.business_id != self.business_id {
            return Err(NotifyError::BusinessMismatch {
                requested: request.business_id,
                hub: self.business_id.clone(),
            });
        }

        let message = HubFrame {
            kind: request.event.as_str().to_string(),
            payload: request.payload,
        }
        .to_message();
        let registry = self.registry(request.target_role);
        let notified = match &request.target_user_id {
            Some(user_id) => {
                let target = ParticipantId::new(request.target_role, user_id.as_str());
                usize::from(registry.send_to(&target, message))
            }
            None => registry.broadcast(&message),
        };

        tracing::debug!(
            business_id = %self.business_id,
            event = request.event.as_str(),
            sender_role = %request.sender_role,
            target_role = %request.target_role,
            notified,
            "Hub notify delivered"
        );
        self.schedule_if_idle(Utc::now());
        Ok(notified)
    }

    fn schedule_if_idle(&mut self, now: DateTime<Utc>) {
        if self.is_empty() && self.cleanup_deadline.is_none() {
            self.cleanup_deadline = Some(now + self.idle_cleanup);
        }
    }

    /// Returns true when the hub has been idle past its deadline and should stop.
    pub fn on_cleanup_tick(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_empty() {
            return false;
        }
        match self.cleanup_deadline {
            None => {
                self.schedule_if_idle(now);
                false
            }
            Some(deadline) if now < deadline => false,
            Some(_) => {
                self.admins.clear();
                self.clients.clear();
                self.cleanup_deadline = None;
                tracing::info!(business_id = %self.business_id, "Notification hub cleaned up");
                true
            }
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HubCommand>) {
        tracing::debug!(business_id = %self.business_id, "Notification hub started");
        while let Some(command) = rx.recv().await {
            match command {
                HubCommand::Join {
                    participant,
                    connection,
                    ack,
                } => {
                    self.join(participant, connection);
                    let _ = ack.send(());
                }
                HubCommand::Leave {
                    participant,
                    connection_id,
                } => self.leave(&participant, connection_id, Utc::now()),
                HubCommand::Notify { request, reply } => {
                    let _ = reply.send(self.notify(request));
                }
                HubCommand::Tick { now } => {
                    if self.on_cleanup_tick(now) {
                        break;
                    }
                }
            }
        }
        tracing::debug!(business_id = %self.business_id, "Notification hub stopped");
    }
}

pub struct HubSpawner {
    idle_cleanup: chrono::Duration,
}

impl HubSpawner {
    pub fn new(idle_cleanup: chrono::Duration) -> Self {
        Self { idle_cleanup }
    }
}

impl Spawn for HubSpawner {
    type Handle = HubHandle;

    fn spawn(&self, key: &str) -> HubHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(NotificationHub::new(key, self.idle_cleanup).run(rx));
        HubHandle {
            business_id: key.to_string(),
            tx,
        }
    }
}

/// Notify the live hub of `request.business_id`. A business without a live
/// hub has nobody to reach, which is a count of zero rather than an error.
pub async fn notify_business(
    hubs: &NotificationHubs,
    request: NotifyRequest,
    timeout: Duration,
) -> Result<usize, NotifyError> {
    if request.business_id.is_empty() {
        return Err(NotifyError::MissingBusinessId);
    }
    match hubs.get(&request.business_id) {
        Some(hub) => hub.notify(request, timeout).await,
        None => Ok(0),
    }
}

/// Fire-and-forget notify: failures are logged and never reach the caller.
pub fn spawn_notify(hubs: Arc<NotificationHubs>, request: NotifyRequest, timeout: Duration) {
    tokio::spawn(async move {
        let business_id = request.business_id.clone();
        let event = request.event;
        match notify_business(&hubs, request, timeout).await {
            Ok(notified) => tracing::debug!(
                business_id = %business_id,
                event = event.as_str(),
                notified,
                "Notify completed"
            ),
            Err(e) => tracing::warn!(
                business_id = %business_id,
                event = event.as_str(),
                error = %e,
                "Notify failed"
            ),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;

    fn connection() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    fn frame(rx: &mut mpsc::UnboundedReceiver<Message>) -> serde_json::Value {
        match rx.try_recv() {
            Ok(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn request(target_user_id: Option<&str>, target_role: Role) -> NotifyRequest {
        NotifyRequest {
            business_id: "b1".into(),
            event: NotificationKind::NewMessage,
            sender_role: target_role.counterpart(),
            target_user_id: target_user_id.map(str::to_string),
            target_role,
            payload: json!({"conversationId": "c1"}),
        }
    }

    #[test]
    fn join_sends_connected_frame() {
        let mut hub = NotificationHub::new("b1", chrono::Duration::minutes(5));
        let (conn, mut rx) = connection();
        hub.join(ParticipantId::new(Role::Admin, "a1"), conn);

        let connected = frame(&mut rx);
        assert_eq!(connected["type"], "CONNECTED");
        assert_eq!(connected["payload"]["userId"], "a1");
        assert_eq!(connected["payload"]["message"], "Connected to notification server");
    }

    #[test]
    fn notify_targets_role_set_or_single_user() {
        let mut hub = NotificationHub::new("b1", chrono::Duration::minutes(5));
        let (a1, mut a1_rx) = connection();
        let (a2, mut a2_rx) = connection();
        let (c1, mut c1_rx) = connection();
        hub.join(ParticipantId::new(Role::Admin, "a1"), a1);
        hub.join(ParticipantId::new(Role::Admin, "a2"), a2);
        hub.join(ParticipantId::new(Role::Client, "c1"), c1);
        for rx in [&mut a1_rx, &mut a2_rx, &mut c1_rx] {
            frame(rx);
        }

        assert_eq!(hub.notify(request(None, Role::Admin)).unwrap(), 2);
        let pushed = frame(&mut a1_rx);
        assert_eq!(pushed["type"], "NEW_MESSAGE");
        assert_eq!(pushed["payload"]["conversationId"], "c1");
        frame(&mut a2_rx);
        assert!(c1_rx.try_recv().is_err());

        assert_eq!(hub.notify(request(Some("c1"), Role::Client)).unwrap(), 1);
        assert_eq!(hub.notify(request(Some("ghost"), Role::Client)).unwrap(), 0);
    }

    #[test]
    fn notify_validates_business() {
        let mut hub = NotificationHub::new("b1", chrono::Duration::minutes(5));
        let mut missing = request(None, Role::Admin);
        missing.business_id.clear();
        assert!(matches!(hub.notify(missing), Err(NotifyError::MissingBusinessId)));

        let mut other = request(None, Role::Admin);
        other.business_id = "b2".into();
        assert!(matches!(hub.notify(other), Err(NotifyError::BusinessMismatch { .. })));
    }

    #[test]
    fn idle_hub_stops_only_after_deadline() {
        let mut hub = NotificationHub::new("b1", chrono::Duration::minutes(5));
        let (conn, _rx) = connection();
        let admin = ParticipantId::new(Role::Admin, "a1");
        let conn_id = conn.id;
        hub.join(admin.clone(), conn);

        let t0 = Utc::now();
        hub.leave(&admin, conn_id, t0);
        assert_eq!(hub.cleanup_deadline(), Some(t0 + chrono::Duration::minutes(5)));

        assert!(!hub.on_cleanup_tick(t0 + chrono::Duration::minutes(1)));
        assert!(hub.on_cleanup_tick(t0 + chrono::Duration::minutes(6)));
    }

    #[test]
    fn rejoin_cancels_pending_cleanup() {
        let mut hub = NotificationHub::new("b1", chrono::Duration::minutes(5));
        let client = ParticipantId::new(Role::Client, "c1");
        let (first, _rx1) = connection();
        let first_id = first.id;
        hub.join(client.clone(), first);

        let t0 = Utc::now();
        hub.leave(&client, first_id, t0);
        let (second, _rx2) = connection();
        hub.join(client, second);

        assert_eq!(hub.cleanup_deadline(), None);
        assert!(!hub.on_cleanup_tick(t0 + chrono::Duration::minutes(6)));
    }

    #[tokio::test]
    async fn notify_business_without_live_hub_is_zero() {
        let hubs = NotificationHubs::new(HubSpawner::new(chrono::Duration::minutes(5)));
        let notified = notify_business(&hubs, request(None, Role::Admin), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(notified, 0);
        assert!(hubs.is_empty());
    }

    #[tokio::test]
    async fn notify_through_live_hub_handle() {
        let hubs = NotificationHubs::new(HubSpawner::new(chrono::Duration::minutes(5)));
        let hub = hubs.resolve("b1");
        let (conn, mut rx) = connection();
        assert!(hub.join(&ParticipantId::new(Role::Admin, "a1"), &conn).await);

        let notified = notify_business(&hubs, request(None, Role::Admin), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(notified, 1);
        assert_eq!(frame(&mut rx)["type"], "CONNECTED");
        assert_eq!(frame(&mut rx)["type"], "NEW_MESSAGE");
    }
}
