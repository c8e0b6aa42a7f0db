//! Per-conversation chat room actor.
//!
//! The room owns the registry of connected participants, runs every inbound
//! frame through the dispatcher, performs the side effects through the store
//! and fans results out. The bound conversation id and the idle-cleanup
//! deadline are persisted in `room_state` so a restarted process can finish
//! a cleanup that was pending.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::chat::names::DisplayNameCache;
use crate::chat::store::{ChatStore, StoreError};
use crate::db::models::{
    ChatMessage, Conversation, NewMessage, NewNotification, NotificationKind, Role, RoomState,
};
use crate::rooms::directory::{ActorHandle, Spawn};
use crate::rooms::notification_hub::{spawn_notify, NotifyRequest};
use crate::rooms::rate_limit::SendRateLimiter;
use crate::rooms::{NotificationHubs, RoomSettings};
use crate::ws::connection::ConnectionOwner;
use crate::ws::protocol::{
    ClientEvent, MessageDispatcher, ProtocolError, ServerFrame, ERR_CONVERSATION_NOT_FOUND,
    ERR_INTERNAL, ERR_LOAD_HISTORY, ERR_MARK_READ,
};
use crate::ws::registry::{ConnectionHandle, ConnectionRegistry};
use crate::ws::ParticipantId;

const NOTIFICATION_TITLE: &str = "New message";
const ATTACHMENT_PREVIEW: &str = "Sent an attachment";
const PREVIEW_CHARS: usize = 100;

/// Collaborators shared by every chat room.
pub struct RoomContext {
    pub store: Arc<dyn ChatStore>,
    pub names: Arc<DisplayNameCache>,
    pub hubs: Arc<NotificationHubs>,
    pub settings: RoomSettings,
    pub dispatcher: MessageDispatcher,
}

impl RoomContext {
    pub fn new(
        store: Arc<dyn ChatStore>,
        names: Arc<DisplayNameCache>,
        hubs: Arc<NotificationHubs>,
        settings: RoomSettings,
    ) -> Self {
        let dispatcher = MessageDispatcher::new(settings.dispatch_limits());
        Self {
            store,
            names,
            hubs,
            settings,
            dispatcher,
        }
    }
}

pub enum RoomCommand {
    Join {
        participant: ParticipantId,
        conversation_id: String,
        connection: ConnectionHandle,
        ack: oneshot::Sender<()>,
    },
    Frame {
        participant: ParticipantId,
        text: String,
    },
    Leave {
        participant: ParticipantId,
        connection_id: Uuid,
    },
    Tick {
        now: DateTime<Utc>,
    },
}

#[derive(Clone)]
pub struct ChatRoomHandle {
    key: String,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl ChatRoomHandle {
    pub fn tick(&self, now: DateTime<Utc>) -> bool {
        self.tx.send(RoomCommand::Tick { now }).is_ok()
    }
}

impl ActorHandle for ChatRoomHandle {
    fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    fn same_actor(&self, other: &Self) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

impl ConnectionOwner for ChatRoomHandle {
    async fn join(&self, participant: &ParticipantId, connection: &ConnectionHandle) -> bool {
        let (ack, accepted) = oneshot::channel();
        let sent = self.tx.send(RoomCommand::Join {
            participant: participant.clone(),
            conversation_id: self.key.to_string(),
            connection: connection.clone(),
            ack,
        });
        sent.is_ok() && accepted.await.is_ok()
    }

    fn deliver(&self, participant: &ParticipantId, text: String) {
        let _ = self.tx.send(RoomCommand::Frame {
            participant: participant.clone(),
            text,
        });
    }

    fn leave(&self, participant: &ParticipantId, connection_id: Uuid) {
        let _ = self.tx.send(RoomCommand::Leave {
            participant: participant.clone(),
            connection_id,
        });
    }
}

/// Failure of a single inbound event; reported to the requester only.
#[derive(Debug, thiserror::Error)]
enum EventError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("conversation not found")]
    ConversationNotFound,
    #[error("{wire}: {source}")]
    Store {
        wire: &'static str,
        #[source]
        source: StoreError,
    },
}

impl EventError {
    fn store(wire: &'static str) -> impl FnOnce(StoreError) -> EventError {
        move |source| match source {
            StoreError::NotFound("conversation") => EventError::ConversationNotFound,
            source => EventError::Store { wire, source },
        }
    }

    fn wire_message(&self) -> String {
        match self {
            Self::Protocol(e) => e.to_string(),
            Self::ConversationNotFound => ERR_CONVERSATION_NOT_FOUND.to_string(),
            Self::Store { wire, .. } => wire.to_string(),
        }
    }
}

pub struct ChatRoom {
    key: String,
    ctx: Arc<RoomContext>,
    registry: ConnectionRegistry,
    state: RoomState,
    conversation: Option<Conversation>,
    send_limiter: SendRateLimiter,
}

impl ChatRoom {
    pub fn new(key: impl Into<String>, ctx: Arc<RoomContext>) -> Self {
        let send_limiter = SendRateLimiter::new(
            ctx.settings.max_messages_per_window,
            ctx.settings.rate_window,
        );
        Self {
            key: key.into(),
            ctx,
            registry: ConnectionRegistry::new(),
            state: RoomState::default(),
            conversation: None,
            send_limiter,
        }
    }

    pub fn state(&self) -> &RoomState {
        &self.state
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Restore durable state written by a previous instance.
    pub async fn load(&mut self) {
        match self.ctx.store.load_room_state(&self.key).await {
            Ok(state) => self.state = state,
            Err(e) => {
                tracing::error!(conversation_id = %self.key, error = %e, "Failed to load room state");
            }
        }
    }

    async fn persist_state(&self) {
        if let Err(e) = self.ctx.store.save_room_state(&self.key, &self.state).await {
            tracing::error!(conversation_id = %self.key, error = %e, "Failed to persist room state");
        }
    }

    fn bound_conversation(&self) -> &str {
        self.state.conversation_id.as_deref().unwrap_or(&self.key)
    }

    fn reply(&mut self, participant: &ParticipantId, frame: &ServerFrame) {
        self.registry.send_to(participant, frame.to_message());
    }

    /// Register a connection, bind the conversation on first use, cancel any
    /// pending cleanup and send the backlog.
    pub async fn handle_join(
        &mut self,
        participant: ParticipantId,
        conversation_id: String,
        connection: ConnectionHandle,
    ) {
        self.registry.add(participant.clone(), connection);

        let mut dirty = false;
        if self.state.conversation_id.is_none() {
            self.state.conversation_id = Some(conversation_id);
            dirty = true;
        }
        if self.state.cleanup_deadline.take().is_some() {
            dirty = true;
        }
        if dirty {
            self.persist_state().await;
        }

        tracing::info!(
            conversation_id = %self.bound_conversation(),
            participant = %participant,
            participants = self.registry.len(),
            "Participant joined chat room"
        );

        self.send_backlog(&participant).await;
    }

    async fn send_backlog(&mut self, participant: &ParticipantId) {
        let conversation_id = self.bound_conversation().to_string();
        let limit = self.ctx.settings.backlog_limit;
        let frame = match self.ctx.store.fetch_message_page(&conversation_id, 1, limit).await {
            Ok(Some(page)) => {
                let unread_count = match self
                    .ctx
                    .store
                    .unread_count(&conversation_id, participant)
                    .await
                {
                    Ok(count) => count,
                    Err(e) => {
                        tracing::warn!(
                            conversation_id = %conversation_id,
                            participant = %participant,
                            error = %e,
                            "Failed to count unread messages"
                        );
                        0
                    }
                };
                ServerFrame::History {
                    has_more: u64::from(limit) < page.total_count,
                    messages: page.messages,
                    page: 1,
                    limit,
                    total_count: page.total_count,
                    unread_count: Some(unread_count),
                }
            }
            Ok(None) => ServerFrame::error(ERR_CONVERSATION_NOT_FOUND),
            Err(e) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    participant = %participant,
                    error = %e,
                    "Failed to load backlog"
                );
                ServerFrame::error(ERR_LOAD_HISTORY)
            }
        };
        self.reply(participant, &frame);
    }

    /// Decode and apply one inbound frame. Failures go back to the sender only
    /// and never close the socket.
    pub async fn handle_frame(&mut self, participant: ParticipantId, text: &str) {
        let outcome = match self.ctx.dispatcher.decode(text, Some(self.bound_conversation())) {
            Ok(event) => self.apply(&participant, event).await,
            Err(e) => Err(EventError::Protocol(e)),
        };

        if let Err(e) = outcome {
            match &e {
                EventError::Store { .. } => tracing::error!(
                    conversation_id = %self.bound_conversation(),
                    participant = %participant,
                    error = %e,
                    "Chat event failed"
                ),
                _ => tracing::debug!(
                    conversation_id = %self.bound_conversation(),
                    participant = %participant,
                    error = %e,
                    "Rejected chat event"
                ),
            }
            self.reply(&participant, &ServerFrame::error(e.wire_message()));
        }
    }

    async fn apply(&mut self, participant: &ParticipantId, event: ClientEvent) -> Result<(), EventError> {
        match event {
            ClientEvent::SendMessage {
                conversation_id,
                content,
                media_ids,
            } => {
                self.send_message(participant, conversation_id, content, media_ids)
                    .await
            }
            ClientEvent::Typing => {
                self.typing(participant).await;
                Ok(())
            }
            ClientEvent::RequestHistory { page, limit } => {
                self.request_history(participant, page, limit).await
            }
            ClientEvent::MarkAsRead { conversation_id } => {
                self.mark_as_read(participant, conversation_id).await
            }
        }
    }

    async fn send_message(
        &mut self,
        participant: &ParticipantId,
        conversation_id: String,
        content: String,
        media_ids: Vec<String>,
    ) -> Result<(), EventError> {
        if !self.send_limiter.try_acquire(participant, Instant::now()) {
            return Err(ProtocolError::RateLimited.into());
        }

        let message = self
            .ctx
            .store
            .persist_message(NewMessage {
                conversation_id: conversation_id.clone(),
                sender_role: participant.role,
                sender_id: participant.user_id.clone(),
                content,
                media_ids,
            })
            .await
            .map_err(EventError::store(ERR_INTERNAL))?;

        if let Err(e) = self.ctx.store.touch_conversation(&conversation_id).await {
            tracing::warn!(conversation_id = %conversation_id, error = %e, "Failed to touch conversation");
        }

        let delivered = self.registry.broadcast(
            &ServerFrame::NewMessage {
                message: message.clone(),
            }
            .to_message(),
        );
        tracing::debug!(
            conversation_id = %conversation_id,
            participant = %participant,
            delivered,
            "Message broadcast"
        );

        if participant.role == Role::Client && !self.registry.contains_role(Role::Admin) {
            self.notify_offline_admins(&message).await;
        }
        Ok(())
    }

    /// No admin is in the room: persist a role-wide notification and ask the
    /// business hub to push it to connected admins.
    async fn notify_offline_admins(&mut self, message: &ChatMessage) {
        let Some(conversation) = self.conversation(&message.conversation_id).await else {
            return;
        };
        let business_id = conversation.business_id.clone();

        let preview = if message.content.is_empty() {
            ATTACHMENT_PREVIEW.to_string()
        } else {
            message.content.chars().take(PREVIEW_CHARS).collect()
        };
        let record = self
            .ctx
            .store
            .create_notification_record(NewNotification {
                user_id: None,
                business_id: business_id.clone(),
                target_role: Role::Admin,
                title: NOTIFICATION_TITLE.to_string(),
                content: preview,
                kind: NotificationKind::NewMessage,
                conversation_id: Some(message.conversation_id.clone()),
            })
            .await;
        let notification_id = match record {
            Ok(record) => Some(record.id),
            Err(e) => {
                tracing::error!(
                    conversation_id = %message.conversation_id,
                    error = %e,
                    "Failed to persist notification"
                );
                None
            }
        };

        spawn_notify(
            self.ctx.hubs.clone(),
            NotifyRequest {
                business_id,
                event: NotificationKind::NewMessage,
                sender_role: Role::Client,
                target_user_id: None,
                target_role: Role::Admin,
                payload: json!({
                    "conversationId": message.conversation_id,
                    "notificationId": notification_id,
                    "message": message,
                }),
            },
            self.ctx.settings.notify_timeout,
        );
    }

    async fn typing(&mut self, participant: &ParticipantId) {
        let name = self.ctx.names.resolve(&participant.user_id).await;
        let frame = ServerFrame::Typing {
            name,
            user_id: participant.user_id.clone(),
            sender_type: participant.role,
            conversation_id: self.bound_conversation().to_string(),
        };
        self.registry.broadcast_except(&frame.to_message(), participant);
    }

    async fn request_history(
        &mut self,
        participant: &ParticipantId,
        page: u32,
        limit: u32,
    ) -> Result<(), EventError> {
        let conversation_id = self.bound_conversation().to_string();
        let found = self
            .ctx
            .store
            .fetch_message_page(&conversation_id, page, limit)
            .await
            .map_err(EventError::store(ERR_LOAD_HISTORY))?;
        let Some(history) = found else {
            return Err(EventError::ConversationNotFound);
        };

        let shown = u64::from(page) * u64::from(limit);
        let frame = ServerFrame::History {
            has_more: shown < history.total_count,
            messages: history.messages,
            page,
            limit,
            total_count: history.total_count,
            unread_count: None,
        };
        self.reply(participant, &frame);
        Ok(())
    }

    async fn mark_as_read(
        &mut self,
        participant: &ParticipantId,
        conversation_id: String,
    ) -> Result<(), EventError> {
        let receipt = self
            .ctx
            .store
            .upsert_read_receipt(&participant.user_id, &conversation_id)
            .await
            .map_err(EventError::store(ERR_MARK_READ))?;

        let read_by = self.ctx.names.resolve(&participant.user_id).await;
        let frame = ServerFrame::MessagesRead {
            read_by: read_by.clone(),
            user_id: participant.user_id.clone(),
            sender_type: participant.role,
            conversation_id: conversation_id.clone(),
            last_read_at: receipt.last_read_at,
        };
        self.registry.broadcast_except(&frame.to_message(), participant);

        let Some(conversation) = self.conversation(&conversation_id).await else {
            return Ok(());
        };
        let target_role = participant.role.counterpart();
        // An admin's read receipt concerns the one client who owns the conversation
        let target_user_id = match participant.role {
            Role::Admin => conversation.user_id.clone(),
            Role::Client => None,
        };
        spawn_notify(
            self.ctx.hubs.clone(),
            NotifyRequest {
                business_id: conversation.business_id.clone(),
                event: NotificationKind::MessagesRead,
                sender_role: participant.role,
                target_user_id,
                target_role,
                payload: json!({
                    "conversationId": conversation_id,
                    "readBy": read_by,
                    "userId": participant.user_id,
                    "lastReadAt": receipt.last_read_at,
                }),
            },
            self.ctx.settings.notify_timeout,
        );
        Ok(())
    }

    /// Conversation record, cached after the first successful lookup.
    async fn conversation(&mut self, conversation_id: &str) -> Option<Conversation> {
        if let Some(cached) = &self.conversation {
            if cached.id == conversation_id {
                return Some(cached.clone());
            }
        }
        match self.ctx.store.find_conversation(conversation_id).await {
            Ok(Some(conversation)) => {
                self.conversation = Some(conversation.clone());
                Some(conversation)
            }
            Ok(None) => {
                tracing::warn!(conversation_id = %conversation_id, "Conversation vanished");
                None
            }
            Err(e) => {
                tracing::error!(conversation_id = %conversation_id, error = %e, "Failed to load conversation");
                None
            }
        }
    }

    /// Deregister a connection. The last one out schedules the idle cleanup.
    pub async fn handle_leave(
        &mut self,
        participant: &ParticipantId,
        connection_id: Uuid,
        now: DateTime<Utc>,
    ) {
        if self.registry.remove_if_current(participant, connection_id) {
            self.send_limiter.forget(participant);
            tracing::info!(
                conversation_id = %self.bound_conversation(),
                participant = %participant,
                participants = self.registry.len(),
                "Participant left chat room"
            );
        }
        // The entry may already be gone if a failed send pruned it
        self.schedule_if_idle(now).await;
    }

    async fn schedule_if_idle(&mut self, now: DateTime<Utc>) {
        if self.registry.is_empty() && self.state.cleanup_deadline.is_none() {
            self.state.cleanup_deadline = Some(now + self.ctx.settings.idle_cleanup);
            self.persist_state().await;
        }
    }

    /// Re-check the idle deadline against `now`. Returns true when the room
    /// has cleared its durable state and the actor should stop.
    pub async fn on_cleanup_tick(&mut self, now: DateTime<Utc>) -> bool {
        if !self.registry.is_empty() {
            return false;
        }
        match self.state.cleanup_deadline {
            // Spawned without ever binding, e.g. a join that lost a race
            None if self.state == RoomState::default() => true,
            None => {
                self.schedule_if_idle(now).await;
                false
            }
            Some(deadline) if now < deadline => false,
            Some(_) => {
                if let Err(e) = self.ctx.store.clear_room_state(&self.key).await {
                    tracing::error!(conversation_id = %self.key, error = %e, "Failed to clear room state");
                    return false;
                }
                self.state = RoomState::default();
                self.conversation = None;
                tracing::info!(conversation_id = %self.key, "Chat room cleaned up");
                true
            }
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RoomCommand>) {
        self.load().await;
        tracing::debug!(conversation_id = %self.key, "Chat room started");

        while let Some(command) = rx.recv().await {
            match command {
                RoomCommand::Join {
                    participant,
                    conversation_id,
                    connection,
                    ack,
                } => {
                    // Ack first so the connection's pump is live before the backlog arrives
                    let _ = ack.send(());
                    self.handle_join(participant, conversation_id, connection).await;
                }
                RoomCommand::Frame { participant, text } => {
                    self.handle_frame(participant, &text).await;
                }
                RoomCommand::Leave {
                    participant,
                    connection_id,
                } => {
                    self.handle_leave(&participant, connection_id, Utc::now()).await;
                }
                RoomCommand::Tick { now } => {
                    if self.on_cleanup_tick(now).await {
                        break;
                    }
                }
            }
        }
        tracing::debug!(conversation_id = %self.key, "Chat room stopped");
    }
}

pub struct ChatRoomSpawner {
    ctx: Arc<RoomContext>,
}

impl ChatRoomSpawner {
    pub fn new(ctx: Arc<RoomContext>) -> Self {
        Self { ctx }
    }
}

impl Spawn for ChatRoomSpawner {
    type Handle = ChatRoomHandle;

    fn spawn(&self, key: &str) -> ChatRoomHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(ChatRoom::new(key, self.ctx.clone()).run(rx));
        ChatRoomHandle {
            key: key.to_string(),
            tx,
        }
    }
}
