use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::auth::jwt::{self, AuthError};
use crate::auth::Identity;
use crate::chat::conversations::can_access;
use crate::chat::store::StoreError;
use crate::state::AppState;
use crate::ws::connection::run_connection;
use crate::ws::ParticipantId;

/// Query parameters for the chat room socket: `?conversationId=&token=`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatQuery {
    pub conversation_id: Option<String>,
    pub token: Option<String>,
}

/// Query parameters for the notification socket: `?businessId=&token=`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationQuery {
    pub business_id: Option<String>,
    pub token: Option<String>,
}

/// WebSocket close codes:
/// 1008 = missing parameter
/// 1011 = server error while authorizing
/// 4001 = token expired
/// 4002 = token invalid
/// 4003 = token does not grant access to the requested key
/// 4004 = conversation not found
const CLOSE_MISSING_PARAMETER: u16 = 1008;
const CLOSE_SERVER_ERROR: u16 = 1011;
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;
const CLOSE_FORBIDDEN: u16 = 4003;
const CLOSE_NOT_FOUND: u16 = 4004;

/// Connection-establishment failures. Each closes the socket with a fixed code.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("missing {0}")]
    MissingParameter(&'static str),
    #[error("token expired")]
    TokenExpired,
    #[error("token invalid")]
    TokenInvalid,
    #[error("access denied")]
    Forbidden,
    #[error("conversation not found")]
    ConversationNotFound,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<AuthError> for ConnectError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Expired => ConnectError::TokenExpired,
            AuthError::Invalid(_) => ConnectError::TokenInvalid,
        }
    }
}

impl ConnectError {
    pub fn close_code(&self) -> u16 {
        match self {
            Self::MissingParameter(_) => CLOSE_MISSING_PARAMETER,
            Self::TokenExpired => CLOSE_TOKEN_EXPIRED,
            Self::TokenInvalid => CLOSE_TOKEN_INVALID,
            Self::Forbidden => CLOSE_FORBIDDEN,
            Self::ConversationNotFound => CLOSE_NOT_FOUND,
            Self::Store(_) => CLOSE_SERVER_ERROR,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::MissingParameter("conversationId") => "Missing conversationId",
            Self::MissingParameter("businessId") => "Missing businessId",
            Self::MissingParameter(_) => "Missing token",
            Self::TokenExpired => "Token expired",
            Self::TokenInvalid => "Token invalid",
            Self::Forbidden => "Forbidden",
            Self::ConversationNotFound => "Conversation not found",
            Self::Store(_) => "Internal server error",
        }
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ConnectError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(ConnectError::MissingParameter(name))
}

/// GET /ws/chat?conversationId=&token=
/// Chat room upgrade. Authenticates via query parameter; on failure upgrades
/// then immediately closes with the matching close code.
pub async fn chat_upgrade(
    State(state): State<AppState>,
    Query(params): Query<ChatQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return upgrade_required(rejection),
    };

    match authorize_chat(&state, &params).await {
        Ok((participant, conversation_id)) => {
            tracing::info!(
                participant = %participant,
                conversation_id = %conversation_id,
                "Chat connection authenticated"
            );
            let rooms = state.rooms.clone();
            ws.on_failed_upgrade(log_failed_upgrade)
                .on_upgrade(move |socket| async move {
                    run_connection(socket, participant, move || rooms.resolve(&conversation_id)).await;
                })
        }
        Err(err) => reject(ws, err),
    }
}

async fn authorize_chat(
    state: &AppState,
    params: &ChatQuery,
) -> Result<(ParticipantId, String), ConnectError> {
    let conversation_id = required(&params.conversation_id, "conversationId")?;
    let token = required(&params.token, "token")?;
    let identity = jwt::authenticate(&state.jwt_secret, token)?;

    let conversation = state
        .store
        .find_conversation(conversation_id)
        .await?
        .ok_or(ConnectError::ConversationNotFound)?;
    if !can_access(&identity, &conversation) {
        return Err(ConnectError::Forbidden);
    }

    Ok((ParticipantId::new(identity.role, identity.user_id), conversation.id))
}

/// GET /ws/notifications?businessId=&token=
/// Notification hub upgrade. The token must belong to the requested business.
pub async fn notifications_upgrade(
    State(state): State<AppState>,
    Query(params): Query<NotificationQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return upgrade_required(rejection),
    };

    match authorize_hub(&state, &params) {
        Ok((participant, business_id)) => {
            tracing::info!(
                participant = %participant,
                business_id = %business_id,
                "Notification connection authenticated"
            );
            let hubs = state.hubs.clone();
            ws.on_failed_upgrade(log_failed_upgrade)
                .on_upgrade(move |socket| async move {
                    run_connection(socket, participant, move || hubs.resolve(&business_id)).await;
                })
        }
        Err(err) => reject(ws, err),
    }
}

fn authorize_hub(
    state: &AppState,
    params: &NotificationQuery,
) -> Result<(ParticipantId, String), ConnectError> {
    let business_id = required(&params.business_id, "businessId")?;
    let token = required(&params.token, "token")?;
    let Identity {
        user_id,
        role,
        business_id: token_business,
        ..
    } = jwt::authenticate(&state.jwt_secret, token)?;

    if token_business.as_deref() != Some(business_id) {
        return Err(ConnectError::Forbidden);
    }
    Ok((ParticipantId::new(role, user_id), business_id.to_string()))
}

fn upgrade_required(rejection: WebSocketUpgradeRejection) -> Response {
    tracing::debug!(error = %rejection, "Rejected non-upgrade request on WebSocket endpoint");
    (StatusCode::UPGRADE_REQUIRED, "Expected Upgrade: websocket").into_response()
}

fn log_failed_upgrade(error: axum::Error) {
    tracing::warn!(error = %error, "WebSocket accept failed");
}

/// Upgrade the connection, then immediately close with the error's code.
fn reject(ws: WebSocketUpgrade, err: ConnectError) -> Response {
    let code = err.close_code();
    let reason = err.reason();
    match &err {
        ConnectError::Store(_) => tracing::error!(close_code = code, error = %err, "WebSocket connect failed"),
        _ => tracing::warn!(close_code = code, error = %err, "WebSocket connect rejected"),
    }

    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}
