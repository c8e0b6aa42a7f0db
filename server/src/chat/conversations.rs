//! REST endpoints for opening conversations and reading their history.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::auth::Identity;
use crate::chat::store_failure;
use crate::db::models::{ChatMessage, Conversation, Role};
use crate::state::AppState;
use crate::ws::ParticipantId;

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub business_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    pub messages: Vec<ChatMessage>,
    pub page: u32,
    pub limit: u32,
    pub total_count: u64,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub conversation_id: String,
    pub unread_count: u64,
}

/// Whether `identity` may read or write `conversation`: clients only their
/// own conversations, admins every conversation of their business.
pub fn can_access(identity: &Identity, conversation: &Conversation) -> bool {
    match identity.role {
        Role::Client => conversation.user_id.as_deref() == Some(identity.user_id.as_str()),
        Role::Admin => identity.business_id.as_deref() == Some(conversation.business_id.as_str()),
    }
}

/// Resolve `page`/`limit` query values: page starts at 1, limit is clamped
/// to `1..=max_limit`.
pub(crate) fn page_bounds(query: &PageQuery, default_limit: u32, max_limit: u32) -> (u32, u32) {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(default_limit).clamp(1, max_limit.max(1));
    (page, limit)
}

async fn accessible_conversation(
    state: &AppState,
    identity: &Identity,
    conversation_id: &str,
) -> Result<Conversation, StatusCode> {
    let conversation = state
        .store
        .find_conversation(conversation_id)
        .await
        .map_err(store_failure)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if !can_access(identity, &conversation) {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(conversation)
}

// --- Handlers ---

/// POST /api/conversations
/// Open (or reopen) the caller's conversation with a business. Clients only.
pub async fn create_conversation(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), StatusCode> {
    if claims.role != Role::Client {
        return Err(StatusCode::FORBIDDEN);
    }
    let business_id = body.business_id.trim();
    if business_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let conversation = state
        .store
        .find_or_create_conversation(business_id, &claims.sub)
        .await
        .map_err(store_failure)?;

    tracing::info!(
        conversation_id = %conversation.id,
        business_id = %conversation.business_id,
        user_id = %claims.sub,
        "Conversation opened"
    );
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// GET /api/conversations/{id}/messages?page=&limit=
/// One page of history, oldest first within the page.
pub async fn get_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<MessagesResponse>, StatusCode> {
    let identity = Identity::from(claims);
    accessible_conversation(&state, &identity, &conversation_id).await?;

    let limits = state.settings.dispatch_limits();
    let (page, limit) = page_bounds(&query, limits.default_page_limit, limits.max_page_limit);
    let history = state
        .store
        .fetch_message_page(&conversation_id, page, limit)
        .await
        .map_err(store_failure)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let has_more = u64::from(page) * u64::from(limit) < history.total_count;
    Ok(Json(MessagesResponse {
        messages: history.messages,
        page,
        limit,
        total_count: history.total_count,
        has_more,
    }))
}

/// GET /api/conversations/{id}/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<String>,
) -> Result<Json<UnreadCountResponse>, StatusCode> {
    let identity = Identity::from(claims);
    accessible_conversation(&state, &identity, &conversation_id).await?;

    let reader = ParticipantId::new(identity.role, identity.user_id.clone());
    let unread_count = state
        .store
        .unread_count(&conversation_id, &reader)
        .await
        .map_err(store_failure)?;
    Ok(Json(UnreadCountResponse {
        conversation_id,
        unread_count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn conversation(business_id: &str, user_id: &str) -> Conversation {
        Conversation {
            id: "conv1".into(),
            business_id: business_id.into(),
            user_id: Some(user_id.into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn identity(role: Role, user_id: &str, business_id: Option<&str>) -> Identity {
        Identity {
            user_id: user_id.into(),
            role,
            business_id: business_id.map(str::to_string),
            name: None,
        }
    }

    #[test]
    fn clients_reach_only_their_own_conversations() {
        let conv = conversation("b1", "c1");
        assert!(can_access(&identity(Role::Client, "c1", None), &conv));
        assert!(!can_access(&identity(Role::Client, "c2", Some("b1")), &conv));
    }

    #[test]
    fn admins_reach_conversations_of_their_business() {
        let conv = conversation("b1", "c1");
        assert!(can_access(&identity(Role::Admin, "a1", Some("b1")), &conv));
        assert!(!can_access(&identity(Role::Admin, "a2", Some("b2")), &conv));
        assert!(!can_access(&identity(Role::Admin, "a3", None), &conv));
    }

    #[test]
    fn page_bounds_clamp_limit_and_floor_page() {
        let query = PageQuery {
            page: Some(0),
            limit: Some(1000),
        };
        assert_eq!(page_bounds(&query, 10, 100), (1, 100));

        let defaults = PageQuery {
            page: None,
            limit: None,
        };
        assert_eq!(page_bounds(&defaults, 10, 100), (1, 10));
    }
}
