//! REST endpoints for missed notifications.
//! A caller sees rows addressed to them plus role-wide rows of their business.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::conversations::{page_bounds, PageQuery};
use crate::chat::store::NotificationAudience;
use crate::chat::store_failure;
use crate::db::models::Notification;
use crate::state::AppState;

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub notifications: Vec<Notification>,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub updated: usize,
}

fn audience(claims: Claims) -> NotificationAudience {
    NotificationAudience {
        user_id: claims.sub,
        business_id: claims.business_id,
        role: claims.role,
    }
}

/// GET /api/notifications?page=&limit=
/// Newest first.
pub async fn list(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<PageQuery>,
) -> Result<Json<NotificationsResponse>, StatusCode> {
    let (page, limit) = page_bounds(&query, DEFAULT_LIMIT, MAX_LIMIT);
    let notifications = state
        .store
        .list_notifications(&audience(claims), page, limit)
        .await
        .map_err(store_failure)?;
    Ok(Json(NotificationsResponse {
        notifications,
        page,
        limit,
    }))
}

/// PUT /api/notifications/read
/// Ids outside the caller's audience are skipped.
pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, StatusCode> {
    if body.ids.is_empty() {
        return Ok(Json(MarkReadResponse { updated: 0 }));
    }
    let updated = state
        .store
        .mark_notifications_read(&audience(claims), &body.ids)
        .await
        .map_err(store_failure)?;
    Ok(Json(MarkReadResponse { updated }))
}

/// DELETE /api/notifications/{id}
pub async fn delete(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let deleted = state
        .store
        .delete_notification(&audience(claims), &id)
        .await
        .map_err(store_failure)?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
