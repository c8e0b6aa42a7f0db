use axum::{middleware, routing, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::middleware::JwtSecret;
use crate::chat::{conversations, notifications};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting: 120 requests per minute per IP on the REST API
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_millisecond(500) // 1 token every 500ms = 120 per minute
            .burst_size(30)
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    // Authenticated REST routes (JWT required, Claims extractor validates token)
    let api_routes = Router::new()
        .route(
            "/api/conversations",
            routing::post(conversations::create_conversation),
        )
        .route(
            "/api/conversations/{id}/messages",
            routing::get(conversations::get_messages),
        )
        .route(
            "/api/conversations/{id}/unread-count",
            routing::get(conversations::unread_count),
        )
        .route("/api/notifications", routing::get(notifications::list))
        .route("/api/notifications/read", routing::put(notifications::mark_read))
        .route("/api/notifications/{id}", routing::delete(notifications::delete))
        .layer(GovernorLayer {
            config: governor_config,
        });

    // WebSocket endpoints (auth via query param, not JWT header)
    let ws_routes = Router::new()
        .route("/ws/chat", routing::get(ws_handler::chat_upgrade))
        .route("/ws/notifications", routing::get(ws_handler::notifications_upgrade));

    // Health check
    let health = Router::new().route("/health", routing::get(health_check));

    Router::new()
        .merge(api_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
