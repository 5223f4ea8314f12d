use axum::{
    extract::{Path, State},
    middleware, Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::middleware::IdentityExtension;
use crate::auth::Principal;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the identity resolver into request extensions so the Principal extractor can find it.
async fn inject_identity(
    State(state): State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(IdentityExtension(state.coordinator.identity().clone()));
    next.run(req).await
}

/// GET /api/rooms/{room_id}/members: live members of a room on this instance.
async fn room_members(
    _principal: Principal,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Json<serde_json::Value> {
    let members = state.coordinator.list_room_members(&room_id);
    Json(json!({
        "roomId": room_id,
        "count": members.len(),
        "members": members,
    }))
}

/// GET /api/online: users in any room, grouped by user.
async fn online_users(_principal: Principal, State(state): State<AppState>) -> Json<serde_json::Value> {
    let users = state.coordinator.list_all_online_users();
    Json(json!({
        "count": users.len(),
        "users": users,
    }))
}

/// GET /api/online/count: number of distinct users in a room.
async fn online_count(_principal: Principal, State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "count": state.coordinator.get_online_count() }))
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting on WebSocket upgrades: burst of 30, one token per second per IP.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(1)
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

    // WebSocket endpoint (credential via query param or Bearer header)
    let ws_routes = Router::new()
        .route("/ws", axum::routing::get(ws_handler::ws_upgrade))
        .layer(GovernorLayer {
            config: governor_config,
        });

    // Read-only presence queries (Bearer auth via the Principal extractor)
    let query_routes = Router::new()
        .route(
            "/api/rooms/{room_id}/members",
            axum::routing::get(room_members),
        )
        .route("/api/online", axum::routing::get(online_users))
        .route("/api/online/count", axum::routing::get(online_count));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(query_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_identity,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
