use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use crate::auth::middleware::bearer_token;
use crate::error::AuthError;
use crate::state::AppState;
use crate::ws::actor;
use crate::ws::protocol::ServerEvent;

/// Query parameters for WebSocket connection.
/// The credential comes from `?token=` or an `Authorization: Bearer` header.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Authenticates before any session exists.
/// On auth failure, upgrades then immediately reports and closes with 4001/4002.
/// On success, spawns an actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let credential = params
        .token
        .as_deref()
        .or_else(|| bearer_token(&headers));

    match state.coordinator.authenticate(credential).await {
        Ok(principal) => {
            tracing::info!(
                user_id = %principal.id,
                "WebSocket connection authenticated"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, principal))
        }
        Err(err) => {
            tracing::warn!(
                close_code = err.close_code(),
                reason = %err,
                "WebSocket auth failed"
            );
            ws.on_upgrade(move |socket| reject(socket, err))
        }
    }
}

/// Tell the client why, then close with the matching code.
async fn reject(mut socket: WebSocket, err: AuthError) {
    let event = ServerEvent::AuthError {
        message: err.to_string(),
    };
    if let Ok(json) = serde_json::to_string(&event) {
        let _ = socket.send(Message::Text(json.into())).await;
    }
    let close_frame = CloseFrame {
        code: err.close_code(),
        reason: err.to_string().into(),
    };
    let _ = socket.send(Message::Close(Some(close_frame))).await;
}
