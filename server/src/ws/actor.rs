use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::auth::Principal;
use crate::error::close_code;
use crate::session::{Outbound, SessionFlow};
use crate::state::AppState;
use crate::ws::protocol;

/// Ping interval: server sends WebSocket ping every 30 seconds.
/// Prevents connection leaks from abrupt disconnects.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the writer may take to flush queued events after the reader stops.
const WRITER_DRAIN: Duration = Duration::from_secs(5);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, serializes events from the session channel
/// - Reader task: decodes client frames and hands them to the coordinator
///
/// Other sessions reach this client through clones of the session sender held
/// by the presence and connection registries.
pub async fn run_connection(socket: WebSocket, state: AppState, principal: Principal) {
    let coordinator = state.coordinator.clone();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
    // Ping/pong frames bypass the event channel
    let (ctl_tx, ctl_rx) = mpsc::unbounded_channel::<Message>();

    let mut session = coordinator.on_connect(principal, tx.clone());
    let user_id = session.user_id().to_string();
    let session_id = session.id.clone();

    tracing::info!(
        user_id = %user_id,
        session_id = %session_id,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards channel messages to WebSocket sink
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx, ctl_rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_ctl = ctl_tx.clone();
    let ping_close = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_ctl.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_close.send(Outbound::Close {
                        code: close_code::KEEPALIVE_TIMEOUT,
                        reason: "Pong timeout".to_string(),
                    });
                    break;
                }
            }
        }
    });
    drop(tx);

    // Reader loop: process incoming WebSocket messages until the client goes
    // away, the writer stops, or the coordinator asks to close
    let mut writer_done = false;
    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = &mut writer_handle => {
                writer_done = true;
                break;
            }
        };

        match frame {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    let flow =
                        protocol::handle_text_message(text.as_str(), &coordinator, &mut session).await;
                    if flow == SessionFlow::Close {
                        break;
                    }
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        user_id = %user_id,
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = ctl_tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();
    drop(ctl_tx);

    // Cleanup runs in its own task so it completes even if this one is cancelled
    let cleanup = tokio::spawn(async move { coordinator.on_disconnect(session).await });
    if let Err(e) = cleanup.await {
        tracing::error!(user_id = %user_id, error = %e, "Disconnect cleanup failed");
    }

    // Every sender is gone now; let the writer flush what is queued
    if !writer_done && timeout(WRITER_DRAIN, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    tracing::info!(
        user_id = %user_id,
        session_id = %session_id,
        "WebSocket actor stopped"
    );
}

/// Writer task: serializes events and forwards frames to the WebSocket sink.
/// Stops after sending a close frame.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut ctl_rx: mpsc::UnboundedReceiver<Message>,
) {
    loop {
        let msg = tokio::select! {
            biased;
            Some(ctl) = ctl_rx.recv() => ctl,
            out = rx.recv() => match out {
                Some(Outbound::Event(event)) => match serde_json::to_string(&event) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to serialize server event");
                        continue;
                    }
                },
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = ws_sender.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => break,
            },
        };

        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed, connection is broken
            break;
        }
    }
}
