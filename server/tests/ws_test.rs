//! Integration tests for the WebSocket endpoint and HTTP queries against a
//! server bound to a random port.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use huddle_server::auth::jwt::issue_local_token;
use huddle_server::config::Config;
use huddle_server::db::models::Room;
use huddle_server::state::AppState;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Helper: start the server on a random port and return (addr, jwt_secret).
async fn start_test_server() -> (SocketAddr, Vec<u8>) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = huddle_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = huddle_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = AppState::from_config(&Config::default(), db, jwt_secret.clone())
        .expect("Failed to build state");
    for (id, is_private) in [("lobby", false), ("vault", true)] {
        state
            .store
            .put_room(Room {
                id: id.to_string(),
                name: id.to_string(),
                is_private,
                creator_id: "owner".to_string(),
                admin_ids: vec![],
            })
            .await
            .expect("Failed to provision room");
    }

    let app = huddle_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    (addr, jwt_secret)
}

fn token_for(secret: &[u8], user_id: &str) -> String {
    issue_local_token(secret, user_id, &format!("{}@example.com", user_id), 300).unwrap()
}

async fn connect(addr: SocketAddr, token: &str) -> WsStream {
    let url = format!("ws://{}/ws?token={}", addr, token);
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("Failed to connect");
    ws
}

/// Next JSON event, skipping control frames. Panics on close or timeout.
async fn next_event(ws: &mut WsStream) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timed out waiting for event")
            .expect("Stream ended")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Unexpected frame: {:?}", other),
        }
    }
}

/// Read until the next event with the given name.
async fn expect_event(ws: &mut WsStream, name: &str) -> Value {
    loop {
        let event = next_event(ws).await;
        if event["event"] == name {
            return event;
        }
    }
}

/// Read until the server closes and return the close code.
async fn close_code(ws: &mut WsStream) -> u16 {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timed out waiting for close");
        match msg {
            Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
            Some(Ok(_)) => continue,
            other => panic!("Expected close frame, got {:?}", other),
        }
    }
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_health() {
    let (addr, _) = start_test_server().await;
    let body = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_missing_token_closes_4001() {
    let (addr, _) = start_test_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();

    let event = next_event(&mut ws).await;
    assert_eq!(event["event"], "auth_error");
    assert_eq!(close_code(&mut ws).await, 4001);
}

#[tokio::test]
async fn test_invalid_token_closes_4002() {
    let (addr, _) = start_test_server().await;
    let mut ws = connect(addr, "not-a-token").await;

    let event = next_event(&mut ws).await;
    assert_eq!(event["event"], "auth_error");
    // Which strategy failed is never disclosed
    assert_eq!(event["message"], "invalid credential");
    assert_eq!(close_code(&mut ws).await, 4002);
}

#[tokio::test]
async fn test_bearer_header_accepted() {
    let (addr, secret) = start_test_server().await;
    let mut request = format!("ws://{}/ws", addr).into_client_request().unwrap();
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", token_for(&secret, "u1")).parse().unwrap(),
    );
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    let event = next_event(&mut ws).await;
    assert_eq!(event["event"], "connected");
    assert_eq!(event["userId"], "u1");
}

#[tokio::test]
async fn test_join_and_chat() {
    let (addr, secret) = start_test_server().await;
    let mut alice = connect(addr, &token_for(&secret, "alice")).await;
    let mut bob = connect(addr, &token_for(&secret, "bob")).await;
    expect_event(&mut alice, "connected").await;
    expect_event(&mut bob, "connected").await;

    send_json(&mut alice, json!({"event": "join_room", "roomId": "lobby"})).await;
    let joined = expect_event(&mut alice, "join_success").await;
    assert_eq!(joined["roomId"], "lobby");
    let presence = expect_event(&mut alice, "presence").await;
    assert_eq!(presence["count"], 1);

    send_json(&mut bob, json!({"event": "join_room", "roomId": "lobby"})).await;
    expect_event(&mut bob, "join_success").await;
    let peer = expect_event(&mut alice, "peer_joined").await;
    assert_eq!(peer["member"]["userId"], "bob");
    let presence = expect_event(&mut alice, "presence").await;
    assert_eq!(presence["count"], 2);

    send_json(
        &mut bob,
        json!({"event": "message", "content": "hi all", "visibility": "public"}),
    )
    .await;
    let received = expect_event(&mut alice, "message_success").await;
    assert_eq!(received["message"]["content"], "hi all");
    assert_eq!(received["message"]["senderId"], "bob");
    let echoed = expect_event(&mut bob, "message_success").await;
    assert_eq!(echoed["message"]["id"], received["message"]["id"]);

    // Bob drops; Alice sees the room shrink
    bob.close(None).await.unwrap();
    let left = expect_event(&mut alice, "peer_left").await;
    assert_eq!(left["userId"], "bob");
    let presence = expect_event(&mut alice, "presence").await;
    assert_eq!(presence["count"], 1);
}

#[tokio::test]
async fn test_private_room_denied_closes_4003() {
    let (addr, secret) = start_test_server().await;
    let mut ws = connect(addr, &token_for(&secret, "intruder")).await;
    expect_event(&mut ws, "connected").await;

    send_json(&mut ws, json!({"event": "join_room", "roomId": "vault"})).await;
    let error = expect_event(&mut ws, "error").await;
    assert_eq!(error["code"], "access_denied");
    assert_eq!(close_code(&mut ws).await, 4003);
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection() {
    let (addr, secret) = start_test_server().await;
    let mut ws = connect(addr, &token_for(&secret, "u1")).await;
    expect_event(&mut ws, "connected").await;

    send_json(&mut ws, json!({"event": "teleport"})).await;
    let error = expect_event(&mut ws, "error").await;
    assert_eq!(error["code"], "bad_request");

    ws.send(Message::Text("{not json".into())).await.unwrap();
    let error = expect_event(&mut ws, "error").await;
    assert_eq!(error["code"], "bad_request");

    send_json(&mut ws, json!({"event": "join_room", "roomId": "lobby"})).await;
    expect_event(&mut ws, "join_success").await;
}

#[tokio::test]
async fn test_http_queries_require_auth() {
    let (addr, secret) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{}/api/online", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let mut ws = connect(addr, &token_for(&secret, "alice")).await;
    send_json(&mut ws, json!({"event": "join_room", "roomId": "lobby"})).await;
    expect_event(&mut ws, "join_success").await;

    let token = token_for(&secret, "observer");
    let members: Value = client
        .get(format!("http://{}/api/rooms/lobby/members", addr))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(members["count"], 1);
    assert_eq!(members["members"][0]["userId"], "alice");

    let count: Value = client
        .get(format!("http://{}/api/online/count", addr))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(count["count"], 1);
}
