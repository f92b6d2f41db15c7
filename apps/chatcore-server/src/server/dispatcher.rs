use std::sync::Arc;

use tokio::net::TcpStream;

use chatcore_protocol::{decode_request, extract_request_id, ErrorResponse, ExitRequest, ProtocolError, Request};

use super::codec::{FrameDecryptError, FrameReadError, FrameReader, FrameWriter};
use super::core::AppState;
use super::handlers::{messaging, registration, social};
use super::metrics;
use super::presence::SessionToken;

/// Per-connection state the dispatch loop threads through every request:
/// which username (if any) this socket authenticated as, and the token
/// that proves it still owns that binding (SPEC_FULL.md §4.7).
struct Connection {
    username: Option<String>,
    session_token: Option<SessionToken>,
}

impl Connection {
    fn new() -> Self {
        Self { username: None, session_token: None }
    }
}

/// Owns one client socket end to end: splits it into an encrypted
/// `FrameReader`/`FrameWriter` pair, loops decoding and dispatching
/// requests, and on exit unbinds presence and fans the offline
/// transition out to friends (SPEC_FULL.md §4.7, §4.4).
pub async fn handle_connection(state: Arc<AppState>, socket: TcpStream) {
    metrics::record_connection_accepted();
    let (read_half, write_half) = socket.into_split();
    let mut reader = FrameReader::new(state.frame_key(), read_half, state.max_frame_bytes());
    let writer = Arc::new(FrameWriter::new(state.frame_key(), write_half));
    let mut conn = Connection::new();

    loop {
        let payload = match reader.read_frame().await {
            Ok(Ok(payload)) => payload,
            Ok(Err(FrameDecryptError)) => {
                metrics::record_decode_failure("frame_decrypt");
                let response = ErrorResponse::new(None, "invalid request format");
                if writer.write_json(&response).await.is_err() {
                    break;
                }
                continue;
            }
            Err(FrameReadError::Closed) => break,
            Err(error) => {
                tracing::warn!(event = "dispatcher.read_failed", %error);
                break;
            }
        };

        match decode_request(&payload) {
            Ok((envelope, request)) => {
                if matches!(request, Request::Exit(_)) {
                    break;
                }
                if !is_authenticated(&conn, &request) {
                    let response = ErrorResponse::new(Some(envelope.request_id), "未登录");
                    let _ = writer.write_json(&response).await;
                    continue;
                }
                if dispatch(&state, &writer, &mut conn, envelope.request_id, request).await.is_err() {
                    break;
                }
            }
            Err(ProtocolError::UnknownType(type_)) => {
                metrics::record_decode_failure("unknown_type");
                let request_id = extract_request_id(&payload);
                let response = ErrorResponse::new(request_id, format!("unknown type: {type_}"));
                let _ = writer.write_json(&response).await;
            }
            Err(ProtocolError::MalformedPayload) => {
                metrics::record_decode_failure("malformed_payload");
                let request_id = extract_request_id(&payload);
                let response = ErrorResponse::new(request_id, "invalid request format");
                let _ = writer.write_json(&response).await;
            }
        }
    }

    on_disconnect(&state, conn).await;
}

/// Every request type requires an authenticated connection except the
/// three that establish or bypass one: `authenticate`, `user_register`,
/// and `exit` (already handled by the caller before this is reached).
fn is_authenticated(conn: &Connection, request: &Request) -> bool {
    match request {
        Request::Authenticate(_) | Request::UserRegister(_) | Request::Exit(_) => true,
        _ => conn.username.is_some(),
    }
}

async fn dispatch(
    state: &AppState,
    writer: &Arc<FrameWriter>,
    conn: &mut Connection,
    request_id: String,
    request: Request,
) -> std::io::Result<()> {
    match request {
        Request::Authenticate(request) => {
            let outcome = social::authenticate(state, Arc::clone(writer), &request, &request_id).await;
            if let Some((username, token)) = outcome.bound {
                conn.username = Some(username);
                conn.session_token = Some(token);
            }
            writer.write_json(&outcome.response).await
        }
        Request::SendMessage(request) => {
            let caller = conn.username.as_deref().unwrap_or_default();
            match messaging::send_message(state, caller, &request, &request_id).await {
                Ok(response) => writer.write_json(&response).await,
                Err(response) => writer.write_json(&response).await,
            }
        }
        Request::SendMedia(request) => {
            let caller = conn.username.as_deref().unwrap_or_default();
            match messaging::send_media(state, caller, &request, &request_id).await {
                Ok(messaging::SendMediaOutcome::Chunk(ack)) => writer.write_json(&ack).await,
                Ok(messaging::SendMediaOutcome::Final(response)) => writer.write_json(&response).await,
                Err(response) => writer.write_json(&response).await,
            }
        }
        Request::DownloadMedia(request) => match messaging::download_media(state, &request, &request_id).await {
            Ok(response) => writer.write_json(&response).await,
            Err(response) => writer.write_json(&response).await,
        },
        Request::ChatHistory(request) => {
            let caller = conn.username.as_deref().unwrap_or_default();
            match messaging::get_chat_history_paginated(state, caller, &request, &request_id).await {
                Ok(response) => writer.write_json(&response).await,
                Err(response) => writer.write_json(&response).await,
            }
        }
        Request::AddFriend(request) => {
            let caller = conn.username.as_deref().unwrap_or_default();
            match social::add_friend(state, caller, &request, &request_id).await {
                Ok(response) => writer.write_json(&response).await,
                Err(response) => writer.write_json(&response).await,
            }
        }
        Request::UpdateRemarks(request) => {
            let caller = conn.username.as_deref().unwrap_or_default();
            let response = social::update_remarks(state, caller, &request, &request_id).await;
            writer.write_json(&response).await
        }
        Request::UpdateSign(request) => {
            let caller = conn.username.as_deref().unwrap_or_default();
            let response = social::update_sign(state, caller, &request, &request_id).await;
            writer.write_json(&response).await
        }
        Request::UpdateName(request) => {
            let caller = conn.username.as_deref().unwrap_or_default();
            let response = social::update_name(state, caller, &request, &request_id).await;
            writer.write_json(&response).await
        }
        Request::UploadAvatar(request) => {
            let caller = conn.username.as_deref().unwrap_or_default();
            let response = social::upload_avatar(state, caller, &request, &request_id).await;
            writer.write_json(&response).await
        }
        Request::GetUserInfo(request) => match social::get_user_info(state, &request, &request_id).await {
            Ok(response) => writer.write_json(&response).await,
            Err(response) => writer.write_json(&response).await,
        },
        Request::DeleteMessages(request) => {
            let caller = conn.username.as_deref().unwrap_or_default();
            match messaging::delete_messages(state, caller, &request, &request_id).await {
                Ok(response) => writer.write_json(&response).await,
                Err(response) => writer.write_json(&response).await,
            }
        }
        Request::UserRegister(request) => {
            let response = registration::user_register(state, &request, &request_id).await;
            writer.write_json(&response).await
        }
        Request::Exit(ExitRequest { .. }) => unreachable!("exit is handled by the caller before dispatch"),
    }
}

/// Unbinds presence (guarded by the session token so a stale connection
/// can never evict a newer login) and fans the offline transition out to
/// friends, then abandons any upload sessions this connection left open
/// (SPEC_FULL.md §4.4, §9 decision 3).
async fn on_disconnect(state: &AppState, conn: Connection) {
    let Some(username) = conn.username else { return };
    if let Some(token) = conn.session_token {
        state.presence().unbind(&username, token).await;
    }
    let orphaned = state.uploads().request_ids_for_connection(&username).await;
    if !orphaned.is_empty() {
        state.uploads().abandon(&orphaned).await;
    }
    social::notify_friends_changed(state, &username, Some(&username)).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};
    use tokio::net::{TcpListener, TcpStream};

    use chatcore_core::Username;
    use chatcore_protocol::MAX_FRAME_BYTES;

    use super::handle_connection;
    use crate::server::codec::{FrameKey, FrameReader, FrameWriter};
    use crate::server::core::{AppConfig, AppState};

    const TEST_KEY: [u8; 32] = [3_u8; 32];

    async fn test_state(media_root: &std::path::Path) -> Arc<AppState> {
        let mut config = AppConfig::default();
        config.media_root = media_root.to_path_buf();
        config.frame_key = TEST_KEY;
        Arc::new(AppState::new(&config).await.expect("app state should initialize"))
    }

    async fn connect(state: Arc<AppState>) -> (FrameReader, Arc<FrameWriter>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                handle_connection(state, socket).await;
            }
        });
        let client = TcpStream::connect(addr).await.expect("connect loopback");
        let (read_half, write_half) = client.into_split();
        let reader = FrameReader::new(FrameKey::from_bytes(TEST_KEY), read_half, MAX_FRAME_BYTES);
        let writer = Arc::new(FrameWriter::new(FrameKey::from_bytes(TEST_KEY), write_half));
        (reader, writer)
    }

    async fn send(writer: &FrameWriter, value: Value) {
        writer.write_json(&value).await.expect("write frame");
    }

    async fn recv(reader: &mut FrameReader) -> Value {
        let bytes = reader.read_frame().await.expect("read frame").expect("decrypt frame");
        serde_json::from_slice(&bytes).expect("parse json")
    }

    /// Drains frames until one of type `type_` shows up, tolerating
    /// interleaved presence/friend pushes from concurrent connections.
    async fn recv_until(reader: &mut FrameReader, type_: &str) -> Value {
        for _ in 0..8 {
            let value = recv(reader).await;
            if value.get("type").and_then(Value::as_str) == Some(type_) {
                return value;
            }
        }
        panic!("did not observe a \"{type_}\" frame within the expected window");
    }

    #[tokio::test]
    async fn authenticate_rejects_bad_password_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        state.store().create_user(&"alice".parse::<Username>().unwrap(), "Secret123").await.unwrap();

        let (mut reader, writer) = connect(Arc::clone(&state)).await;
        send(&writer, json!({"type": "authenticate", "request_id": "r1", "username": "alice", "password": "wrong"})).await;
        let response = recv(&mut reader).await;
        assert_eq!(response["status"], "fail");
        assert_eq!(response["request_id"], "r1");

        send(&writer, json!({"type": "authenticate", "request_id": "r2", "username": "alice", "password": "Secret123"})).await;
        let response = recv_until(&mut reader, "authenticate").await;
        assert_eq!(response["status"], "success");
    }

    #[tokio::test]
    async fn send_message_requires_authentication() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let (mut reader, writer) = connect(state).await;

        send(&writer, json!({"type": "send_message", "request_id": "r1", "from": "alice", "to": "bob", "message": "hi"})).await;
        let response = recv(&mut reader).await;
        assert_eq!(response["status"], "error");
        assert_eq!(response["request_id"], "r1");
    }

    #[tokio::test]
    async fn authenticated_send_message_is_pushed_live_to_online_friend() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        state.store().create_user(&"alice".parse::<Username>().unwrap(), "Secret123").await.unwrap();
        state.store().create_user(&"bob".parse::<Username>().unwrap(), "Secret123").await.unwrap();
        state.store().add_friend("alice", "bob").await.unwrap();

        let (mut alice_reader, alice_writer) = connect(Arc::clone(&state)).await;
        send(&alice_writer, json!({"type": "authenticate", "request_id": "a1", "username": "alice", "password": "Secret123"})).await;
        let _ = recv_until(&mut alice_reader, "authenticate").await;

        let (mut bob_reader, bob_writer) = connect(Arc::clone(&state)).await;
        send(&bob_writer, json!({"type": "authenticate", "request_id": "b1", "username": "bob", "password": "Secret123"})).await;
        let _ = recv_until(&mut bob_reader, "authenticate").await;

        send(&alice_writer, json!({"type": "send_message", "request_id": "m1", "from": "alice", "to": "bob", "message": "hello bob"})).await;
        let ack = recv_until(&mut alice_reader, "send_message").await;
        assert_eq!(ack["status"], "success");

        let push = recv_until(&mut bob_reader, "new_message").await;
        assert_eq!(push["message"], "hello bob");
        assert_eq!(push["from"], "alice");
    }

    #[tokio::test]
    async fn exit_closes_the_connection_loop() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        let (mut reader, writer) = connect(state).await;
        send(&writer, json!({"type": "exit", "request_id": "r1"})).await;
        let result = reader.read_frame().await;
        assert!(result.is_err());
    }
}
