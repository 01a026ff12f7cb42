//! Shared scaffolding for the integration tests: in-process collaborator
//! fakes, a sage server on an ephemeral port, and a scripted stand-in for
//! the upstream Live API.

// Each test binary compiles this module separately and uses a different
// subset of it.
#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use sage_api::{config::Config, registry::SessionRegistry, router::create_router, state::AppState};
use sage_core::{
    auth::{AuthError, Identity, TokenVerifier},
    composer::NoteComposer,
    conversation::ConversationTurn,
    quota::QuotaGuard,
};
use std::net::SocketAddr;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, accept_async, connect_async, tungstenite::Message,
};
use tracing::Level;
use uuid::Uuid;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const GREETING: &str = "Please greet me.";

/// Accepts any token of the form `token-<user>` and rejects the rest.
pub struct StaticVerifier;

#[async_trait]
impl TokenVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        token
            .strip_prefix("token-")
            .map(|user| Identity {
                user_id: user.to_string(),
            })
            .ok_or(AuthError::InvalidToken)
    }
}

/// Counts prechecks and settlements; answers prechecks with a fixed verdict.
pub struct RecordingQuota {
    allow: AtomicBool,
    pub prechecks: AtomicUsize,
    pub settlements: AtomicUsize,
}

impl RecordingQuota {
    pub fn new(allow: bool) -> Self {
        Self {
            allow: AtomicBool::new(allow),
            prechecks: AtomicUsize::new(0),
            settlements: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl QuotaGuard for RecordingQuota {
    async fn precheck(&self, _identity: &Identity, _estimated_cost: u32) -> anyhow::Result<bool> {
        self.prechecks.fetch_add(1, Ordering::SeqCst);
        Ok(self.allow.load(Ordering::SeqCst))
    }

    async fn settle(
        &self,
        _identity: &Identity,
        _actual_cost: u32,
        _operation: &str,
    ) -> anyhow::Result<()> {
        self.settlements.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every composition request and the turns it carried.
pub struct RecordingComposer {
    pub invocations: AtomicUsize,
    pub last_turns: Mutex<Vec<ConversationTurn>>,
}

impl RecordingComposer {
    pub fn new() -> Self {
        Self {
            invocations: AtomicUsize::new(0),
            last_turns: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl NoteComposer for RecordingComposer {
    async fn compose(
        &self,
        _identity: &Identity,
        turns: &[ConversationTurn],
        _topic_id: Option<Uuid>,
        _course_id: Option<Uuid>,
    ) -> anyhow::Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        *self.last_turns.lock().unwrap() = turns.to_vec();
        Ok(())
    }
}

pub fn test_config(live_api_url: String) -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        live_api_url,
        gemini_api_key: "test-key".to_string(),
        voice_model: "models/test-voice".to_string(),
        chat_model: "test-chat".to_string(),
        greeting_prompt: GREETING.to_string(),
        auth_service_url: "http://127.0.0.1:1".to_string(),
        quota_service_url: "http://127.0.0.1:1".to_string(),
        study_service_url: "http://127.0.0.1:1".to_string(),
        handshake_timeout: Duration::from_secs(2),
        voice_session_cost: 5,
        session_idle_ttl: Duration::from_secs(900),
        log_level: Level::INFO,
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<SessionRegistry>,
    pub quota: Arc<RecordingQuota>,
    pub composer: Arc<RecordingComposer>,
}

/// Spawns the full sage service on an ephemeral port with fake collaborators.
pub async fn spawn_server(live_api_url: String, allow_quota: bool) -> TestServer {
    let registry = Arc::new(SessionRegistry::new());
    let quota = Arc::new(RecordingQuota::new(allow_quota));
    let composer = Arc::new(RecordingComposer::new());

    let state = Arc::new(AppState {
        registry: registry.clone(),
        verifier: Arc::new(StaticVerifier),
        quota: quota.clone(),
        composer: composer.clone(),
        config: Arc::new(test_config(live_api_url)),
    });

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        registry,
        quota,
        composer,
    }
}

pub struct FakeLiveApi {
    pub url: String,
    pub connections: Arc<AtomicUsize>,
}

/// A scripted stand-in for the upstream Live API.
///
/// Per connection it: acknowledges the setup frame with `setupComplete`,
/// answers the greeting turn with an assistant transcript plus one audio
/// chunk, and answers every realtime-input frame with a fixed user
/// transcription.
pub async fn spawn_fake_live_api() -> FakeLiveApi {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(run_upstream_script(stream));
        }
    });

    FakeLiveApi {
        // A well-formed ws URL needs a path; the bridge appends `?key=…`, so a
        // bare `ws://{addr}` would yield an empty request target ("GET ?key=…")
        // that the server rejects during the handshake.
        url: format!("ws://{addr}/"),
        connections,
    }
}

async fn run_upstream_script(stream: TcpStream) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };

    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            Message::Text(text) => {
                let value: serde_json::Value =
                    serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
                let reply = if value.get("setup").is_some() {
                    serde_json::json!({"setupComplete": {}})
                } else if value.get("clientContent").is_some() {
                    serde_json::json!({
                        "serverContent": {
                            "outputTranscription": {"text": "Hello! Ready when you are."},
                            "modelTurn": {"parts": [
                                {"inlineData": {"data": "AQIDBAUGBwg="}}
                            ]}
                        }
                    })
                } else if value.get("realtimeInput").is_some() {
                    serde_json::json!({
                        "serverContent": {
                            "inputTranscription": {"text": "Testing one two."}
                        }
                    })
                } else {
                    continue;
                };
                if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Opens a client WebSocket against the server's `/ws` endpoint.
pub async fn ws_connect(addr: SocketAddr, token: &str) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/ws?token={token}"))
        .await
        .expect("WebSocket connect failed");
    ws
}

/// Reads frames until the next control frame and parses it as JSON.
///
/// Binary audio frames are skipped: scenarios that assert on audio use
/// `next_message` at the point where the frame is expected.
pub async fn next_json(ws: &mut WsClient) -> serde_json::Value {
    loop {
        match next_message(ws).await {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("server sent invalid JSON");
            }
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

/// Reads control frames until one of the given type arrives, asserting that
/// anything skipped is ordinary relay traffic rather than an error.
pub async fn next_json_of_type(ws: &mut WsClient, wanted: &str) -> serde_json::Value {
    loop {
        let frame = next_json(ws).await;
        if frame["type"] == wanted {
            return frame;
        }
        assert!(
            frame["type"] == "assistant_message" || frame["type"] == "transcription",
            "unexpected frame while waiting for {wanted}: {frame}"
        );
    }
}

/// Reads the next WebSocket message, failing the test on timeout or close.
pub async fn next_message(ws: &mut WsClient) -> Message {
    tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a server frame")
        .expect("connection closed while waiting for a frame")
        .expect("websocket transport error")
}

/// Polls `cond` until it holds or a generous deadline passes.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

pub async fn send_json(ws: &mut WsClient, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("failed to send a client frame");
}
