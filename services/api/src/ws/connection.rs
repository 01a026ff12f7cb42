//! Manages one client WebSocket connection: authentication, control-message
//! dispatch, and the single-active-bridge lifecycle.
//!
//! The connection moves through AUTHENTICATING → IDLE → BRIDGING → STOPPING
//! → CLOSED. Exactly one bridge may run per connection; every outbound frame
//! goes through one serialized sink so acknowledgments and relayed audio
//! never interleave mid-frame.

use super::{
    bridge::{self, BridgeEvent, CompletionHook, SessionContext},
    protocol::{ClientMessage, ErrorCode, ServerMessage},
};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use sage_core::auth::Identity;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, mpsc::error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Capacity of the pending-audio queue feeding the bridge. The queue is
/// lossy: audio lost on an overloaded connection is not redelivered.
const AUDIO_QUEUE_CAPACITY: usize = 128;

/// Capacity of the bridge event channel back to the connection loop.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// WebSocket close code sent when the bearer credential is rejected.
const CLOSE_POLICY_VIOLATION: u16 = 1008;

type SharedSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

#[derive(Deserialize)]
pub struct WsAuthParams {
    #[serde(default)]
    token: Option<String>,
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
///
/// The bearer credential travels as a `token` query parameter because
/// browser WebSocket clients cannot set headers. Verification happens before
/// any session state is created; a rejected credential closes the socket
/// with a policy-violation code as soon as the upgrade completes.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsAuthParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let identity = match params.token.as_deref() {
        Some(token) => match state.verifier.verify(token).await {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(error = %e, "WebSocket credential rejected.");
                None
            }
        },
        None => {
            warn!("WebSocket upgrade attempted without a token parameter.");
            None
        }
    };

    match identity {
        Some(identity) => ws.on_upgrade(move |socket| handle_socket(socket, state, identity)),
        None => ws.on_upgrade(refuse_socket),
    }
}

async fn refuse_socket(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: "authentication failed".into(),
        })))
        .await;
}

/// Main handler for an individual authenticated WebSocket connection.
#[instrument(name = "voice_connection", skip_all, fields(conn_id, user_id = %identity.user_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, identity: Identity) {
    let conn_id: u32 = rand::random();
    tracing::Span::current().record("conn_id", conn_id);
    info!("WebSocket connection authenticated.");

    let (socket_tx, socket_rx) = socket.split();
    let socket_tx = Arc::new(Mutex::new(socket_tx));

    if let Err(e) = run_connection(state, identity, socket_tx, socket_rx).await {
        error!(error = ?e, "Connection terminated with error.");
    }
    info!("Connection closed.");
}

/// One bridge episode owned by the connection.
struct ActiveBridge {
    session_id: Uuid,
    /// `Some` while BRIDGING. Dropped on `stop`, which closes the queue and
    /// signals graceful end-of-input (STOPPING).
    input_tx: Option<mpsc::Sender<Bytes>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    /// Set once the upstream handshake completed and the client was told.
    live: bool,
}

impl ActiveBridge {
    fn is_stopping(&self) -> bool {
        self.input_tx.is_none()
    }
}

/// The main event loop for one connection: dispatches client frames and
/// forwards bridge events until the client goes away.
async fn run_connection(
    state: Arc<AppState>,
    identity: Identity,
    socket_tx: SharedSink,
    mut socket_rx: SplitStream<WebSocket>,
) -> Result<()> {
    // One event channel outlives individual bridges; each bridge gets a
    // sender clone. The single-active-bridge invariant keeps the stream of
    // events unambiguous.
    let (event_tx, mut event_rx) = mpsc::channel::<BridgeEvent>(EVENT_CHANNEL_CAPACITY);
    let mut active: Option<ActiveBridge> = None;

    let result = loop {
        tokio::select! {
            maybe_msg = socket_rx.next() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_control_message(
                            &state, &identity, &socket_tx, &event_tx, &mut active, &text,
                        )
                        .await
                        {
                            break Err(e);
                        }
                    }
                    Some(Ok(Message::Binary(data))) => forward_audio(&active, data),
                    Some(Ok(Message::Close(_))) => {
                        info!("Client sent a close frame.");
                        break Ok(());
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Transport error on the client socket.");
                        break Ok(());
                    }
                    None => {
                        info!("Client disconnected.");
                        break Ok(());
                    }
                }
            }
            Some(event) = event_rx.recv() => {
                if let Err(e) = handle_bridge_event(&socket_tx, &mut active, event).await {
                    break Err(e);
                }
            }
        }
    };

    // CLOSED: cancel any in-flight bridge and await its teardown so the
    // completion hook has run exactly once before the connection finishes.
    if let Some(bridge) = active.take() {
        info!(session_id = %bridge.session_id, "Cancelling the active bridge on teardown.");
        bridge.cancel.cancel();
        drop(bridge.input_tx);
        let mut task = bridge.task;
        loop {
            tokio::select! {
                res = &mut task => {
                    if let Err(e) = res {
                        error!(error = ?e, "Bridge task failed during teardown.");
                    }
                    break;
                }
                // Keep draining events so the bridge never blocks on a full
                // channel while we wait for it.
                _ = event_rx.recv() => {}
            }
        }
    }

    result
}

async fn handle_control_message(
    state: &Arc<AppState>,
    identity: &Identity,
    socket_tx: &SharedSink,
    event_tx: &mpsc::Sender<BridgeEvent>,
    active: &mut Option<ActiveBridge>,
    text: &str,
) -> Result<()> {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(error = %e, "Discarding a malformed control message.");
            return send_msg(
                socket_tx,
                ServerMessage::Error {
                    session_id: None,
                    code: ErrorCode::InvalidMessage,
                    message: "Malformed control message.".to_string(),
                },
            )
            .await;
        }
    };

    match msg {
        ClientMessage::Ping { session_id } => {
            send_msg(socket_tx, ServerMessage::Pong { session_id }).await
        }
        ClientMessage::StartSession { session_id } => {
            start_session(state, identity, socket_tx, event_tx, active, session_id).await
        }
        ClientMessage::Stop { session_id } => stop_session(socket_tx, active, session_id).await,
    }
}

/// IDLE → BRIDGING: validates the request, prechecks quota, and spawns the
/// bridge. `session_started` is only emitted once the bridge reports that
/// its upstream handshake completed.
async fn start_session(
    state: &Arc<AppState>,
    identity: &Identity,
    socket_tx: &SharedSink,
    event_tx: &mpsc::Sender<BridgeEvent>,
    active: &mut Option<ActiveBridge>,
    session_id: Uuid,
) -> Result<()> {
    if active.is_some() {
        return send_error(
            socket_tx,
            session_id,
            ErrorCode::AlreadyActive,
            "A bridge is already running on this connection.",
        )
        .await;
    }
    let Some(session) = state.registry.get(session_id) else {
        return send_error(
            socket_tx,
            session_id,
            ErrorCode::SessionNotFound,
            "Unknown session id.",
        )
        .await;
    };
    if session.user_id != identity.user_id {
        return send_error(
            socket_tx,
            session_id,
            ErrorCode::Forbidden,
            "Session belongs to another user.",
        )
        .await;
    }

    let cost = state.config.voice_session_cost;
    let allowed = match state.quota.precheck(identity, cost).await {
        Ok(allowed) => allowed,
        Err(e) => {
            // Failing open would bypass the only enforcement point.
            warn!(error = ?e, "Quota precheck failed; denying the bridge start.");
            false
        }
    };
    if !allowed {
        return send_error(
            socket_tx,
            session_id,
            ErrorCode::QuotaExceeded,
            "Insufficient credits for a voice session.",
        )
        .await;
    }

    state.registry.touch(session_id);

    let context = SessionContext {
        session_id,
        system_instruction: session.system_instruction,
        course_id: session.course_id,
        topic_id: session.topic_id,
        chat_session_id: session.chat_session_id,
        study_session_id: session.study_session_id,
    };
    let hook = CompletionHook::new(
        state.quota.clone(),
        state.composer.clone(),
        identity.clone(),
        &context,
        cost,
    );

    let (input_tx, input_rx) = mpsc::channel(AUDIO_QUEUE_CAPACITY);
    let cancel = CancellationToken::new();
    let task = bridge::spawn(
        state.config.clone(),
        context,
        hook,
        input_rx,
        event_tx.clone(),
        cancel.clone(),
    );

    *active = Some(ActiveBridge {
        session_id,
        input_tx: Some(input_tx),
        cancel,
        task,
        live: false,
    });
    info!(%session_id, "Bridge starting.");
    Ok(())
}

/// BRIDGING → STOPPING: closes the bridge's input queue (the end-of-input
/// sentinel) and acknowledges immediately, without waiting for upstream
/// teardown. The episode stays owned until the bridge's `Closed` event so a
/// racing `start_session` still sees it as active.
async fn stop_session(
    socket_tx: &SharedSink,
    active: &mut Option<ActiveBridge>,
    session_id: Uuid,
) -> Result<()> {
    match active {
        Some(bridge) if bridge.session_id == session_id && !bridge.is_stopping() => {
            bridge.input_tx = None;
            info!(%session_id, "Stop requested; bridge input closed.");
            send_msg(socket_tx, ServerMessage::Stopped { session_id }).await
        }
        _ => {
            send_error(
                socket_tx,
                session_id,
                ErrorCode::InvalidMessage,
                "No active bridge for that session.",
            )
            .await
        }
    }
}

/// Binary frames while BRIDGING feed the bounded queue; while IDLE they have
/// no destination and are dropped silently.
fn forward_audio(active: &Option<ActiveBridge>, data: Bytes) {
    let Some(bridge) = active else {
        debug!("Dropping an audio frame received while idle.");
        return;
    };
    let Some(input_tx) = &bridge.input_tx else {
        debug!("Dropping an audio frame received while stopping.");
        return;
    };
    match input_tx.try_send(data) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!("Pending-audio queue is full; dropping a frame.");
        }
        Err(TrySendError::Closed(_)) => {
            debug!("Bridge input already closed; dropping a frame.");
        }
    }
}

/// Forwards one bridge event to the client and updates the episode state.
async fn handle_bridge_event(
    socket_tx: &SharedSink,
    active: &mut Option<ActiveBridge>,
    event: BridgeEvent,
) -> Result<()> {
    let Some(session_id) = active.as_ref().map(|bridge| bridge.session_id) else {
        debug!("Dropping a bridge event that arrived after teardown.");
        return Ok(());
    };

    match event {
        BridgeEvent::Live => {
            if let Some(bridge) = active.as_mut() {
                bridge.live = true;
            }
            send_msg(socket_tx, ServerMessage::SessionStarted { session_id }).await?;
        }
        BridgeEvent::Audio(data) => send_binary(socket_tx, data).await?,
        BridgeEvent::Transcription(text) => {
            send_msg(socket_tx, ServerMessage::Transcription { session_id, text }).await?;
        }
        BridgeEvent::AssistantMessage(text) => {
            send_msg(
                socket_tx,
                ServerMessage::AssistantMessage { session_id, text },
            )
            .await?;
        }
        BridgeEvent::Interrupted => {
            send_msg(socket_tx, ServerMessage::Interrupted { session_id }).await?;
        }
        BridgeEvent::Closed { error } => {
            let Some(bridge) = active.take() else {
                return Ok(());
            };
            // Reap the task so a following start_session cannot race with an
            // in-flight teardown.
            let is_stopping = bridge.is_stopping();
            let live = bridge.live;
            if let Err(e) = bridge.task.await {
                error!(error = ?e, "Bridge task failed.");
            }
            match error {
                Some(reason) if !is_stopping => {
                    warn!(%session_id, %reason, "Bridge ended with an upstream failure.");
                    send_error(
                        socket_tx,
                        session_id,
                        ErrorCode::UpstreamUnavailable,
                        &reason,
                    )
                    .await?;
                }
                Some(reason) => {
                    // The `stopped` acknowledgment already went out.
                    debug!(%session_id, %reason, "Upstream teardown error after stop.");
                }
                None if live && !is_stopping => {
                    // The upstream ended the conversation; the client still
                    // gets its terminal event.
                    send_msg(socket_tx, ServerMessage::Stopped { session_id }).await?;
                }
                None => {}
            }
            info!(%session_id, "Bridge closed; connection idle.");
        }
    }
    Ok(())
}

/// Serializes and sends a control frame through the connection's single sink.
pub(crate) async fn send_msg(socket_tx: &SharedSink, msg: ServerMessage) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx
        .lock()
        .await
        .send(Message::Text(serialized.into()))
        .await?;
    Ok(())
}

async fn send_binary(socket_tx: &SharedSink, data: Bytes) -> Result<()> {
    socket_tx.lock().await.send(Message::Binary(data)).await?;
    Ok(())
}

async fn send_error(
    socket_tx: &SharedSink,
    session_id: Uuid,
    code: ErrorCode,
    message: &str,
) -> Result<()> {
    send_msg(
        socket_tx,
        ServerMessage::Error {
            session_id: Some(session_id),
            code,
            message: message.to_string(),
        },
    )
    .await
}
