//! The Duplex Bridge Engine
//!
//! For the lifetime of one bridging episode this module owns exactly one
//! upstream Live API connection: it performs the setup handshake, then runs
//! the outbound (client audio → upstream) and inbound (upstream → client)
//! relay loops until stopped, cancelled, or failed. Teardown closes the
//! upstream socket and fires the completion hook exactly once, whichever leg
//! ended the episode.

use crate::config::Config;
use base64::Engine;
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use sage_core::{
    auth::Identity,
    composer::NoteComposer,
    conversation::{TurnLog, TurnRole},
    quota::QuotaGuard,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// Fixed outbound audio format; resampling is a client contract.
const OUTBOUND_AUDIO_MIME: &str = "audio/pcm;rate=16000";

/// How long teardown waits for the upstream close frame to flush.
const UPSTREAM_CLOSE_GRACE: Duration = Duration::from_secs(2);

const SETTLE_OPERATION: &str = "voice_session";

type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type UpstreamSink = SplitSink<UpstreamStream, WsMessage>;
type UpstreamSource = SplitStream<UpstreamStream>;

// --- Local Live API Wire Types (for encapsulation) ---
mod live_api {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) enum ClientMessage {
        Setup(BidiGenerateContentSetup),
        RealtimeInput(BidiGenerateContentRealtimeInput),
        ClientContent(BidiGenerateContentClientContent),
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentSetup {
        pub model: String,
        pub generation_config: GenerationConfig,
        pub system_instruction: Content,
        pub input_audio_transcription: AudioTranscriptionConfig,
        pub output_audio_transcription: AudioTranscriptionConfig,
    }

    /// An empty object in the setup frame turns transcription on.
    #[derive(Serialize)]
    pub(super) struct AudioTranscriptionConfig {}

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerationConfig {
        pub response_modalities: Vec<ResponseModality>,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub(super) enum ResponseModality {
        Audio,
    }

    #[derive(Serialize)]
    pub(super) struct Content {
        pub role: String,
        pub parts: Vec<Part>,
    }

    #[derive(Serialize)]
    pub(super) struct Part {
        pub text: String,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentClientContent {
        pub turns: Vec<Content>,
        pub turn_complete: bool,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentRealtimeInput {
        pub audio: Blob,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Blob {
        pub mime_type: String,
        pub data: String,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase", default)]
    pub(super) struct ServerMessage {
        pub setup_complete: Option<serde_json::Value>,
        pub server_content: Option<LiveServerContent>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase", default)]
    pub(super) struct LiveServerContent {
        pub interrupted: Option<bool>,
        pub turn_complete: Option<bool>,
        pub input_transcription: Option<Transcription>,
        pub output_transcription: Option<Transcription>,
        pub model_turn: Option<ModelTurn>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(default)]
    pub(super) struct Transcription {
        pub text: String,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(default)]
    pub(super) struct ModelTurn {
        pub parts: Vec<ModelPart>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase", default)]
    pub(super) struct ModelPart {
        pub text: Option<String>,
        pub inline_data: Option<ServerBlob>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(default)]
    pub(super) struct ServerBlob {
        pub data: String,
    }
}

/// Correlation snapshot taken from the registry when the bridge starts.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub system_instruction: String,
    pub course_id: Option<Uuid>,
    pub topic_id: Option<Uuid>,
    pub chat_session_id: Option<Uuid>,
    pub study_session_id: Option<Uuid>,
}

/// Typed events emitted by the bridge toward the connection handler.
#[derive(Debug)]
pub enum BridgeEvent {
    /// The upstream handshake completed; the session is live.
    Live,
    /// Raw PCM audio from the assistant.
    Audio(Bytes),
    /// Transcribed user speech.
    Transcription(String),
    /// Assistant utterance text.
    AssistantMessage(String),
    /// The user's new speech interrupted the assistant mid-response.
    Interrupted,
    /// The bridge has torn down. Always the final event.
    Closed { error: Option<String> },
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to reach the upstream endpoint: {0}")]
    Connect(String),
    #[error("upstream handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("upstream connection closed unexpectedly")]
    UpstreamClosed,
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Post-teardown side effects, dispatched exactly once per bridge.
///
/// Consuming the hook by value is what makes "exactly once" structural: the
/// bridge owns one hook and gives it up at its single teardown point. The
/// settlement and composition run on a detached task, off the realtime path.
pub struct CompletionHook {
    quota: Arc<dyn QuotaGuard>,
    composer: Arc<dyn NoteComposer>,
    identity: Identity,
    session_id: Uuid,
    topic_id: Option<Uuid>,
    course_id: Option<Uuid>,
    cost: u32,
}

impl CompletionHook {
    pub fn new(
        quota: Arc<dyn QuotaGuard>,
        composer: Arc<dyn NoteComposer>,
        identity: Identity,
        context: &SessionContext,
        cost: u32,
    ) -> Self {
        Self {
            quota,
            composer,
            identity,
            session_id: context.session_id,
            topic_id: context.topic_id,
            course_id: context.course_id,
            cost,
        }
    }

    fn dispatch(self, turns: TurnLog, went_live: bool) {
        let span = info_span!("post_session", session_id = %self.session_id);
        tokio::spawn(
            async move {
                if went_live {
                    if let Err(e) = self
                        .quota
                        .settle(&self.identity, self.cost, SETTLE_OPERATION)
                        .await
                    {
                        warn!(error = ?e, "Quota settlement failed; not retrying.");
                    }
                } else {
                    debug!("Bridge never went live; skipping settlement.");
                }

                let turns = turns.into_turns();
                if turns.len() >= 2 && self.topic_id.is_some() {
                    if let Err(e) = self
                        .composer
                        .compose(&self.identity, &turns, self.topic_id, self.course_id)
                        .await
                    {
                        warn!(error = ?e, "Study-note composition failed; ignoring.");
                    }
                } else {
                    debug!(
                        turn_count = turns.len(),
                        "Skipping note composition: too few turns or no topic."
                    );
                }
            }
            .instrument(span),
        );
    }
}

/// Launches the bridge engine for one bridging episode.
///
/// The returned task runs until the input queue closes, the upstream ends,
/// or `cancel` fires; it always emits a final `Closed` event and dispatches
/// the completion hook before finishing.
pub fn spawn(
    config: Arc<Config>,
    context: SessionContext,
    hook: CompletionHook,
    input_rx: mpsc::Receiver<Bytes>,
    events: mpsc::Sender<BridgeEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let span = info_span!("bridge", session_id = %context.session_id);
    tokio::spawn(run(config, context, hook, input_rx, events, cancel).instrument(span))
}

async fn run(
    config: Arc<Config>,
    context: SessionContext,
    hook: CompletionHook,
    input_rx: mpsc::Receiver<Bytes>,
    events: mpsc::Sender<BridgeEvent>,
    cancel: CancellationToken,
) {
    let mut turns = TurnLog::new();
    let mut went_live = false;

    let error = match relay(
        &config,
        &context,
        input_rx,
        &events,
        &cancel,
        &mut turns,
        &mut went_live,
    )
    .await
    {
        Ok(()) => None,
        Err(e) => {
            warn!(error = %e, "Bridge relay failed.");
            Some(e.to_string())
        }
    };

    // The handler treats `Closed` as the terminal event. Delivery failing
    // means the connection itself is already gone.
    let _ = events.send(BridgeEvent::Closed { error }).await;

    hook.dispatch(turns, went_live);
}

async fn relay(
    config: &Config,
    context: &SessionContext,
    input_rx: mpsc::Receiver<Bytes>,
    events: &mpsc::Sender<BridgeEvent>,
    cancel: &CancellationToken,
    turns: &mut TurnLog,
    went_live: &mut bool,
) -> Result<(), BridgeError> {
    // Connect and complete the setup exchange, all within the handshake
    // budget so a stalled upstream surfaces as a failure instead of a hang.
    let url = format!("{}?key={}", config.live_api_url, config.gemini_api_key);
    let handshake = async {
        let (stream, _) = connect_async(&url)
            .await
            .map_err(|e| BridgeError::Connect(e.to_string()))?;
        info!("Connected to the upstream Live API.");
        complete_handshake(stream, config, context, events, turns).await
    };
    let mut stream = tokio::select! {
        // Cancellation is an expected outcome, not an error.
        _ = cancel.cancelled() => return Ok(()),
        outcome = timeout(config.handshake_timeout, handshake) => match outcome {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(BridgeError::HandshakeTimeout(config.handshake_timeout)),
        },
    };

    *went_live = true;
    if events.send(BridgeEvent::Live).await.is_err() {
        // The connection handler is gone; nothing left to relay to.
        return Ok(());
    }

    // With the client notified, prompt the assistant to speak first.
    send_greeting(&mut stream, &config.greeting_prompt).await?;

    let (upstream_tx, upstream_rx) = stream.split();

    // Both relay legs share one child token: whichever leg exits first
    // cancels its sibling, and the handler's token cancels both.
    let relay_cancel = cancel.child_token();
    let mut outbound_task = tokio::spawn(outbound_relay(
        upstream_tx,
        input_rx,
        relay_cancel.clone(),
    ));
    let mut inbound_task = tokio::spawn(inbound_relay(
        upstream_rx,
        events.clone(),
        config.greeting_prompt.clone(),
        relay_cancel.clone(),
        std::mem::take(turns),
    ));

    let (outbound_res, inbound_res) = tokio::select! {
        res = &mut outbound_task => {
            relay_cancel.cancel();
            (res, inbound_task.await)
        }
        res = &mut inbound_task => {
            relay_cancel.cancel();
            (outbound_task.await, res)
        }
    };

    let (sink, outbound_error) = match outbound_res {
        Ok((sink, error)) => (Some(sink), error),
        Err(e) => {
            error!(error = ?e, "Outbound relay task failed.");
            (None, None)
        }
    };
    let inbound_error = match inbound_res {
        Ok((log, error)) => {
            *turns = log;
            error
        }
        Err(e) => {
            error!(error = ?e, "Inbound relay task failed.");
            None
        }
    };

    // Release the upstream socket before reporting the outcome; the close is
    // bounded so a dead peer cannot stall teardown.
    if let Some(mut sink) = sink {
        let _ = timeout(UPSTREAM_CLOSE_GRACE, sink.close()).await;
    }

    match inbound_error.or(outbound_error) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Sends the setup frame and drains upstream messages until `setupComplete`,
/// processing content that legitimately precedes the marker.
async fn complete_handshake(
    mut stream: UpstreamStream,
    config: &Config,
    context: &SessionContext,
    events: &mpsc::Sender<BridgeEvent>,
    turns: &mut TurnLog,
) -> Result<UpstreamStream, BridgeError> {
    let setup = live_api::ClientMessage::Setup(live_api::BidiGenerateContentSetup {
        model: config.voice_model.clone(),
        generation_config: live_api::GenerationConfig {
            response_modalities: vec![live_api::ResponseModality::Audio],
        },
        system_instruction: live_api::Content {
            role: "system".to_string(),
            parts: vec![live_api::Part {
                text: context.system_instruction.clone(),
            }],
        },
        input_audio_transcription: live_api::AudioTranscriptionConfig {},
        output_audio_transcription: live_api::AudioTranscriptionConfig {},
    });
    send_upstream(&mut stream, &setup).await?;

    loop {
        let message = stream
            .next()
            .await
            .ok_or(BridgeError::UpstreamClosed)?
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        match message {
            WsMessage::Text(text) => {
                let Some(msg) = parse_server_message(&text) else {
                    continue;
                };
                if msg.setup_complete.is_some() {
                    info!("Upstream setup complete; session is live.");
                    return Ok(stream);
                }
                if let Some(content) = msg.server_content {
                    // Buffered audio or text may precede the marker.
                    process_server_content(content, events, turns, &config.greeting_prompt).await;
                }
            }
            WsMessage::Close(frame) => {
                warn!(?frame, "Upstream closed during the handshake.");
                return Err(BridgeError::UpstreamClosed);
            }
            _ => {}
        }
    }
}

/// One synthetic user turn prompting the assistant to speak first.
async fn send_greeting<S>(sink: &mut S, greeting: &str) -> Result<(), BridgeError>
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let turn = live_api::ClientMessage::ClientContent(live_api::BidiGenerateContentClientContent {
        turns: vec![live_api::Content {
            role: "user".to_string(),
            parts: vec![live_api::Part {
                text: greeting.to_string(),
            }],
        }],
        turn_complete: true,
    });
    send_upstream(sink, &turn).await
}

async fn send_upstream<S>(sink: &mut S, message: &live_api::ClientMessage) -> Result<(), BridgeError>
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let payload =
        serde_json::to_string(message).map_err(|e| BridgeError::Protocol(e.to_string()))?;
    sink.send(WsMessage::Text(payload.into()))
        .await
        .map_err(|e| BridgeError::Transport(e.to_string()))
}

fn parse_server_message(text: &str) -> Option<live_api::ServerMessage> {
    match serde_json::from_str(text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            debug!(error = %e, "Skipping unparseable upstream frame.");
            None
        }
    }
}

/// Client → upstream leg: wraps queued PCM frames in realtime-input
/// envelopes. A closed queue is the graceful end-of-input signal and ends
/// the leg without this side closing the socket.
async fn outbound_relay(
    mut sink: UpstreamSink,
    mut input_rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) -> (UpstreamSink, Option<BridgeError>) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = input_rx.recv() => frame,
        };
        let Some(audio) = frame else {
            info!("Audio input exhausted; ending outbound relay.");
            break;
        };
        let envelope =
            live_api::ClientMessage::RealtimeInput(live_api::BidiGenerateContentRealtimeInput {
                audio: live_api::Blob {
                    mime_type: OUTBOUND_AUDIO_MIME.to_string(),
                    data: base64::engine::general_purpose::STANDARD.encode(&audio),
                },
            });
        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            result = send_upstream(&mut sink, &envelope) => result,
        };
        if let Err(e) = sent {
            return (sink, Some(e));
        }
    }
    (sink, None)
}

/// Upstream → client leg: interprets the closed set of server content shapes
/// and accumulates the transcript.
async fn inbound_relay(
    mut source: UpstreamSource,
    events: mpsc::Sender<BridgeEvent>,
    greeting: String,
    cancel: CancellationToken,
    mut turns: TurnLog,
) -> (TurnLog, Option<BridgeError>) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = source.next() => message,
        };
        match message {
            Some(Ok(WsMessage::Text(text))) => {
                let Some(msg) = parse_server_message(&text) else {
                    continue;
                };
                if let Some(content) = msg.server_content {
                    process_server_content(content, &events, &mut turns, &greeting).await;
                }
            }
            Some(Ok(WsMessage::Close(frame))) => {
                warn!(?frame, "Upstream closed the connection.");
                return (turns, Some(BridgeError::UpstreamClosed));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "Error reading from upstream.");
                return (turns, Some(BridgeError::Transport(e.to_string())));
            }
            None => return (turns, Some(BridgeError::UpstreamClosed)),
        }
    }
    (turns, None)
}

/// Applies one upstream content frame: forwards events and accumulates turns.
async fn process_server_content(
    content: live_api::LiveServerContent,
    events: &mpsc::Sender<BridgeEvent>,
    turns: &mut TurnLog,
    greeting: &str,
) {
    if content.interrupted == Some(true) {
        let _ = events.send(BridgeEvent::Interrupted).await;
    }
    if let Some(transcription) = content.input_transcription {
        let text = transcription.text;
        // The input leg also transcribes the synthetic greeting prompt; that
        // echo is not user speech.
        if text.trim() == greeting.trim() {
            debug!("Dropping greeting echo from the input transcription.");
        } else if !text.trim().is_empty() {
            turns.push(TurnRole::User, &text);
            let _ = events.send(BridgeEvent::Transcription(text)).await;
        }
    }
    if let Some(transcription) = content.output_transcription {
        let text = transcription.text;
        if !text.trim().is_empty() {
            turns.push(TurnRole::Assistant, &text);
            let _ = events.send(BridgeEvent::AssistantMessage(text)).await;
        }
    }
    if let Some(model_turn) = content.model_turn {
        for part in model_turn.parts {
            if let Some(text) = part.text {
                if !text.trim().is_empty() {
                    turns.push(TurnRole::Assistant, &text);
                    let _ = events.send(BridgeEvent::AssistantMessage(text)).await;
                }
            }
            if let Some(blob) = part.inline_data {
                match base64::engine::general_purpose::STANDARD.decode(&blob.data) {
                    Ok(pcm) => {
                        let _ = events.send(BridgeEvent::Audio(Bytes::from(pcm))).await;
                    }
                    Err(e) => debug!(error = %e, "Discarding an undecodable audio payload."),
                }
            }
        }
    }
    if content.turn_complete == Some(true) {
        debug!("Upstream reported the turn complete.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_events(rx: &mut mpsc::Receiver<BridgeEvent>) -> Vec<BridgeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn parses_setup_complete_marker() {
        let msg = parse_server_message(r#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.setup_complete.is_some());
        assert!(msg.server_content.is_none());
    }

    #[test]
    fn parses_server_content_shapes() {
        let raw = r#"{
            "serverContent": {
                "interrupted": true,
                "inputTranscription": {"text": "hello"},
                "modelTurn": {"parts": [
                    {"text": "hi there"},
                    {"inlineData": {"data": "AAAA"}}
                ]}
            }
        }"#;
        let msg = parse_server_message(raw).unwrap();
        let content = msg.server_content.unwrap();
        assert_eq!(content.interrupted, Some(true));
        assert_eq!(content.input_transcription.unwrap().text, "hello");
        let parts = content.model_turn.unwrap().parts;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].text.as_deref(), Some("hi there"));
        assert!(parts[1].inline_data.is_some());
    }

    #[test]
    fn unparseable_frames_are_skipped() {
        assert!(parse_server_message("not json").is_none());
    }

    #[test]
    fn setup_frame_wire_shape() {
        let setup =
            live_api::ClientMessage::Setup(live_api::BidiGenerateContentSetup {
                model: "models/test".to_string(),
                generation_config: live_api::GenerationConfig {
                    response_modalities: vec![live_api::ResponseModality::Audio],
                },
                system_instruction: live_api::Content {
                    role: "system".to_string(),
                    parts: vec![live_api::Part {
                        text: "be brief".to_string(),
                    }],
                },
                input_audio_transcription: live_api::AudioTranscriptionConfig {},
                output_audio_transcription: live_api::AudioTranscriptionConfig {},
            });
        let json = serde_json::to_value(&setup).unwrap();
        assert_eq!(json["setup"]["model"], "models/test");
        assert_eq!(
            json["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            json["setup"]["systemInstruction"]["parts"][0]["text"],
            "be brief"
        );
        assert!(json["setup"]["inputAudioTranscription"].is_object());
        assert!(json["setup"]["outputAudioTranscription"].is_object());
    }

    #[tokio::test]
    async fn content_processing_accumulates_and_forwards() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut turns = TurnLog::new();

        let raw = r#"{
            "serverContent": {
                "outputTranscription": {"text": "Tides come from gravity."},
                "modelTurn": {"parts": [{"inlineData": {"data": "AAAA"}}]}
            }
        }"#;
        let content = parse_server_message(raw).unwrap().server_content.unwrap();
        process_server_content(content, &tx, &mut turns, "greeting").await;

        assert_eq!(turns.len(), 1);
        assert_eq!(turns.turns()[0].role, TurnRole::Assistant);

        let events = drain_events(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], BridgeEvent::AssistantMessage(_)));
        assert!(matches!(events[1], BridgeEvent::Audio(_)));
    }

    #[tokio::test]
    async fn greeting_echo_is_dropped_from_input_transcription() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut turns = TurnLog::new();
        let greeting = "Please greet me.";

        let echo = live_api::LiveServerContent {
            input_transcription: Some(live_api::Transcription {
                text: format!("  {greeting} "),
            }),
            ..Default::default()
        };
        process_server_content(echo, &tx, &mut turns, greeting).await;
        assert!(turns.is_empty());
        assert!(drain_events(&mut rx).is_empty());

        let genuine = live_api::LiveServerContent {
            input_transcription: Some(live_api::Transcription {
                text: "What causes tides?".to_string(),
            }),
            ..Default::default()
        };
        process_server_content(genuine, &tx, &mut turns, greeting).await;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns.turns()[0].role, TurnRole::User);
        assert!(matches!(
            drain_events(&mut rx).as_slice(),
            [BridgeEvent::Transcription(_)]
        ));
    }

    #[tokio::test]
    async fn duplicate_transcripts_coalesce_but_still_forward() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut turns = TurnLog::new();

        for _ in 0..2 {
            let content = live_api::LiveServerContent {
                output_transcription: Some(live_api::Transcription {
                    text: "Same line.".to_string(),
                }),
                ..Default::default()
            };
            process_server_content(content, &tx, &mut turns, "greeting").await;
        }

        assert_eq!(turns.len(), 1);
        assert_eq!(drain_events(&mut rx).len(), 2);
    }

    #[tokio::test]
    async fn interrupted_flag_forwards_immediately() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut turns = TurnLog::new();

        let content = live_api::LiveServerContent {
            interrupted: Some(true),
            ..Default::default()
        };
        process_server_content(content, &tx, &mut turns, "greeting").await;

        assert!(matches!(
            drain_events(&mut rx).as_slice(),
            [BridgeEvent::Interrupted]
        ));
        assert!(turns.is_empty());
    }
}
