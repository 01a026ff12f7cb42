//! Defines the WebSocket control-message protocol between client and server.
//!
//! Control messages are JSON text frames; binary frames on the same socket
//! carry raw PCM audio with no envelope. The message kinds are closed sum
//! types so that adding one is a compile-time-checked change everywhere it
//! is dispatched.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Control messages sent from the client to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Requests a bridge for a previously announced session.
    StartSession { session_id: Uuid },
    /// Ends the active bridge gracefully.
    Stop { session_id: Uuid },
    /// Liveness probe; answered with `pong` in any non-closed state.
    Ping { session_id: Uuid },
}

/// Control messages sent from the server to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The upstream handshake finished; the session is live.
    SessionStarted { session_id: Uuid },
    /// Acknowledges `stop`, or reports that the upstream ended the session.
    Stopped { session_id: Uuid },
    Pong { session_id: Uuid },
    /// Transcribed user speech.
    Transcription { session_id: Uuid, text: String },
    /// Assistant utterance text.
    AssistantMessage { session_id: Uuid, text: String },
    /// The user's speech interrupted the assistant mid-response (barge-in).
    Interrupted { session_id: Uuid },
    /// A recoverable protocol error. Never closes the connection.
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<Uuid>,
        code: ErrorCode,
        message: String,
    },
}

/// The closed set of recoverable errors reported as `error` frames.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    SessionNotFound,
    Forbidden,
    AlreadyActive,
    QuotaExceeded,
    InvalidMessage,
    UpstreamUnavailable,
}
