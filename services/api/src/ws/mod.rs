//! WebSocket Voice Bridge
//!
//! This module contains the real-time half of the service: one WebSocket
//! connection per client carries JSON control messages and raw PCM audio
//! frames, and an active session bridges that connection to the upstream
//! Live API. It is structured into submodules for clarity:
//!
//! - `protocol`: the JSON control-message format between client and server.
//! - `connection`: the per-connection lifecycle and protocol state machine.
//! - `bridge`: the duplex relay engine owning the upstream connection.

pub mod bridge;
pub mod connection;
pub mod protocol;

pub use connection::ws_handler;
