//! Sage API Library Crate
//!
//! This library contains all the core logic for the sage voice web service:
//! configuration, the ephemeral session registry, the REST handlers, the
//! WebSocket bridge, and routing. The `api` binary is a thin wrapper around
//! this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod registry;
pub mod router;
pub mod state;
pub mod ws;
