//! Shared Application State
//!
//! This module defines the `AppState` struct holding the injected
//! collaborators and the session registry. Everything is behind an `Arc` so
//! handlers and bridge tasks share one instance.

use crate::{config::Config, registry::SessionRegistry};
use sage_core::{auth::TokenVerifier, composer::NoteComposer, quota::QuotaGuard};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all
/// handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub quota: Arc<dyn QuotaGuard>,
    pub composer: Arc<dyn NoteComposer>,
    pub config: Arc<Config>,
}
