//! Main Entrypoint for the Sage Voice API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Constructing the clients for the external collaborators (identity,
//!    quota, study-note composer).
//! 4. Constructing the session registry and its idle sweeper.
//! 5. Building the Axum router, applying middleware, and starting the web
//!    server with graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use sage_api::{config::Config, registry::SessionRegistry, router::create_router, state::AppState};
use sage_core::{auth::HttpTokenVerifier, composer::LLMNoteComposer, quota::HttpQuotaGuard};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Reclaims sessions that were announced over REST but never bridged.
fn spawn_idle_sweeper(registry: Arc<SessionRegistry>, ttl: Duration) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let evicted = registry.evict_idle(ttl);
            if evicted > 0 {
                info!(evicted, "Reclaimed idle voice sessions.");
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Collaborator Clients ---
    let http = reqwest::Client::new();
    let verifier = Arc::new(HttpTokenVerifier::new(
        http.clone(),
        config.auth_service_url.clone(),
    ));
    let quota = Arc::new(HttpQuotaGuard::new(
        http.clone(),
        config.quota_service_url.clone(),
    ));

    let llm_config = OpenAIConfig::new()
        .with_api_key(&config.gemini_api_key)
        .with_api_base("https://generativelanguage.googleapis.com/v1beta/openai");
    let composer = Arc::new(LLMNoteComposer::new(
        llm_config,
        config.chat_model.clone(),
        http,
        config.study_service_url.clone(),
    ));

    // --- 4. Session Registry ---
    let registry = Arc::new(SessionRegistry::new());
    spawn_idle_sweeper(registry.clone(), config.session_idle_ttl);

    let app_state = Arc::new(AppState {
        registry,
        verifier,
        quota,
        composer,
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        voice_model = %config.voice_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
