//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, the WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ConversationListResponse, ConversationStatusResponse, ConversationSummary, ErrorResponse,
        SessionStatus, StartConversationPayload,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::start_conversation,
        handlers::stop_conversation,
        handlers::conversation_status,
        handlers::list_conversations,
    ),
    components(
        schemas(
            StartConversationPayload,
            ConversationSummary,
            ConversationStatusResponse,
            ConversationListResponse,
            ErrorResponse,
            SessionStatus
        )
    ),
    tags(
        (name = "Sage API", description = "Session management for the sage voice tutor")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/conversation/start", post(handlers::start_conversation))
        .route(
            "/conversation/{id}/stop",
            post(handlers::stop_conversation),
        )
        .route(
            "/conversation/{id}/status",
            get(handlers::conversation_status),
        )
        .route("/conversations", get(handlers::list_conversations))
        .route("/ws", get(ws_handler))
        .with_state(app_state);

    // Merge the stateful routes with the stateless Swagger UI.
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
