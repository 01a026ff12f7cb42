//! Axum Handlers for the REST API
//!
//! Session management only: announcing, stopping, and inspecting voice
//! sessions. Every route authenticates the bearer credential and checks
//! session ownership before touching the registry.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use sage_core::auth::{AuthError, Identity};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::{
    models::{
        ConversationListResponse, ConversationStatusResponse, ConversationSummary, ErrorResponse,
        SessionStatus, StartConversationPayload,
    },
    registry::NewSession,
    state::AppState,
};

pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Forbidden(message) => {
                (StatusCode::FORBIDDEN, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Resolves the bearer credential in `Authorization` to an identity.
pub(crate) async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Identity, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("A bearer credential is required".to_string()))?;

    match state.verifier.verify(token).await {
        Ok(identity) => Ok(identity),
        Err(AuthError::InvalidToken) => {
            Err(ApiError::Unauthorized("Invalid credential".to_string()))
        }
        Err(err @ AuthError::Unavailable(_)) => Err(ApiError::InternalServerError(err.into())),
    }
}

/// Announce a new voice conversation session.
#[utoipa::path(
    post,
    path = "/conversation/start",
    request_body = StartConversationPayload,
    responses(
        (status = 201, description = "Session announced", body = ConversationSummary),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("Authorization" = String, Header, description = "Bearer credential of the caller")
    )
)]
pub async fn start_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<StartConversationPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&state, &headers).await?;

    let session = state.registry.create(
        &identity.user_id,
        NewSession {
            system_instruction: payload.system_instruction,
            course_id: payload.course_id,
            topic_id: payload.topic_id,
            chat_session_id: payload.chat_session_id,
            study_session_id: payload.study_session_id,
        },
    );

    Ok((
        StatusCode::CREATED,
        Json(ConversationSummary {
            session_id: session.id,
            status: SessionStatus::Active,
        }),
    ))
}

/// Stop and discard a voice conversation session.
#[utoipa::path(
    post,
    path = "/conversation/{id}/stop",
    responses(
        (status = 200, description = "Session ended", body = ConversationSummary),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse),
        (status = 403, description = "Session owned by another user", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("Authorization" = String, Header, description = "Bearer credential of the caller")
    )
)]
pub async fn stop_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let session = lookup_owned(&state, id, &identity)?;

    state.registry.delete(session.id);
    Ok(Json(ConversationSummary {
        session_id: session.id,
        status: SessionStatus::Ended,
    }))
}

/// Get the status of a voice conversation session.
#[utoipa::path(
    get,
    path = "/conversation/{id}/status",
    responses(
        (status = 200, description = "Session status", body = ConversationStatusResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse),
        (status = 403, description = "Session owned by another user", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("Authorization" = String, Header, description = "Bearer credential of the caller")
    )
)]
pub async fn conversation_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let session = lookup_owned(&state, id, &identity)?;

    state.registry.touch(session.id);
    Ok(Json(ConversationStatusResponse {
        session_id: session.id,
        status: SessionStatus::Active,
        user_id: session.user_id,
    }))
}

/// List the caller's announced sessions.
#[utoipa::path(
    get,
    path = "/conversations",
    responses(
        (status = 200, description = "Sessions for the caller", body = ConversationListResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse)
    ),
    params(
        ("Authorization" = String, Header, description = "Bearer credential of the caller")
    )
)]
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ConversationListResponse>, ApiError> {
    let identity = authenticate(&state, &headers).await?;

    let sessions = state
        .registry
        .list_for_user(&identity.user_id)
        .into_iter()
        .map(|session_id| ConversationSummary {
            session_id,
            status: SessionStatus::Active,
        })
        .collect();

    Ok(Json(ConversationListResponse { sessions }))
}

fn lookup_owned(
    state: &AppState,
    id: Uuid,
    identity: &Identity,
) -> Result<crate::registry::VoiceSession, ApiError> {
    let session = state
        .registry
        .get(id)
        .ok_or_else(|| ApiError::NotFound(format!("Session with id '{}' not found", id)))?;

    if session.user_id != identity.user_id {
        return Err(ApiError::Forbidden(
            "Session belongs to another user".to_string(),
        ));
    }
    Ok(session)
}
