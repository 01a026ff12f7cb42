//! API Models
//!
//! Request and response bodies for the REST surface, doubling as the schema
//! source for the generated OpenAPI documentation.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Ended => write!(f, "ended"),
        }
    }
}

/// Body of `POST /conversation/start`. Everything is optional; correlation
/// ids only matter to the collaborators that persist conversation artifacts.
#[derive(Debug, Deserialize, ToSchema)]
pub struct StartConversationPayload {
    #[schema(example = "You are a patient physics tutor.")]
    pub system_instruction: Option<String>,
    pub course_id: Option<Uuid>,
    pub topic_id: Option<Uuid>,
    pub chat_session_id: Option<Uuid>,
    pub study_session_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ConversationSummary {
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    #[schema(value_type = String, example = "active")]
    pub status: SessionStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConversationStatusResponse {
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    #[schema(value_type = String, example = "active")]
    pub status: SessionStatus,
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConversationListResponse {
    pub sessions: Vec<ConversationSummary>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
