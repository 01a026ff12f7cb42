//! Post-session study-note composition.
//!
//! After a voice bridge tears down, the accumulated transcript can be turned
//! into a study note attached to the topic the student was working on. The
//! note store is an external collaborator; composition itself uses the chat
//! model. Both legs are best-effort and the caller swallows failures.

use crate::auth::Identity;
use crate::conversation::ConversationTurn;
use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

#[async_trait]
pub trait NoteComposer: Send + Sync {
    /// Turns an accumulated transcript into a persisted study note.
    ///
    /// Idempotent in practice: an implementation first checks whether a note
    /// already exists for the topic and no-ops if so.
    async fn compose(
        &self,
        identity: &Identity,
        turns: &[ConversationTurn],
        topic_id: Option<Uuid>,
        course_id: Option<Uuid>,
    ) -> Result<()>;
}

/// Composes notes with the chat model and stores them in the study service.
pub struct LLMNoteComposer {
    llm: Client<OpenAIConfig>,
    model: String,
    http: reqwest::Client,
    study_base_url: String,
}

impl LLMNoteComposer {
    pub fn new(
        config: OpenAIConfig,
        model: String,
        http: reqwest::Client,
        study_base_url: impl Into<String>,
    ) -> Self {
        Self {
            llm: Client::with_config(config),
            model,
            http,
            study_base_url: study_base_url.into(),
        }
    }

    fn note_url(&self, topic_id: Uuid) -> String {
        format!("{}/v1/topics/{}/note", self.study_base_url, topic_id)
    }
}

const COMPOSE_SYSTEM_PROMPT: &str = "You turn a spoken tutoring conversation into a concise \
study note. Summarize the concepts the student worked through, what they understood, and \
what still needs review. Write in plain prose under 250 words.";

#[async_trait]
impl NoteComposer for LLMNoteComposer {
    async fn compose(
        &self,
        identity: &Identity,
        turns: &[ConversationTurn],
        topic_id: Option<Uuid>,
        course_id: Option<Uuid>,
    ) -> Result<()> {
        let Some(topic_id) = topic_id else {
            // Nothing to attach a note to.
            return Ok(());
        };

        let existing = self
            .http
            .get(self.note_url(topic_id))
            .query(&[("user_id", identity.user_id.as_str())])
            .send()
            .await?;
        if existing.status().is_success() {
            info!(%topic_id, "A study note already exists for this topic; skipping.");
            return Ok(());
        }
        if existing.status() != reqwest::StatusCode::NOT_FOUND {
            existing.error_for_status()?;
        }

        let transcript = turns
            .iter()
            .map(|turn| format!("{}: {}", turn.role, turn.text))
            .collect::<Vec<_>>()
            .join("\n");

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(COMPOSE_SYSTEM_PROMPT)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(transcript)
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.llm.chat().create(request).await?;
        let note = response
            .choices
            .first()
            .context("No response choice from the chat model")?
            .message
            .content
            .as_ref()
            .context("No content in the chat model response")?;

        self.http
            .post(self.note_url(topic_id))
            .json(&json!({
                "user_id": identity.user_id,
                "course_id": course_id,
                "content": note,
            }))
            .send()
            .await?
            .error_for_status()?;

        info!(%topic_id, "Stored a new study note for the session.");
        Ok(())
    }
}
