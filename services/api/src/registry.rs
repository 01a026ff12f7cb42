//! Ephemeral Session Registry
//!
//! Voice sessions live only in this process's memory: they are announced by
//! the REST surface, consumed by the WebSocket bridge, and vanish on process
//! restart. The registry is an explicit injected object rather than ambient
//! global state, so handlers can be exercised against their own instance.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Fallback steering text for sessions announced without an instruction.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a friendly voice study companion. \
Keep replies short and conversational, and help the student reason aloud about their topic.";

/// Everything the bridge needs to know about one announced voice session.
///
/// A session id maps to at most one owner and the record is immutable except
/// for deletion.
#[derive(Debug, Clone)]
pub struct VoiceSession {
    pub id: Uuid,
    pub user_id: String,
    pub system_instruction: String,
    pub course_id: Option<Uuid>,
    pub topic_id: Option<Uuid>,
    pub chat_session_id: Option<Uuid>,
    pub study_session_id: Option<Uuid>,
    /// Monotonic creation timestamp, for diagnostics only.
    pub created_at: Instant,
    last_activity: Instant,
}

/// Optional fields accepted when announcing a new session.
#[derive(Debug, Default, Clone)]
pub struct NewSession {
    pub system_instruction: Option<String>,
    pub course_id: Option<Uuid>,
    pub topic_id: Option<Uuid>,
    pub chat_session_id: Option<Uuid>,
    pub study_session_id: Option<Uuid>,
}

/// In-memory session store shared by every connection.
///
/// One mutex serializes all access. The registry promises mutual exclusion,
/// not FIFO fairness across connections.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, VoiceSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new session under a freshly generated id and returns it.
    ///
    /// Duplicate concurrent sessions for the same user are permitted; the
    /// generated id is the only uniqueness constraint.
    pub fn create(&self, user_id: &str, options: NewSession) -> VoiceSession {
        let now = Instant::now();
        let session = VoiceSession {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            system_instruction: options
                .system_instruction
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            course_id: options.course_id,
            topic_id: options.topic_id,
            chat_session_id: options.chat_session_id,
            study_session_id: options.study_session_id,
            created_at: now,
            last_activity: now,
        };
        self.sessions.lock().insert(session.id, session.clone());
        session
    }

    pub fn get(&self, id: Uuid) -> Option<VoiceSession> {
        self.sessions.lock().get(&id).cloned()
    }

    /// Removes a session. Deleting an unknown id is a no-op.
    pub fn delete(&self, id: Uuid) {
        self.sessions.lock().remove(&id);
    }

    pub fn list_for_user(&self, user_id: &str) -> Vec<Uuid> {
        self.sessions
            .lock()
            .values()
            .filter(|session| session.user_id == user_id)
            .map(|session| session.id)
            .collect()
    }

    /// Marks a session as recently used so the idle sweeper leaves it alone.
    pub fn touch(&self, id: Uuid) {
        if let Some(session) = self.sessions.lock().get_mut(&id) {
            session.last_activity = Instant::now();
        }
    }

    /// Removes sessions that have been idle longer than `ttl` and returns
    /// how many were reclaimed. Sessions announced over REST but never
    /// bridged are the expected victims.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.last_activity.elapsed() < ttl);
        before - sessions.len()
    }

    /// Rewinds a session's activity clock so eviction can be tested without
    /// sleeping.
    #[cfg(test)]
    fn backdate(&self, id: Uuid, age: Duration) {
        if let Some(session) = self.sessions.lock().get_mut(&id) {
            session.last_activity = Instant::now() - age;
        }
    }
}
