use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Spoken prompt injected right after the upstream handshake so the
/// assistant greets the student before any audio arrives.
pub const DEFAULT_GREETING_PROMPT: &str =
    "Please greet me briefly and invite me to start talking about today's topic.";

const DEFAULT_LIVE_API_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Holds all configuration loaded from the environment at startup.
///
/// Nothing here is mutable at runtime; the bridge and handlers read through
/// a shared `Arc<Config>`.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub live_api_url: String,
    pub gemini_api_key: String,
    pub voice_model: String,
    pub chat_model: String,
    pub greeting_prompt: String,
    pub auth_service_url: String,
    pub quota_service_url: String,
    pub study_service_url: String,
    pub handshake_timeout: Duration,
    pub voice_session_cost: u32,
    pub session_idle_ttl: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let live_api_url =
            std::env::var("LIVE_API_URL").unwrap_or_else(|_| DEFAULT_LIVE_API_URL.to_string());

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let voice_model = std::env::var("VOICE_MODEL")
            .unwrap_or_else(|_| "models/gemini-2.0-flash-exp".to_string());
        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());

        let greeting_prompt = std::env::var("GREETING_PROMPT")
            .unwrap_or_else(|_| DEFAULT_GREETING_PROMPT.to_string());

        let auth_service_url = std::env::var("AUTH_SERVICE_URL")
            .map_err(|_| ConfigError::MissingVar("AUTH_SERVICE_URL".to_string()))?;
        let quota_service_url = std::env::var("QUOTA_SERVICE_URL")
            .map_err(|_| ConfigError::MissingVar("QUOTA_SERVICE_URL".to_string()))?;
        let study_service_url = std::env::var("STUDY_SERVICE_URL")
            .map_err(|_| ConfigError::MissingVar("STUDY_SERVICE_URL".to_string()))?;

        let handshake_timeout = parse_secs("HANDSHAKE_TIMEOUT_SECS", 10)?;
        let session_idle_ttl = parse_secs("SESSION_IDLE_TTL_SECS", 900)?;

        let voice_session_cost = match std::env::var("VOICE_SESSION_COST") {
            Ok(raw) => raw.parse::<u32>().map_err(|e| {
                ConfigError::InvalidValue("VOICE_SESSION_COST".to_string(), e.to_string())
            })?,
            Err(_) => 5,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            live_api_url,
            gemini_api_key,
            voice_model,
            chat_model,
            greeting_prompt,
            auth_service_url,
            quota_service_url,
            study_service_url,
            handshake_timeout,
            voice_session_cost,
            session_idle_ttl,
            log_level,
        })
    }
}

fn parse_secs(var: &str, default: u64) -> Result<Duration, ConfigError> {
    let secs = match std::env::var(var) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string()))?,
        Err(_) => default,
    };
    Ok(Duration::from_secs(secs))
}
