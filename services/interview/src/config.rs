//! Application Configuration Module
//!
//! This module centralizes the configuration for the interview service.
//! It loads settings from environment variables and provides a single
//! struct that is handed to the clients at startup.

use interview_core::llm::LlmConfig;
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::path::PathBuf;
use tracing::Level;

// --- Application Constants ---

/// The size of each audio chunk delivered by the microphone input stream.
pub const INPUT_CHUNK_SIZE: usize = 1024;
/// The size of each audio chunk for the audio output stream.
pub const OUTPUT_CHUNK_SIZE: usize = 1024;
/// The latency for the output audio buffer in milliseconds.
pub const OUTPUT_LATENCY_MS: usize = 1000;

/// Holds all configuration loaded from the environment.
#[derive(Debug)]
pub struct Config {
    pub openai_api_key: SecretString,
    pub llm_base_url: String,
    pub chat_model: String,
    pub transcription_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub data_dir: PathBuf,
    pub user_id: String,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `OPENAI_API_KEY`: Secret key for the OpenAI-compatible API. Required.
    // *   `LLM_BASE_URL`: (Optional) API base URL. Defaults to "https://api.openai.com/v1".
    // *   `CHAT_MODEL`: (Optional) The interviewer model. Defaults to "gpt-4o".
    // *   `TRANSCRIPTION_MODEL` / `TTS_MODEL` / `TTS_VOICE`: (Optional) speech models and voice.
    // *   `INTERVIEW_DATA_DIR`: (Optional) Where sessions are stored. Defaults to ".interview".
    // *   `INTERVIEW_USER`: (Optional) The local user id. Defaults to "local".
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let openai_api_key = lookup("OPENAI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        // Configure logging level from RUST_LOG, with a sensible default.
        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            openai_api_key,
            llm_base_url: var_or("LLM_BASE_URL", "https://api.openai.com/v1"),
            chat_model: var_or("CHAT_MODEL", "gpt-4o"),
            transcription_model: var_or("TRANSCRIPTION_MODEL", "whisper-1"),
            tts_model: var_or("TTS_MODEL", "tts-1"),
            tts_voice: var_or("TTS_VOICE", "alloy"),
            data_dir: PathBuf::from(var_or("INTERVIEW_DATA_DIR", ".interview")),
            user_id: var_or("INTERVIEW_USER", "local"),
            log_level,
        })
    }

    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig::builder()
            .with_base_url(&self.llm_base_url)
            .with_api_key(self.api_key())
            .with_model(&self.chat_model)
            .build()
    }

    /// An owned copy of the API key for another client.
    pub fn api_key(&self) -> SecretString {
        SecretString::from(self.openai_api_key.expose_secret().to_string())
    }
}
