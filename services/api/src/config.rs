use interview_core::llm::LlmConfig;
use secrecy::{ExposeSecret, SecretString};
use std::net::SocketAddr;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: SecretString,
    pub llm_base_url: String,
    pub chat_model: String,
    /// Users registered with the store at startup.
    pub known_users: Vec<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// This function will look for a `.env` file in the current directory
    /// and load the following variables:
    ///
    /// *   `BIND_ADDRESS`: The address and port to bind the server to. Defaults to "0.0.0.0:3000".
    /// *   `OPENAI_API_KEY`: Secret key for the OpenAI-compatible API. Required.
    /// *   `LLM_BASE_URL`: (Optional) API base URL. Defaults to "https://api.openai.com/v1".
    /// *   `CHAT_MODEL`: (Optional) The interviewer model. Defaults to "gpt-4o".
    /// *   `KNOWN_USERS`: (Optional) Comma separated user ids allowed to create sessions.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_address_str = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = lookup("OPENAI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let known_users = lookup("KNOWN_USERS")
            .map(|users| {
                users
                    .split(',')
                    .map(str::trim)
                    .filter(|user| !user.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            bind_address,
            openai_api_key,
            llm_base_url: lookup("LLM_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            chat_model: lookup("CHAT_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            known_users,
        })
    }

    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig::builder()
            .with_base_url(&self.llm_base_url)
            .with_api_key(SecretString::from(self.openai_api_key.expose_secret().to_string()))
            .with_model(&self.chat_model)
            .build()
    }
}
