use crate::context_window::ConversationTurn;
use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

/// Upper bound on one completion request, connect through body.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: Option<String>,
    /// Some OpenAI-compatible providers return chain-of-thought in a separate field.
    #[serde(default, alias = "reasoning")]
    pub reasoning_content: Option<String>,
}

/// A raw completion: the text plus any reasoning the provider returned out of band.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Completion {
    pub text: String,
    pub reasoning: Option<String>,
}

// The `LanguageModel` trait is the only way the session engine talks to a model.
// Callers must treat it as unreliable: transport errors, non-success statuses and
// malformed bodies all surface as `Err` and are handled where the call is made.
// `#[cfg_attr(test, automock)]` generates `MockLanguageModel` for unit tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, turns: &[ConversationTurn]) -> Result<Completion>;
}

/// Settings for an OpenAI-compatible chat completions endpoint.
pub struct LlmConfig {
    base_url: String,
    api_key: SecretString,
    model: String,
    temperature: f32,
    request_timeout: Duration,
}

pub struct LlmConfigBuilder {
    config: LlmConfig,
}

impl LlmConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LlmConfig::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.config.api_key = api_key;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn build(self) -> LlmConfig {
        self.config
    }
}

impl Default for LlmConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmConfig {
    pub fn new() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: SecretString::from(String::new()),
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn builder() -> LlmConfigBuilder {
        LlmConfigBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ChatCompletionsClient {
    client: Client,
    config: LlmConfig,
}

impl ChatCompletionsClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with a timeout: {}", e);
                Client::new()
            });
        Self { client, config }
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    async fn complete(&self, turns: &[ConversationTurn]) -> Result<Completion> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": turns,
            "temperature": self.config.temperature,
        });

        let url = format!("{}/chat/completions", self.config.base_url);
        tracing::debug!("Requesting completion from {} with {} turns", url, turns.len());

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("Language model request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Language model returned {status}: {}",
                detail.chars().take(200).collect::<String>()
            ));
        }

        let resp = response
            .json::<LlmResponse>()
            .await
            .context("Failed to decode language model response")?;

        let message = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?
            .message;

        Ok(Completion {
            text: message.content.unwrap_or_default(),
            reasoning: message.reasoning_content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_builder_overrides_defaults() {
        let config = LlmConfig::builder()
            .with_base_url("http://localhost:11434/v1/")
            .with_model("llama3")
            .with_api_key(SecretString::from("sk-test".to_string()))
            .with_request_timeout(Duration::from_secs(5))
            .build();
        assert_eq!(config.base_url(), "http://localhost:11434/v1");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(LlmConfig::new().request_timeout(), DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.model(), "llama3");
        assert_eq!(config.api_key().expose_secret(), "sk-test");
    }

    #[test]
    fn test_response_with_reasoning_field_decodes() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"Hi","reasoning_content":"thinking"}}]}"#;
        let resp: LlmResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("Hi"));
        assert_eq!(resp.choices[0].message.reasoning_content.as_deref(), Some("thinking"));
    }

    // This is an integration test that makes a live call to the OpenAI API.
    // It is ignored by default; run it with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_live_completion() {
        dotenvy::dotenv_override().ok();
        let api_key = env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set");
        let client = ChatCompletionsClient::new(
            LlmConfig::builder()
                .with_api_key(SecretString::from(api_key))
                .build(),
        );

        let turns = vec![ConversationTurn::user("Reply with the single word: ready")];
        let completion = client.complete(&turns).await.expect("completion failed");
        assert!(!completion.text.trim().is_empty());
    }
}
