//! The "submit chat turn" contract and its in-process implementation.

use crate::context_window::{ConversationWindowBuilder, PromptContext};
use crate::feedback::{Evaluation, FeedbackSynthesizer};
use crate::llm::LanguageModel;
use crate::post_process::ResponsePostProcessor;
use crate::session::{InterviewCategory, InterviewConfig, Role, TranscriptEntry};
use crate::store::{SessionStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Payload sent in place of a candidate message when the countdown expires.
pub const TIMEOUT_SENTINEL: &str = "__INTERVIEW_TIME_UP__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnRequest {
    pub session_id: String,
    pub message: String,
    pub current_question: u32,
    pub category: InterviewCategory,
    #[serde(default)]
    pub resume_context: Option<String>,
    #[serde(default)]
    pub job_role: Option<String>,
    #[serde(default)]
    pub experience_level: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub specific_topics: Option<String>,
    #[serde(default, alias = "isTimeoutSentinel")]
    pub is_timeout: bool,
}

impl ChatTurnRequest {
    /// A normal candidate turn for a session configured with `config`.
    pub fn candidate(session_id: &str, config: &InterviewConfig, current_question: u32, message: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            message: message.to_string(),
            current_question,
            category: config.category,
            resume_context: config.resume_summary.clone(),
            job_role: Some(config.job_role.clone()),
            experience_level: Some(config.experience_level.clone()),
            company_name: config.company_name.clone(),
            specific_topics: config.focus_topics.clone(),
            is_timeout: false,
        }
    }

    /// The terminal turn issued when time runs out.
    pub fn timeout(session_id: &str, config: &InterviewConfig, current_question: u32) -> Self {
        Self {
            is_timeout: true,
            ..Self::candidate(session_id, config, current_question, TIMEOUT_SENTINEL)
        }
    }

    fn prompt_context(&self) -> PromptContext {
        PromptContext {
            category: self.category,
            job_role: self.job_role.clone(),
            experience_level: self.experience_level.clone(),
            company_name: self.company_name.clone(),
            focus_topics: self.specific_topics.clone(),
            resume_summary: self.resume_context.clone(),
            current_question: self.current_question,
        }
    }

    fn evaluation_config(&self) -> InterviewConfig {
        InterviewConfig {
            category: self.category,
            company_name: self.company_name.clone(),
            job_role: self.job_role.clone().unwrap_or_else(|| "software".to_string()),
            experience_level: self.experience_level.clone().unwrap_or_default(),
            duration_secs: 0,
            focus_topics: self.specific_topics.clone(),
            resume_summary: self.resume_context.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub advance_question: bool,
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Evaluation>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Language model call failed: {0:#}")]
    Backend(#[source] anyhow::Error),
    #[error("Language model returned an empty reply")]
    EmptyReply,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Anything that can answer a chat turn: the in-process handler, or a remote service.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn submit_chat_turn(&self, request: ChatTurnRequest) -> Result<ChatTurnResponse, ChatError>;
}

pub struct ChatTurnHandler {
    store: Arc<dyn SessionStore>,
    model: Arc<dyn LanguageModel>,
    window: ConversationWindowBuilder,
    post: ResponsePostProcessor,
    synthesizer: FeedbackSynthesizer,
}

impl ChatTurnHandler {
    pub fn new(store: Arc<dyn SessionStore>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            store,
            synthesizer: FeedbackSynthesizer::new(model.clone()),
            model,
            window: ConversationWindowBuilder::new(),
            post: ResponsePostProcessor::new(),
        }
    }

    async fn timeout_turn(&self, request: &ChatTurnRequest) -> Result<ChatTurnResponse, ChatError> {
        let transcript = self.store.read_transcript(&request.session_id).await?;
        let evaluation = self.synthesizer.evaluate_on_timeout(&transcript).await;
        Ok(ChatTurnResponse {
            message: evaluation.feedback.clone(),
            reasoning: None,
            advance_question: false,
            is_complete: true,
            feedback: Some(evaluation),
        })
    }
}

#[async_trait]
impl ChatBackend for ChatTurnHandler {
    async fn submit_chat_turn(&self, request: ChatTurnRequest) -> Result<ChatTurnResponse, ChatError> {
        if request.is_timeout {
            tracing::info!("Session {} timed out; requesting holistic evaluation", request.session_id);
            return self.timeout_turn(&request).await;
        }

        let mut transcript = self.store.read_transcript(&request.session_id).await?;

        // The caller may not have persisted the candidate message yet; the prompt
        // must still end with it.
        let already_persisted = transcript
            .last()
            .is_some_and(|e| e.role == Role::Candidate && e.message == request.message);
        if !already_persisted {
            transcript.push(ephemeral_entry(&request.session_id, Role::Candidate, &request.message, transcript.len()));
        }

        let ctx = request.prompt_context();
        let total = ctx.total_questions();
        let turns = self.window.build(&transcript, &ctx);

        let completion = self.model.complete(&turns).await.map_err(ChatError::Backend)?;
        let processed = self.post.process(&completion, request.current_question, total);
        if processed.message.is_empty() {
            return Err(ChatError::EmptyReply);
        }

        let advance_question = !processed.is_complete && request.current_question < total;
        tracing::info!(
            "Session {} question {}/{}: complete={}, advance={}",
            request.session_id,
            request.current_question,
            total,
            processed.is_complete,
            advance_question
        );

        let feedback = if processed.is_complete {
            transcript.push(ephemeral_entry(&request.session_id, Role::Interviewer, &processed.message, transcript.len()));
            self.synthesizer
                .evaluate(&request.evaluation_config(), &transcript)
                .await
        } else {
            None
        };

        Ok(ChatTurnResponse {
            message: processed.message,
            reasoning: processed.reasoning,
            advance_question,
            is_complete: processed.is_complete,
            feedback,
        })
    }
}

fn ephemeral_entry(session_id: &str, role: Role, message: &str, sequence: usize) -> TranscriptEntry {
    TranscriptEntry {
        session_id: session_id.to_string(),
        sequence: sequence as u64,
        role,
        message: message.to_string(),
        created_at: Utc::now(),
    }
}
