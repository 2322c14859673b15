//! Drives one interview end to end: greeting, candidate turns, countdown and completion.
//!
//! The orchestrator is the only writer of the session's mutable fields. It never
//! performs side effects itself beyond calling its collaborators; everything the
//! runtime should show or say is emitted as a [`Command`].

use crate::Command;
use crate::chat::{ChatBackend, ChatTurnRequest};
use crate::feedback::Evaluation;
use crate::greeting::opening_greeting;
use crate::session::{
    ConfigError, InterviewConfig, InterviewSession, Role, SessionStatus, SessionUpdate,
    TranscriptEntry,
};
use crate::store::{IdentityProvider, SessionStore, StoreError};
use crate::tier::total_questions;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Interviewer entry appended when the countdown reaches the configured duration.
pub const TIME_UP_MESSAGE: &str =
    "Time's up! That's the end of our interview. Let me put together your feedback.";

/// Longest the time's-up evaluation may take before the fallback is used.
pub const TIMEOUT_EVALUATION_LIMIT: Duration = Duration::from_secs(30);

pub const CONNECTION_NOTICE: &str =
    "Connection issue: the interviewer could not respond. Please try sending your answer again.";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid interview configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("User '{0}' is not registered. Register the account before starting an interview.")]
    UnknownUser(String),
    #[error("The interview is no longer in progress")]
    NotInProgress,
    #[error("Cannot submit an empty answer")]
    EmptyTurn,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened as a result of a candidate turn or the countdown.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Continued {
        message: String,
        reasoning: Option<String>,
        question: u32,
    },
    Completed {
        message: String,
        evaluation: Option<Evaluation>,
    },
    /// The backend call failed; nothing was recorded and the candidate may retry.
    ConnectionIssue { notice: String },
}

pub struct InterviewOrchestrator {
    session: InterviewSession,
    total_questions: u32,
    store: Arc<dyn SessionStore>,
    chat: Arc<dyn ChatBackend>,
    commands: mpsc::Sender<Command>,
    auto_speak: bool,
    timeout_fired: bool,
}

impl InterviewOrchestrator {
    /// Validates the draft configuration, creates the session for the current user
    /// and seeds the transcript with the opening greeting.
    pub async fn start(
        config: InterviewConfig,
        identity: &dyn IdentityProvider,
        store: Arc<dyn SessionStore>,
        chat: Arc<dyn ChatBackend>,
        commands: mpsc::Sender<Command>,
        auto_speak: bool,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let user = identity.current_user().await?;

        let session = store
            .create_session(&user.user_id, &config)
            .await
            .map_err(|e| match e {
                StoreError::UserNotFound(id) => SessionError::UnknownUser(id),
                other => SessionError::Store(other),
            })?;
        tracing::info!(
            "Created {} interview session {} for user {}",
            session.config.category,
            session.id,
            session.user_id
        );

        let mut orchestrator = Self {
            total_questions: total_questions(&session.config.experience_level),
            session,
            store,
            chat,
            commands,
            auto_speak,
            timeout_fired: false,
        };

        let greeting = opening_greeting(&orchestrator.session.config);
        orchestrator.record_interviewer(&greeting).await?;
        Ok(orchestrator)
    }

    /// Picks up a stored in-progress session, e.g. after the process restarted.
    pub async fn resume(
        session_id: &str,
        store: Arc<dyn SessionStore>,
        chat: Arc<dyn ChatBackend>,
        commands: mpsc::Sender<Command>,
        auto_speak: bool,
    ) -> Result<Self, SessionError> {
        let session = store.get_session(session_id).await?;
        if !session.is_in_progress() {
            return Err(SessionError::NotInProgress);
        }
        tracing::info!(
            "Resuming session {} at question {} ({}s elapsed)",
            session.id,
            session.current_question,
            session.elapsed_secs
        );
        Ok(Self {
            total_questions: total_questions(&session.config.experience_level),
            session,
            store,
            chat,
            commands,
            auto_speak,
            timeout_fired: false,
        })
    }

    pub fn session(&self) -> &InterviewSession {
        &self.session
    }

    pub fn total_questions(&self) -> u32 {
        self.total_questions
    }

    pub fn remaining_secs(&self) -> u64 {
        self.session
            .config
            .duration_secs
            .saturating_sub(self.session.elapsed_secs)
    }

    pub fn is_in_progress(&self) -> bool {
        self.session.is_in_progress()
    }

    pub fn set_auto_speak(&mut self, auto_speak: bool) {
        self.auto_speak = auto_speak;
    }

    /// Runs one candidate turn. State changes only after the backend call resolves,
    /// so a failed call leaves the transcript and question counter untouched.
    pub async fn submit_candidate_turn(&mut self, text: &str) -> Result<TurnOutcome, SessionError> {
        if !self.session.is_in_progress() {
            return Err(SessionError::NotInProgress);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyTurn);
        }

        let request = ChatTurnRequest::candidate(
            &self.session.id,
            &self.session.config,
            self.session.current_question,
            text,
        );
        let response = match self.chat.submit_chat_turn(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Chat turn failed for session {}: {}", self.session.id, e);
                self.emit(Command::Notice(CONNECTION_NOTICE.to_string())).await;
                return Ok(TurnOutcome::ConnectionIssue {
                    notice: CONNECTION_NOTICE.to_string(),
                });
            }
        };

        let candidate = self
            .store
            .append_entry(&self.session.id, Role::Candidate, text)
            .await?;
        self.emit(Command::Display(candidate)).await;
        self.record_interviewer(&response.message).await?;

        if let Some(reasoning) = &response.reasoning {
            tracing::debug!("Interviewer reasoning: {}", reasoning);
        }

        if response.is_complete {
            self.complete(response.feedback.as_ref()).await;
            return Ok(TurnOutcome::Completed {
                message: response.message,
                evaluation: response.feedback,
            });
        }

        if response.advance_question && self.session.current_question < self.total_questions {
            self.session.current_question += 1;
            self.persist_progress().await;
        }

        Ok(TurnOutcome::Continued {
            message: response.message,
            reasoning: response.reasoning,
            question: self.session.current_question,
        })
    }

    /// One second of countdown. Fires the timeout completion when the configured
    /// duration is reached.
    pub async fn tick(&mut self) -> Option<TurnOutcome> {
        if !self.session.is_in_progress() {
            return None;
        }
        self.session.elapsed_secs += 1;
        if self.session.elapsed_secs >= self.session.config.duration_secs {
            return self.expire().await;
        }
        None
    }

    /// Jumps the countdown to the configured duration and completes the session.
    /// Used when the deadline passes while a candidate turn is still pending.
    pub async fn run_out_clock(&mut self) -> Option<TurnOutcome> {
        if !self.session.is_in_progress() {
            return None;
        }
        self.session.elapsed_secs = self
            .session
            .elapsed_secs
            .max(self.session.config.duration_secs);
        self.expire().await
    }

    /// Forces completion because time ran out. Only the first call has any effect.
    pub async fn expire(&mut self) -> Option<TurnOutcome> {
        if self.timeout_fired || !self.session.is_in_progress() {
            return None;
        }
        self.timeout_fired = true;
        tracing::info!(
            "Session {} reached its {}s limit at question {}",
            self.session.id,
            self.session.config.duration_secs,
            self.session.current_question
        );

        if let Err(e) = self.record_interviewer(TIME_UP_MESSAGE).await {
            tracing::error!("Failed to record time's up entry: {}", e);
        }

        let request = ChatTurnRequest::timeout(
            &self.session.id,
            &self.session.config,
            self.session.current_question,
        );
        let evaluation = match tokio::time::timeout(
            TIMEOUT_EVALUATION_LIMIT,
            self.chat.submit_chat_turn(request),
        )
        .await
        {
            Ok(Ok(response)) => response
                .feedback
                .unwrap_or_else(Evaluation::timeout_fallback),
            Ok(Err(e)) => {
                tracing::error!("Timeout evaluation failed, using fallback: {}", e);
                Evaluation::timeout_fallback()
            }
            Err(_) => {
                tracing::error!(
                    "Timeout evaluation took longer than {:?}, using fallback",
                    TIMEOUT_EVALUATION_LIMIT
                );
                Evaluation::timeout_fallback()
            }
        };

        self.complete(Some(&evaluation)).await;
        Some(TurnOutcome::Completed {
            message: TIME_UP_MESSAGE.to_string(),
            evaluation: Some(evaluation),
        })
    }

    async fn record_interviewer(&mut self, message: &str) -> Result<TranscriptEntry, StoreError> {
        let entry = self
            .store
            .append_entry(&self.session.id, Role::Interviewer, message)
            .await?;
        self.emit(Command::Display(entry.clone())).await;
        if self.auto_speak {
            self.emit(Command::SpeakText(entry.message.clone())).await;
        }
        Ok(entry)
    }

    // The local transition always happens; a failed write is logged so the session
    // can never be left in progress.
    async fn complete(&mut self, evaluation: Option<&Evaluation>) {
        let mut update = SessionUpdate {
            status: Some(SessionStatus::Completed),
            current_question: Some(self.session.current_question),
            elapsed_secs: Some(self.session.elapsed_secs),
            completed_at: Some(Utc::now()),
            ..Default::default()
        };
        if let Some(evaluation) = evaluation {
            update.score = Some(evaluation.score);
            update.feedback = Some(evaluation.feedback.clone());
            update.strengths = non_empty(&evaluation.strengths);
            update.improvements = non_empty(&evaluation.improvements);
        } else {
            tracing::warn!("Session {} completed without an evaluation", self.session.id);
        }

        self.session.apply(&update);
        if let Err(e) = self.store.update_session(&self.session.id, update).await {
            tracing::error!("Failed to persist completion of {}: {}", self.session.id, e);
        }
        tracing::info!(
            "Session {} completed with score {:?}",
            self.session.id,
            self.session.score
        );
        self.emit(Command::SessionComplete(Box::new(self.session.clone())))
            .await;
    }

    async fn persist_progress(&self) {
        let update = SessionUpdate {
            current_question: Some(self.session.current_question),
            elapsed_secs: Some(self.session.elapsed_secs),
            ..Default::default()
        };
        if let Err(e) = self.store.update_session(&self.session.id, update).await {
            tracing::warn!("Failed to persist progress of {}: {}", self.session.id, e);
        }
    }

    async fn emit(&self, command: Command) {
        if let Err(e) = self.commands.send(command).await {
            tracing::warn!("Command receiver dropped: {:?}", e.0);
        }
    }
}

fn non_empty(items: &[String]) -> Option<Vec<String>> {
    if items.is_empty() {
        None
    } else {
        Some(items.to_vec())
    }
}
