//! Persistence and identity contracts consumed by the engine, plus an in-memory store.

use crate::session::{InterviewConfig, InterviewSession, Role, SessionUpdate, TranscriptEntry};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("User '{0}' was not found")]
    UserNotFound(String),
    #[error("Session '{0}' was not found")]
    SessionNotFound(String),
    #[error("Storage failure: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Session and transcript storage. Transcript writes are append-only.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates an in-progress session owned by `user_id`. Fails with
    /// `StoreError::UserNotFound` when the user is unknown to the store.
    async fn create_session(
        &self,
        user_id: &str,
        config: &InterviewConfig,
    ) -> Result<InterviewSession, StoreError>;

    async fn get_session(&self, session_id: &str) -> Result<InterviewSession, StoreError>;

    async fn append_entry(
        &self,
        session_id: &str,
        role: Role,
        message: &str,
    ) -> Result<TranscriptEntry, StoreError>;

    /// All entries of a session, oldest first.
    async fn read_transcript(&self, session_id: &str) -> Result<Vec<TranscriptEntry>, StoreError>;

    async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<InterviewSession, StoreError>;
}

/// The authenticated user on whose behalf sessions are created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user(&self) -> Result<UserIdentity, StoreError>;
}

/// Identity fixed at construction, e.g. from configuration or a request header.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    user_id: String,
}

impl StaticIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> Result<UserIdentity, StoreError> {
        Ok(UserIdentity {
            user_id: self.user_id.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub session: InterviewSession,
    #[serde(default)]
    pub transcript: Vec<TranscriptEntry>,
}

/// Full contents of a store, used to persist and restore it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    #[serde(default)]
    pub users: BTreeSet<String>,
    #[serde(default)]
    pub sessions: BTreeMap<String, StoredSession>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
        }
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.state.lock().await.clone()
    }

    /// Replaces the whole state, e.g. to undo a change that could not be persisted.
    pub async fn restore(&self, snapshot: StoreSnapshot) {
        *self.state.lock().await = snapshot;
    }

    pub async fn register_user(&self, user_id: &str) {
        self.state.lock().await.users.insert(user_id.to_string());
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(
        &self,
        user_id: &str,
        config: &InterviewConfig,
    ) -> Result<InterviewSession, StoreError> {
        let mut state = self.state.lock().await;
        if !state.users.contains(user_id) {
            return Err(StoreError::UserNotFound(user_id.to_string()));
        }
        let session = InterviewSession::new(
            uuid::Uuid::new_v4().to_string(),
            user_id.to_string(),
            config.clone(),
        );
        state.sessions.insert(
            session.id.clone(),
            StoredSession {
                session: session.clone(),
                transcript: Vec::new(),
            },
        );
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<InterviewSession, StoreError> {
        let state = self.state.lock().await;
        state
            .sessions
            .get(session_id)
            .map(|stored| stored.session.clone())
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))
    }

    async fn append_entry(
        &self,
        session_id: &str,
        role: Role,
        message: &str,
    ) -> Result<TranscriptEntry, StoreError> {
        let mut state = self.state.lock().await;
        let stored = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        let entry = TranscriptEntry {
            session_id: session_id.to_string(),
            sequence: stored.transcript.len() as u64,
            role,
            message: message.to_string(),
            created_at: Utc::now(),
        };
        stored.transcript.push(entry.clone());
        Ok(entry)
    }

    async fn read_transcript(&self, session_id: &str) -> Result<Vec<TranscriptEntry>, StoreError> {
        let state = self.state.lock().await;
        state
            .sessions
            .get(session_id)
            .map(|stored| stored.transcript.clone())
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<InterviewSession, StoreError> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(session_id)
            .map(|stored| &mut stored.session)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        session.apply(&update);
        Ok(session.clone())
    }
}
