//! HTTP surface over the session store and the chat-turn handler.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use interview_core::chat::{ChatBackend, ChatError, ChatTurnRequest, ChatTurnResponse};
use interview_core::session::{
    ConfigError, InterviewCategory, InterviewConfig, InterviewSession, Role, SessionStatus,
    SessionUpdate, TranscriptEntry,
};
use interview_core::store::{SessionStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Header carrying the authenticated caller.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub chat: Arc<dyn ChatBackend>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(get_session).patch(update_session))
        .route(
            "/api/sessions/{id}/transcript",
            get(read_transcript).post(append_entry),
        )
        .route("/api/interview/chat", post(submit_chat_turn))
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing x-user-id header")]
    MissingIdentity,
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
    #[error("Message must not be empty")]
    EmptyMessage,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Chat(#[from] ChatError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::MissingIdentity => (StatusCode::UNAUTHORIZED, "missing_identity"),
            ApiError::InvalidConfig(_) => (StatusCode::BAD_REQUEST, "invalid_config"),
            ApiError::EmptyMessage => (StatusCode::BAD_REQUEST, "empty_message"),
            ApiError::Store(e) | ApiError::Chat(ChatError::Store(e)) => match e {
                StoreError::UserNotFound(_) => (StatusCode::FORBIDDEN, "unknown_user"),
                StoreError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "unknown_session"),
                StoreError::Backend(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
            },
            ApiError::Chat(_) => (StatusCode::BAD_GATEWAY, "model_unavailable"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }
        let body = ErrorBody {
            error: self.to_string(),
            code,
        };
        (status, Json(body)).into_response()
    }
}

/// Session draft as submitted by a client. `difficulty` is accepted as an alias
/// for the experience level.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub category: InterviewCategory,
    #[serde(alias = "difficulty")]
    pub experience_level: String,
    #[serde(default)]
    pub company_name: Option<String>,
    pub job_role: String,
    pub duration_secs: u64,
    #[serde(default)]
    pub focus_topics: Option<String>,
    #[serde(default)]
    pub resume_summary: Option<String>,
}

impl From<CreateSessionRequest> for InterviewConfig {
    fn from(request: CreateSessionRequest) -> Self {
        InterviewConfig {
            category: request.category,
            company_name: request.company_name,
            job_role: request.job_role,
            experience_level: request.experience_level,
            duration_secs: request.duration_secs,
            focus_topics: request.focus_topics,
            resume_summary: request.resume_summary,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub config: InterviewConfig,
    pub status: SessionStatus,
}

#[derive(Debug, Deserialize)]
pub struct AppendEntryRequest {
    pub role: Role,
    pub message: String,
}

fn caller(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .ok_or(ApiError::MissingIdentity)
}

pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let user_id = caller(&headers)?;
    let config = InterviewConfig::from(request);
    config.validate()?;

    let session = state.store.create_session(user_id, &config).await?;
    tracing::info!("Created session {} for {}", session.id, user_id);
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id,
            config: session.config,
            status: session.status,
        }),
    ))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InterviewSession>, ApiError> {
    Ok(Json(state.store.get_session(&id).await?))
}

pub async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<SessionUpdate>,
) -> Result<Json<InterviewSession>, ApiError> {
    let session = state.store.update_session(&id, update).await?;
    tracing::debug!("Updated session {}: {:?}", id, session.status);
    Ok(Json(session))
}

pub async fn append_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AppendEntryRequest>,
) -> Result<(StatusCode, Json<TranscriptEntry>), ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::EmptyMessage);
    }
    let entry = state
        .store
        .append_entry(&id, request.role, &request.message)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn read_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TranscriptEntry>>, ApiError> {
    Ok(Json(state.store.read_transcript(&id).await?))
}

pub async fn submit_chat_turn(
    State(state): State<AppState>,
    Json(request): Json<ChatTurnRequest>,
) -> Result<Json<ChatTurnResponse>, ApiError> {
    if !request.is_timeout && request.message.trim().is_empty() {
        return Err(ApiError::EmptyMessage);
    }
    tracing::debug!(
        "Chat turn for session {} at question {}",
        request.session_id,
        request.current_question
    );
    Ok(Json(state.chat.submit_chat_turn(request).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use interview_core::chat::ChatTurnHandler;
    use interview_core::context_window::ConversationTurn;
    use interview_core::llm::{Completion, LanguageModel};
    use interview_core::store::MemoryStore;
    use std::sync::Mutex;

    struct CannedModel {
        replies: Mutex<Vec<anyhow::Result<String>>>,
    }

    impl CannedModel {
        fn new(replies: Vec<anyhow::Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn complete(&self, _turns: &[ConversationTurn]) -> anyhow::Result<Completion> {
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no reply left")))?;
            Ok(Completion {
                text: reply,
                reasoning: None,
            })
        }
    }

    async fn state(replies: Vec<anyhow::Result<String>>) -> AppState {
        let store = Arc::new(MemoryStore::new());
        store.register_user("alice").await;
        let chat = Arc::new(ChatTurnHandler::new(
            store.clone(),
            Arc::new(CannedModel::new(replies)),
        ));
        AppState { store, chat }
    }

    fn as_user(user: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_str(user).unwrap());
        headers
    }

    fn draft() -> CreateSessionRequest {
        serde_json::from_value(serde_json::json!({
            "category": "behavioral",
            "difficulty": "senior",
            "jobRole": "Engineering Manager",
            "durationSecs": 1800,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_session_echoes_config() {
        let state = state(Vec::new()).await;
        let (status, Json(created)) = create_session(State(state.clone()), as_user("alice"), Json(draft()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.status, SessionStatus::InProgress);
        assert_eq!(created.config.experience_level, "senior");
        assert_eq!(created.config.category, InterviewCategory::Behavioral);

        let Json(session) = get_session(State(state), Path(created.session_id.clone()))
            .await
            .unwrap();
        assert_eq!(session.current_question, 1);
    }

    #[tokio::test]
    async fn test_create_session_identity_errors_are_distinct() {
        let state = state(Vec::new()).await;
        let err = create_session(State(state.clone()), as_user("mallory"), Json(draft()))
            .await
            .unwrap_err();
        assert_eq!(err.status_and_code(), (StatusCode::FORBIDDEN, "unknown_user"));

        let err = create_session(State(state), HeaderMap::new(), Json(draft()))
            .await
            .unwrap_err();
        assert_eq!(err.status_and_code().0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_draft_is_rejected() {
        let state = state(Vec::new()).await;
        let mut request = draft();
        request.duration_secs = 0;
        let err = create_session(State(state), as_user("alice"), Json(request))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidConfig(ConfigError::InvalidDuration)));
    }

    #[tokio::test]
    async fn test_transcript_append_and_read() {
        let state = state(Vec::new()).await;
        let (_, Json(created)) = create_session(State(state.clone()), as_user("alice"), Json(draft()))
            .await
            .unwrap();
        let id = created.session_id;

        for (role, message) in [(Role::Interviewer, "Welcome!"), (Role::Candidate, "Thanks ✓")] {
            let (status, Json(entry)) = append_entry(
                State(state.clone()),
                Path(id.clone()),
                Json(AppendEntryRequest {
                    role,
                    message: message.to_string(),
                }),
            )
            .await
            .unwrap();
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(entry.message, message);
        }

        let Json(entries) = read_transcript(State(state.clone()), Path(id)).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::Interviewer);
        assert_eq!(entries[1].message, "Thanks ✓");

        let err = read_transcript(State(state), Path("missing".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status_and_code(), (StatusCode::NOT_FOUND, "unknown_session"));
    }

    #[tokio::test]
    async fn test_patch_applies_partial_update() {
        let state = state(Vec::new()).await;
        let (_, Json(created)) = create_session(State(state.clone()), as_user("alice"), Json(draft()))
            .await
            .unwrap();
        let update: SessionUpdate =
            serde_json::from_value(serde_json::json!({ "score": 91, "status": "completed" }))
                .unwrap();
        let Json(session) = update_session(State(state), Path(created.session_id), Json(update))
            .await
            .unwrap();
        assert_eq!(session.score, Some(91));
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.current_question, 1);
    }

    #[tokio::test]
    async fn test_chat_turn_round_trip() {
        let state = state(vec![Ok("<think>probe depth</think>Tell me about a conflict you resolved.".to_string())]).await;
        let (_, Json(created)) = create_session(State(state.clone()), as_user("alice"), Json(draft()))
            .await
            .unwrap();
        let request: ChatTurnRequest = serde_json::from_value(serde_json::json!({
            "sessionId": created.session_id,
            "message": "I led a team of five.",
            "currentQuestion": 1,
            "category": "behavioral",
            "experienceLevel": "senior",
        }))
        .unwrap();

        let Json(response) = submit_chat_turn(State(state), Json(request)).await.unwrap();
        assert_eq!(response.message, "Tell me about a conflict you resolved.");
        assert_eq!(response.reasoning.as_deref(), Some("probe depth"));
        assert!(response.advance_question);
        assert!(!response.is_complete);
    }

    #[tokio::test]
    async fn test_chat_backend_failure_is_bad_gateway() {
        let state = state(vec![Err(anyhow::anyhow!("upstream 503"))]).await;
        let (_, Json(created)) = create_session(State(state.clone()), as_user("alice"), Json(draft()))
            .await
            .unwrap();
        let request: ChatTurnRequest = serde_json::from_value(serde_json::json!({
            "sessionId": created.session_id,
            "message": "Hello",
            "currentQuestion": 1,
            "category": "behavioral",
        }))
        .unwrap();

        let err = submit_chat_turn(State(state), Json(request)).await.unwrap_err();
        assert_eq!(err.status_and_code(), (StatusCode::BAD_GATEWAY, "model_unavailable"));
    }
}
