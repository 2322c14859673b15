//! Session store persisted as a single JSON snapshot on disk.

use anyhow::Context;
use async_trait::async_trait;
use interview_core::session::{
    InterviewConfig, InterviewSession, Role, SessionUpdate, TranscriptEntry,
};
use interview_core::store::{MemoryStore, SessionStore, StoreError, StoreSnapshot};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const STORE_FILE: &str = "store.json";

/// Keeps the working set in a [`MemoryStore`] and rewrites the snapshot file after
/// every mutation. Writes go to a temporary file first and are renamed into place,
/// so a crash never leaves a half-written store behind. A mutation whose write
/// fails is undone in memory as well.
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub async fn open(dir: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
        let path = dir.join(STORE_FILE);

        let snapshot = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str::<StoreSnapshot>(&raw)
                .with_context(|| format!("Corrupt store file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreSnapshot::default(),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        tracing::info!(
            "Opened store at {} ({} users, {} sessions)",
            path.display(),
            snapshot.users.len(),
            snapshot.sessions.len()
        );

        Ok(Self {
            path,
            inner: MemoryStore::from_snapshot(snapshot),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn register_user(&self, user_id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let before = self.inner.snapshot().await;
        self.inner.register_user(user_id).await;
        self.persist_or_rollback(before).await
    }

    /// Every stored session, oldest first.
    pub async fn sessions(&self) -> Vec<InterviewSession> {
        let mut sessions: Vec<InterviewSession> = self
            .inner
            .snapshot()
            .await
            .sessions
            .into_values()
            .map(|stored| stored.session)
            .collect();
        sessions.sort_by_key(|session| session.created_at);
        sessions
    }

    async fn persist_or_rollback(&self, before: StoreSnapshot) -> Result<(), StoreError> {
        if let Err(e) = self.persist().await {
            tracing::error!("Store write failed, discarding the change: {}", e);
            self.inner.restore(before).await;
            return Err(e);
        }
        Ok(())
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let snapshot = self.inner.snapshot().await;
        let raw = serde_json::to_string_pretty(&snapshot).context("Failed to serialize store")?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn create_session(
        &self,
        user_id: &str,
        config: &InterviewConfig,
    ) -> Result<InterviewSession, StoreError> {
        let _guard = self.write_lock.lock().await;
        let before = self.inner.snapshot().await;
        let session = self.inner.create_session(user_id, config).await?;
        self.persist_or_rollback(before).await?;
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<InterviewSession, StoreError> {
        self.inner.get_session(session_id).await
    }

    async fn append_entry(
        &self,
        session_id: &str,
        role: Role,
        message: &str,
    ) -> Result<TranscriptEntry, StoreError> {
        let _guard = self.write_lock.lock().await;
        let before = self.inner.snapshot().await;
        let entry = self.inner.append_entry(session_id, role, message).await?;
        self.persist_or_rollback(before).await?;
        Ok(entry)
    }

    async fn read_transcript(&self, session_id: &str) -> Result<Vec<TranscriptEntry>, StoreError> {
        self.inner.read_transcript(session_id).await
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<InterviewSession, StoreError> {
        let _guard = self.write_lock.lock().await;
        let before = self.inner.snapshot().await;
        let session = self.inner.update_session(session_id, update).await?;
        self.persist_or_rollback(before).await?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interview_core::session::{InterviewCategory, SessionStatus};

    fn config() -> InterviewConfig {
        InterviewConfig {
            category: InterviewCategory::Behavioral,
            company_name: None,
            job_role: "Designer".to_string(),
            experience_level: "junior".to_string(),
            duration_secs: 900,
            focus_topics: None,
            resume_summary: None,
        }
    }

    #[tokio::test]
    async fn test_sessions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        store.register_user("dana").await.unwrap();
        let session = store.create_session("dana", &config()).await.unwrap();
        store
            .append_entry(&session.id, Role::Interviewer, "Hi there")
            .await
            .unwrap();
        store
            .append_entry(&session.id, Role::Candidate, "Hello — ready ✓")
            .await
            .unwrap();
        store
            .update_session(
                &session.id,
                SessionUpdate {
                    status: Some(SessionStatus::Completed),
                    score: Some(77),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        drop(store);

        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        let restored = reopened.get_session(&session.id).await.unwrap();
        assert_eq!(restored.status, SessionStatus::Completed);
        assert_eq!(restored.score, Some(77));

        let transcript = reopened.read_transcript(&session.id).await.unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].message, "Hello — ready ✓");
        assert_eq!(reopened.sessions().await.len(), 1);
        assert!(!dir.path().join("store.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_unknown_user_cannot_create_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let err = store.create_session("ghost", &config()).await.unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound(_)));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        store.register_user("dana").await.unwrap();
        let session = store.create_session("dana", &config()).await.unwrap();
        store
            .append_entry(&session.id, Role::Interviewer, "Tell me about a project.")
            .await
            .unwrap();

        // A directory where the temporary file goes makes every write fail.
        let tmp = dir.path().join("store.json.tmp");
        std::fs::create_dir(&tmp).unwrap();
        let err = store
            .append_entry(&session.id, Role::Candidate, "I built a scheduler.")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(store.read_transcript(&session.id).await.unwrap().len(), 1);
        assert!(store.create_session("dana", &config()).await.is_err());
        assert_eq!(store.sessions().await.len(), 1);

        // The retried append is recorded exactly once.
        std::fs::remove_dir(&tmp).unwrap();
        store
            .append_entry(&session.id, Role::Candidate, "I built a scheduler.")
            .await
            .unwrap();
        drop(store);

        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        let transcript = reopened.read_transcript(&session.id).await.unwrap();
        let candidate = transcript
            .iter()
            .filter(|e| e.role == Role::Candidate)
            .count();
        assert_eq!(candidate, 1);
        assert_eq!(transcript.len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STORE_FILE), "{ not json").unwrap();
        assert!(JsonFileStore::open(dir.path()).await.is_err());
    }
}
