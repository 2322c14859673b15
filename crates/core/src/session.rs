use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of interview being run. The first four variants carry their own greeting
/// and instruction templates; anything else is treated as `General`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InterviewCategory {
    Technical,
    Behavioral,
    SystemDesign,
    CompanySpecific,
    General,
}

impl InterviewCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewCategory::Technical => "technical",
            InterviewCategory::Behavioral => "behavioral",
            InterviewCategory::SystemDesign => "system-design",
            InterviewCategory::CompanySpecific => "company-specific",
            InterviewCategory::General => "general",
        }
    }

    /// Lenient parse: separators and case are ignored, unknown labels map to `General`.
    pub fn parse(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "technical" | "coding" => InterviewCategory::Technical,
            "behavioral" | "behavioural" | "hr" => InterviewCategory::Behavioral,
            "systemdesign" => InterviewCategory::SystemDesign,
            "companyspecific" | "company" => InterviewCategory::CompanySpecific,
            _ => InterviewCategory::General,
        }
    }
}

impl From<String> for InterviewCategory {
    fn from(value: String) -> Self {
        InterviewCategory::parse(&value)
    }
}

impl From<InterviewCategory> for String {
    fn from(value: InterviewCategory) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for InterviewCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Interviewer,
    Candidate,
}

/// Failures raised while validating a draft configuration, before any session exists.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Interview duration must be greater than zero seconds")]
    InvalidDuration,
}

/// Draft configuration held while the candidate is still configuring the interview.
/// It becomes immutable once the session is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewConfig {
    pub category: InterviewCategory,
    #[serde(default)]
    pub company_name: Option<String>,
    pub job_role: String,
    pub experience_level: String,
    pub duration_secs: u64,
    #[serde(default)]
    pub focus_topics: Option<String>,
    #[serde(default)]
    pub resume_summary: Option<String>,
}

impl InterviewConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job_role.trim().is_empty() {
            return Err(ConfigError::MissingField("job_role"));
        }
        if self.experience_level.trim().is_empty() {
            return Err(ConfigError::MissingField("experience_level"));
        }
        if self.duration_secs == 0 {
            return Err(ConfigError::InvalidDuration);
        }
        Ok(())
    }

    /// Company name with blank values treated as absent.
    pub fn company(&self) -> Option<&str> {
        non_blank(self.company_name.as_deref())
    }

    pub fn focus(&self) -> Option<&str> {
        non_blank(self.focus_topics.as_deref())
    }

    pub fn resume(&self) -> Option<&str> {
        non_blank(self.resume_summary.as_deref())
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewSession {
    pub id: String,
    pub user_id: String,
    pub config: InterviewConfig,
    pub status: SessionStatus,
    pub current_question: u32,
    pub elapsed_secs: u64,
    pub score: Option<u8>,
    pub strengths: Option<Vec<String>>,
    pub improvements: Option<Vec<String>>,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl InterviewSession {
    pub fn new(id: String, user_id: String, config: InterviewConfig) -> Self {
        Self {
            id,
            user_id,
            config,
            status: SessionStatus::InProgress,
            current_question: 1,
            elapsed_secs: 0,
            score: None,
            strengths: None,
            improvements: None,
            feedback: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == SessionStatus::InProgress
    }

    /// Applies a partial update; omitted fields are left untouched.
    pub fn apply(&mut self, update: &SessionUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(question) = update.current_question {
            self.current_question = question;
        }
        if let Some(elapsed) = update.elapsed_secs {
            self.elapsed_secs = elapsed;
        }
        if let Some(score) = update.score {
            self.score = Some(score);
        }
        if let Some(feedback) = &update.feedback {
            self.feedback = Some(feedback.clone());
        }
        if let Some(strengths) = &update.strengths {
            self.strengths = Some(strengths.clone());
        }
        if let Some(improvements) = &update.improvements {
            self.improvements = Some(improvements.clone());
        }
        if let Some(completed_at) = update.completed_at {
            self.completed_at = Some(completed_at);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub session_id: String,
    /// Position within the session, assigned by the store starting at 0.
    pub sequence: u64,
    pub role: Role,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Partial session update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_question: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strengths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improvements: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> InterviewConfig {
        InterviewConfig {
            category: InterviewCategory::Technical,
            company_name: None,
            job_role: "Backend Engineer".to_string(),
            experience_level: "entry".to_string(),
            duration_secs: 600,
            focus_topics: None,
            resume_summary: None,
        }
    }

    #[test]
    fn test_category_parse_is_lenient() {
        assert_eq!(InterviewCategory::parse("System Design"), InterviewCategory::SystemDesign);
        assert_eq!(InterviewCategory::parse("company_specific"), InterviewCategory::CompanySpecific);
        assert_eq!(InterviewCategory::parse("BEHAVIORAL"), InterviewCategory::Behavioral);
        assert_eq!(InterviewCategory::parse("pair-programming"), InterviewCategory::General);
    }

    #[test]
    fn test_category_serializes_as_label() {
        let json = serde_json::to_string(&InterviewCategory::SystemDesign).unwrap();
        assert_eq!(json, "\"system-design\"");
        let parsed: InterviewCategory = serde_json::from_str("\"whatever\"").unwrap();
        assert_eq!(parsed, InterviewCategory::General);
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut config = sample_config();
        config.job_role = "  ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::MissingField("job_role")));

        let mut config = sample_config();
        config.experience_level.clear();
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingField("experience_level"))
        );

        let mut config = sample_config();
        config.duration_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidDuration));

        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_apply_leaves_omitted_fields_untouched() {
        let mut session =
            InterviewSession::new("s1".to_string(), "u1".to_string(), sample_config());
        session.apply(&SessionUpdate {
            score: Some(88),
            ..Default::default()
        });
        assert_eq!(session.score, Some(88));
        assert_eq!(session.status, SessionStatus::InProgress);
        assert_eq!(session.current_question, 1);
        assert!(session.feedback.is_none());

        session.apply(&SessionUpdate {
            status: Some(SessionStatus::Completed),
            feedback: Some("Solid".to_string()),
            ..Default::default()
        });
        assert_eq!(session.score, Some(88));
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.feedback.as_deref(), Some("Solid"));
    }
}
