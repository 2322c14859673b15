//! Builds the bounded prompt sent to the language model for each interviewer turn.

use crate::session::{InterviewCategory, InterviewConfig, Role, TranscriptEntry, non_blank};
use crate::tier::{ExperienceTier, total_questions};
use serde::{Deserialize, Serialize};

/// Maximum number of transcript entries carried into a prompt.
pub const CONTEXT_WINDOW_TURNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl From<Role> for ChatRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Interviewer => ChatRole::Assistant,
            Role::Candidate => ChatRole::User,
        }
    }
}

/// One role/content message of a prompt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&TranscriptEntry> for ConversationTurn {
    fn from(entry: &TranscriptEntry) -> Self {
        Self {
            role: entry.role.into(),
            content: entry.message.clone(),
        }
    }
}

/// Where the interview currently stands, by thirds of planned questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterviewStage {
    WarmUp,
    Escalate,
    Comprehensive,
}

impl InterviewStage {
    pub fn for_progress(current_question: u32, total_questions: u32) -> Self {
        let total = total_questions.max(1);
        if current_question * 3 <= total {
            InterviewStage::WarmUp
        } else if current_question * 3 <= total * 2 {
            InterviewStage::Escalate
        } else {
            InterviewStage::Comprehensive
        }
    }

    pub fn directive(&self) -> &'static str {
        match self {
            InterviewStage::WarmUp => {
                "Keep this question approachable to warm the candidate up and learn how they communicate."
            }
            InterviewStage::Escalate => {
                "Raise the difficulty: build on earlier answers and dig into depth, edge cases and trade-offs."
            }
            InterviewStage::Comprehensive => {
                "Ask a comprehensive question that ties together what was discussed, and start wrapping up once the last question is answered."
            }
        }
    }
}

/// Everything about the session that shapes the instruction block.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    pub category: InterviewCategory,
    pub job_role: Option<String>,
    pub experience_level: Option<String>,
    pub company_name: Option<String>,
    pub focus_topics: Option<String>,
    pub resume_summary: Option<String>,
    pub current_question: u32,
}

impl PromptContext {
    pub fn from_config(config: &InterviewConfig, current_question: u32) -> Self {
        Self {
            category: config.category,
            job_role: Some(config.job_role.clone()),
            experience_level: Some(config.experience_level.clone()),
            company_name: config.company_name.clone(),
            focus_topics: config.focus_topics.clone(),
            resume_summary: config.resume_summary.clone(),
            current_question,
        }
    }

    pub fn total_questions(&self) -> u32 {
        total_questions(self.experience_level.as_deref().unwrap_or_default())
    }
}

fn category_instructions(category: InterviewCategory, company: Option<&str>) -> String {
    match category {
        InterviewCategory::Behavioral => "You are an experienced hiring manager running a behavioral interview. \
             Ask one question at a time about past situations, probe for specifics using the STAR format, \
             and ask a follow-up when an answer is vague. Keep replies short and conversational."
            .to_string(),
        InterviewCategory::SystemDesign => "You are a staff engineer running a system design interview. \
             Present one design problem at a time, ask about requirements, components, data flow, scaling and failure handling, \
             and challenge weak trade-offs. Keep replies short and conversational."
            .to_string(),
        InterviewCategory::CompanySpecific => {
            let company = company.unwrap_or("the company");
            format!(
                "You are an interviewer at {company}. Run the interview the way {company} is known to, \
                 mixing technical depth with questions about culture fit and motivation for joining {company}. \
                 Ask one question at a time and keep replies short and conversational."
            )
        }
        InterviewCategory::Technical | InterviewCategory::General => "You are a senior software engineer running a technical interview. \
             Ask one question at a time, evaluate the candidate's reasoning, ask follow-ups when an answer is incomplete, \
             and never give away full solutions. Keep replies short and conversational."
            .to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct ConversationWindowBuilder {
    max_turns: usize,
}

impl Default for ConversationWindowBuilder {
    fn default() -> Self {
        Self {
            max_turns: CONTEXT_WINDOW_TURNS,
        }
    }
}

impl ConversationWindowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The instruction block, one directive per line in a fixed order.
    pub fn instructions(&self, ctx: &PromptContext) -> String {
        let mut lines = vec![category_instructions(
            ctx.category,
            non_blank(ctx.company_name.as_deref()),
        )];

        if let Some(role) = non_blank(ctx.job_role.as_deref()) {
            lines.push(format!("Job role: {role}."));
        }
        if let Some(level) = non_blank(ctx.experience_level.as_deref()) {
            match ExperienceTier::from_label(level) {
                Some(tier) => lines.push(format!("Experience level: {level}. {}", tier.guidance())),
                None => lines.push(format!("Experience level: {level}.")),
            }
        }
        if let Some(topics) = non_blank(ctx.focus_topics.as_deref()) {
            lines.push(format!("Focus topics: {topics}."));
        }
        if let Some(resume) = non_blank(ctx.resume_summary.as_deref()) {
            lines.push(format!("Candidate resume summary: {resume}"));
        }

        let total = ctx.total_questions();
        let stage = InterviewStage::for_progress(ctx.current_question, total);
        lines.push(format!(
            "Progress: this is question {} of {}. {}",
            ctx.current_question,
            total,
            stage.directive()
        ));

        lines.join("\n")
    }

    /// Projects the newest transcript entries into prompt turns, oldest first, with the
    /// bracketed instruction block prepended to the first user message.
    pub fn build(&self, transcript: &[TranscriptEntry], ctx: &PromptContext) -> Vec<ConversationTurn> {
        let start = transcript.len().saturating_sub(self.max_turns);
        let mut turns: Vec<ConversationTurn> =
            transcript[start..].iter().map(ConversationTurn::from).collect();

        let block = format!("[{}]", self.instructions(ctx));
        match turns.iter_mut().find(|turn| turn.role == ChatRole::User) {
            Some(first_user) => {
                first_user.content = format!("{block}\n\n{}", first_user.content);
            }
            None => {
                // No candidate message in range: the block becomes its own user turn.
                turns.insert(0, ConversationTurn::user(block));
                if turns.len() > self.max_turns {
                    let excess = turns.len() - self.max_turns;
                    turns.drain(1..=excess);
                }
            }
        }

        tracing::debug!(
            "Built context window with {} turns (transcript length {})",
            turns.len(),
            transcript.len()
        );
        turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(sequence: u64, role: Role, message: &str) -> TranscriptEntry {
        TranscriptEntry {
            session_id: "s1".to_string(),
            sequence,
            role,
            message: message.to_string(),
            created_at: Utc::now(),
        }
    }

    fn transcript(len: usize) -> Vec<TranscriptEntry> {
        (0..len)
            .map(|i| {
                let role = if i % 2 == 0 {
                    Role::Interviewer
                } else {
                    Role::Candidate
                };
                entry(i as u64, role, &format!("message {i}"))
            })
            .collect()
    }

    fn context() -> PromptContext {
        PromptContext {
            category: InterviewCategory::Technical,
            job_role: Some("Backend Engineer".to_string()),
            experience_level: Some("mid".to_string()),
            company_name: None,
            focus_topics: Some("databases".to_string()),
            resume_summary: None,
            current_question: 2,
        }
    }

    #[test]
    fn test_window_is_bounded_and_ends_with_latest_candidate() {
        let builder = ConversationWindowBuilder::new();
        for len in [2usize, 9, 10, 11, 12, 30, 101] {
            let mut entries = transcript(len);
            // Every window must end with a candidate message.
            if entries.last().map(|e| e.role) != Some(Role::Candidate) {
                let next = entries.len() as u64;
                entries.push(entry(next, Role::Candidate, "latest answer"));
            }
            let window = builder.build(&entries, &context());
            let last_entry = entries.last().unwrap();

            assert!(window.len() <= CONTEXT_WINDOW_TURNS, "len {len}");
            if entries.len() >= CONTEXT_WINDOW_TURNS {
                assert_eq!(window.len(), CONTEXT_WINDOW_TURNS);
            }
            let last = window.last().unwrap();
            assert_eq!(last.role, ChatRole::User);
            assert!(last.content.ends_with(&last_entry.message));
        }
    }

    #[test]
    fn test_interviewer_only_window_drops_oldest_entries() {
        let entries: Vec<TranscriptEntry> = (0..12)
            .map(|i| entry(i, Role::Interviewer, &format!("message {i}")))
            .collect();
        let window = ConversationWindowBuilder::new().build(&entries, &context());

        assert_eq!(window.len(), CONTEXT_WINDOW_TURNS);
        assert_eq!(window[0].role, ChatRole::User);
        assert!(window[0].content.starts_with('['));
        // The newest entry survives; the oldest in range is dropped.
        assert_eq!(window.last().unwrap().content, "message 11");
        assert_eq!(window[1].content, "message 3");
    }

    #[test]
    fn test_window_keeps_oldest_first_order_and_maps_roles() {
        let entries = transcript(14);
        let window = ConversationWindowBuilder::new().build(&entries, &context());

        // Entries 4..14 survive; entry 4 is an interviewer turn.
        assert_eq!(window[0].role, ChatRole::Assistant);
        assert_eq!(window[0].content, "message 4");
        assert_eq!(window[2].content, "message 6");
        assert_eq!(window[9].content, "message 13");
    }

    #[test]
    fn test_instructions_prepended_to_first_user_message_only() {
        let entries = transcript(4);
        let window = ConversationWindowBuilder::new().build(&entries, &context());

        assert_eq!(window[0].content, "message 0");
        assert!(window[1].content.starts_with("[You are a senior software engineer"));
        assert!(window[1].content.ends_with("]\n\nmessage 1"));
        assert_eq!(window[3].content, "message 3");
        assert!(window.iter().all(|turn| turn.role != ChatRole::System));
    }

    #[test]
    fn test_instruction_lines_follow_fixed_order() {
        let mut ctx = context();
        ctx.resume_summary = Some("Five years of Go".to_string());
        let text = ConversationWindowBuilder::new().instructions(&ctx);

        let role = text.find("Job role: Backend Engineer.").unwrap();
        let level = text.find("Experience level: mid.").unwrap();
        let topics = text.find("Focus topics: databases.").unwrap();
        let resume = text.find("Candidate resume summary: Five years of Go").unwrap();
        let progress = text.find("Progress: this is question 2 of 7.").unwrap();
        assert!(role < level && level < topics && topics < resume && resume < progress);
        assert!(text.contains(ExperienceTier::Mid.guidance()));
    }

    #[test]
    fn test_optional_lines_are_omitted() {
        let mut ctx = context();
        ctx.focus_topics = Some("   ".to_string());
        let text = ConversationWindowBuilder::new().instructions(&ctx);
        assert!(!text.contains("Focus topics"));
        assert!(!text.contains("resume summary"));
    }

    #[test]
    fn test_company_template_names_company() {
        let mut ctx = context();
        ctx.category = InterviewCategory::CompanySpecific;
        ctx.company_name = Some("Globex".to_string());
        let text = ConversationWindowBuilder::new().instructions(&ctx);
        assert!(text.starts_with("You are an interviewer at Globex."));
    }

    #[test]
    fn test_stage_by_thirds() {
        assert_eq!(InterviewStage::for_progress(1, 5), InterviewStage::WarmUp);
        assert_eq!(InterviewStage::for_progress(3, 5), InterviewStage::Escalate);
        assert_eq!(InterviewStage::for_progress(5, 5), InterviewStage::Comprehensive);
        assert_eq!(InterviewStage::for_progress(3, 10), InterviewStage::WarmUp);
        assert_eq!(InterviewStage::for_progress(6, 10), InterviewStage::Escalate);
        assert_eq!(InterviewStage::for_progress(10, 10), InterviewStage::Comprehensive);
    }
}
