//! Normalizes raw model completions into the signals the session engine acts on.

use crate::llm::Completion;
use regex::Regex;
use std::sync::LazyLock;

/// Score used when a free-text evaluation carries no `N/100` marker.
pub const DEFAULT_EXTRACTED_SCORE: u8 = 75;

/// Phrases the interviewer uses to close an interview. Matched case-insensitively.
pub const COMPLETION_PHRASES: [&str; 2] = ["that concludes our interview", "thank you for your time today"];

static REASONING_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("valid reasoning pattern"));

static SCORE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,3})\s*/\s*100\b").expect("valid score pattern"));

/// A completion split into what the candidate sees and what the model reasoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedResponse {
    pub message: String,
    pub reasoning: Option<String>,
    pub is_complete: bool,
}

/// Returns the reasoning carried inside `<think>` blocks, if any.
pub fn extract_reasoning(raw: &str) -> Option<String> {
    let blocks: Vec<&str> = REASONING_BLOCK
        .captures_iter(raw)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|block| !block.is_empty())
        .collect();
    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n\n"))
    }
}

/// The raw text with every reasoning block removed.
pub fn visible_message(raw: &str) -> String {
    REASONING_BLOCK.replace_all(raw, "").trim().to_string()
}

/// Heuristic closing-phrase check. Kept in one place so a structured completion flag
/// can replace it later.
pub fn contains_completion_phrase(message: &str) -> bool {
    let lowered = message.to_lowercase();
    COMPLETION_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase))
}

/// First `N/100` score in the text, capped at 100, or the default when absent.
pub fn extract_score(text: &str) -> u8 {
    SCORE_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
        .map(|score| score.min(100) as u8)
        .unwrap_or(DEFAULT_EXTRACTED_SCORE)
}

#[derive(Debug, Clone, Default)]
pub struct ResponsePostProcessor;

impl ResponsePostProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Whether the interview is over after this reply: either the question budget is
    /// spent or the interviewer used a closing phrase.
    pub fn is_complete(&self, current_question: u32, total_questions: u32, message: &str) -> bool {
        current_question >= total_questions || contains_completion_phrase(message)
    }

    pub fn process(
        &self,
        completion: &Completion,
        current_question: u32,
        total_questions: u32,
    ) -> ProcessedResponse {
        let message = visible_message(&completion.text);
        let reasoning = completion
            .reasoning
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .or_else(|| extract_reasoning(&completion.text));
        let is_complete = self.is_complete(current_question, total_questions, &message);
        ProcessedResponse {
            message,
            reasoning,
            is_complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(text: &str) -> Completion {
        Completion {
            text: text.to_string(),
            reasoning: None,
        }
    }

    #[test]
    fn test_reasoning_is_split_from_message() {
        let raw = "<think>\n  The candidate seems unsure.  \n</think>\nCan you give an example?";
        assert_eq!(extract_reasoning(raw).as_deref(), Some("The candidate seems unsure."));
        assert_eq!(visible_message(raw), "Can you give an example?");
    }

    #[test]
    fn test_every_reasoning_block_is_removed() {
        let raw = "<think>a</think>First. <think>b</think>Second.";
        assert_eq!(visible_message(raw), "First. Second.");
        assert_eq!(extract_reasoning(raw).as_deref(), Some("a\n\nb"));
    }

    #[test]
    fn test_no_reasoning_block() {
        assert_eq!(extract_reasoning("Plain reply."), None);
        assert_eq!(visible_message("  Plain reply.  "), "Plain reply.");
    }

    #[test]
    fn test_separate_reasoning_field_wins() {
        let processor = ResponsePostProcessor::new();
        let out = processor.process(
            &Completion {
                text: "<think>inline</think>Next question.".to_string(),
                reasoning: Some(" field ".to_string()),
            },
            1,
            5,
        );
        assert_eq!(out.reasoning.as_deref(), Some("field"));
        assert_eq!(out.message, "Next question.");
    }

    #[test]
    fn test_score_extraction() {
        assert_eq!(extract_score("Overall I'd rate this 87/100, well done."), 87);
        assert_eq!(extract_score("Score: 92 / 100"), 92);
        assert_eq!(extract_score("No score was given."), DEFAULT_EXTRACTED_SCORE);
        assert_eq!(extract_score("An impossible 250/100"), 100);
        assert_eq!(extract_score("See ticket 1087/100 for details."), DEFAULT_EXTRACTED_SCORE);
        assert_eq!(extract_score("Ticket 1087/100, final score 64/100."), 64);
    }

    #[test]
    fn test_completion_by_question_budget() {
        let processor = ResponsePostProcessor::new();
        let out = processor.process(&completion("Tell me about indexing."), 5, 5);
        assert!(out.is_complete);
    }

    #[test]
    fn test_completion_by_phrase_before_budget() {
        let processor = ResponsePostProcessor::new();
        let out = processor.process(
            &completion("Great answer. That Concludes Our Interview for today."),
            2,
            8,
        );
        assert!(out.is_complete);

        let out = processor.process(&completion("Great answer. Next up: caching."), 2, 8);
        assert!(!out.is_complete);
    }

    #[test]
    fn test_phrase_inside_reasoning_does_not_complete() {
        let processor = ResponsePostProcessor::new();
        let out = processor.process(
            &completion("<think>Not yet time to say thank you for your time today.</think>Go on."),
            1,
            5,
        );
        assert!(!out.is_complete);
    }
}
