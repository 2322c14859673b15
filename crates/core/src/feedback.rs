//! End-of-session evaluation. Both paths degrade instead of failing: a normal
//! completion yields no evaluation when anything goes wrong, a timeout completion
//! falls back to a fixed score and message.

use crate::context_window::{CONTEXT_WINDOW_TURNS, ConversationTurn};
use crate::llm::LanguageModel;
use crate::post_process::{extract_score, visible_message};
use crate::session::{InterviewConfig, Role, TranscriptEntry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Score recorded when a timed-out session cannot be evaluated.
pub const TIMEOUT_FALLBACK_SCORE: u8 = 70;

pub const TIMEOUT_FALLBACK_FEEDBACK: &str = "Time ran out before a detailed evaluation could be produced. \
     You engaged with the questions that were covered; review the transcript to spot answers that \
     could use more structure, concrete examples and clearer trade-off reasoning.";

/// Final evaluation attached to a completed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub score: u8,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    pub feedback: String,
}

impl Evaluation {
    pub fn timeout_fallback() -> Self {
        Self {
            score: TIMEOUT_FALLBACK_SCORE,
            strengths: Vec::new(),
            improvements: Vec::new(),
            feedback: TIMEOUT_FALLBACK_FEEDBACK.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvaluation {
    score: f64,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    improvements: Vec<String>,
    feedback: String,
}

/// Returns the first balanced `{...}` span in `text`, skipping braces inside JSON strings.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses a structured evaluation out of free-form model text.
pub fn parse_evaluation(text: &str) -> Option<Evaluation> {
    let span = first_json_object(text)?;
    match serde_json::from_str::<RawEvaluation>(span) {
        Ok(raw) => Some(Evaluation {
            score: raw.score.round().clamp(0.0, 100.0) as u8,
            strengths: raw.strengths,
            improvements: raw.improvements,
            feedback: raw.feedback.trim().to_string(),
        }),
        Err(e) => {
            tracing::warn!("Evaluation JSON did not match the expected shape: {}", e);
            None
        }
    }
}

fn format_transcript(entries: &[TranscriptEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            let speaker = match entry.role {
                Role::Interviewer => "Interviewer",
                Role::Candidate => "Candidate",
            };
            format!("{speaker}: {}", entry.message)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct FeedbackSynthesizer {
    model: Arc<dyn LanguageModel>,
}

impl FeedbackSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Structured evaluation over the whole transcript. `None` when the model call
    /// fails or its reply holds no usable JSON.
    pub async fn evaluate(
        &self,
        config: &InterviewConfig,
        transcript: &[TranscriptEntry],
    ) -> Option<Evaluation> {
        let prompt = format!(
            r#"You are reviewing a completed {category} interview for a {level}-level {role} position.

Transcript:
---
{transcript}
---

Evaluate the candidate's performance. Respond with STRICT JSON only, in exactly this shape:
{{"score": <integer 0-100>, "strengths": ["<strength>", "<strength>", "<strength>"], "improvements": ["<improvement>", "<improvement>", "<improvement>"], "feedback": "<two or three sentence narrative>"}}"#,
            category = config.category,
            level = config.experience_level,
            role = config.job_role,
            transcript = format_transcript(transcript),
        );

        let turns = vec![ConversationTurn::user(prompt)];
        match self.model.complete(&turns).await {
            Ok(completion) => {
                let evaluation = parse_evaluation(&visible_message(&completion.text));
                if evaluation.is_none() {
                    tracing::warn!("Could not parse structured evaluation; completing without feedback");
                }
                evaluation
            }
            Err(e) => {
                tracing::error!("Evaluation request failed: {:?}", e);
                None
            }
        }
    }

    /// Free-text evaluation over the most recent entries, used when time runs out.
    /// Always produces an evaluation.
    pub async fn evaluate_on_timeout(&self, transcript: &[TranscriptEntry]) -> Evaluation {
        let start = transcript.len().saturating_sub(CONTEXT_WINDOW_TURNS);
        let prompt = format!(
            r#"The interview below ended because the time limit was reached.

Recent transcript:
---
{}
---

Give the candidate a short holistic evaluation of how they did overall, in plain prose (no JSON).
Mention what went well and what to work on, and include an overall score written as N/100."#,
            format_transcript(&transcript[start..])
        );

        let turns = vec![ConversationTurn::user(prompt)];
        match self.model.complete(&turns).await {
            Ok(completion) => {
                let text = visible_message(&completion.text);
                if text.is_empty() {
                    tracing::warn!("Timeout evaluation came back empty; using fallback");
                    return Evaluation::timeout_fallback();
                }
                Evaluation {
                    score: extract_score(&text),
                    strengths: Vec::new(),
                    improvements: Vec::new(),
                    feedback: text,
                }
            }
            Err(e) => {
                tracing::error!("Timeout evaluation request failed: {:?}", e);
                Evaluation::timeout_fallback()
            }
        }
    }
}
