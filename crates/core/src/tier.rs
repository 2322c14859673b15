//! Experience tiers and the question budget attached to each of them.

use serde::{Deserialize, Serialize};

/// Question budget used when the experience level is not one of the known tiers.
pub const DEFAULT_TOTAL_QUESTIONS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceTier {
    Entry,
    Junior,
    Mid,
    Senior,
    Lead,
}

impl ExperienceTier {
    pub const ALL: [ExperienceTier; 5] = [
        ExperienceTier::Entry,
        ExperienceTier::Junior,
        ExperienceTier::Mid,
        ExperienceTier::Senior,
        ExperienceTier::Lead,
    ];

    /// Case-insensitive lookup of a tier label such as `"Senior"`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "entry" => Some(ExperienceTier::Entry),
            "junior" => Some(ExperienceTier::Junior),
            "mid" => Some(ExperienceTier::Mid),
            "senior" => Some(ExperienceTier::Senior),
            "lead" => Some(ExperienceTier::Lead),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExperienceTier::Entry => "entry",
            ExperienceTier::Junior => "junior",
            ExperienceTier::Mid => "mid",
            ExperienceTier::Senior => "senior",
            ExperienceTier::Lead => "lead",
        }
    }

    pub fn total_questions(&self) -> u32 {
        match self {
            ExperienceTier::Entry => 5,
            ExperienceTier::Junior => 6,
            ExperienceTier::Mid => 7,
            ExperienceTier::Senior => 8,
            ExperienceTier::Lead => 10,
        }
    }

    /// One sentence telling the interviewer how hard to push at this level.
    pub fn guidance(&self) -> &'static str {
        match self {
            ExperienceTier::Entry => {
                "Focus on fundamentals and give the candidate room to think out loud; offer a gentle hint if they stall."
            }
            ExperienceTier::Junior => {
                "Check solid grasp of core concepts and ask how they would apply them in small, well-scoped tasks."
            }
            ExperienceTier::Mid => {
                "Expect independent problem solving, probe trade-offs and ask about real projects they have owned."
            }
            ExperienceTier::Senior => {
                "Push on architecture, scalability and failure modes, and expect them to justify decisions with experience."
            }
            ExperienceTier::Lead => {
                "Explore technical strategy, cross-team influence and mentoring, and challenge them on long-term trade-offs."
            }
        }
    }
}

/// Planned number of questions for a raw experience level string.
pub fn total_questions(experience_level: &str) -> u32 {
    ExperienceTier::from_label(experience_level)
        .map(|tier| tier.total_questions())
        .unwrap_or(DEFAULT_TOTAL_QUESTIONS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_questions_table() {
        let expected = [
            ("entry", 5),
            ("junior", 6),
            ("mid", 7),
            ("senior", 8),
            ("lead", 10),
        ];
        for (label, count) in expected {
            assert_eq!(total_questions(label), count, "tier {label}");
        }
        for tier in ExperienceTier::ALL {
            assert!((5..=10).contains(&tier.total_questions()));
            assert_eq!(ExperienceTier::from_label(tier.label()), Some(tier));
        }
    }

    #[test]
    fn test_unknown_tier_defaults_to_five() {
        assert_eq!(total_questions("principal"), DEFAULT_TOTAL_QUESTIONS);
        assert_eq!(total_questions(""), 5);
        assert_eq!(total_questions("  SENIOR "), 8);
    }
}
