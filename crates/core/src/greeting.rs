use crate::session::{InterviewCategory, InterviewConfig};

/// Opening interviewer line for a freshly created session.
///
/// The template is chosen by category; the experience level is woven in as the
/// difficulty, and the company-specific template names the company when one was given.
pub fn opening_greeting(config: &InterviewConfig) -> String {
    let level = config.experience_level.trim();
    let role = config.job_role.trim();
    match config.category {
        InterviewCategory::Technical => format!(
            "Hello, and welcome to your {level}-level technical interview for the {role} position. \
             I'll ask you a series of technical questions, so feel free to think out loud as you work through them. \
             To start, could you briefly walk me through your background and the technologies you're most comfortable with?"
        ),
        InterviewCategory::Behavioral => format!(
            "Hi, thanks for joining this {level}-level behavioral interview for the {role} role. \
             I'll be asking about situations you've faced at work, and the STAR format is a good way to structure your answers. \
             Let's begin: tell me a little about yourself and what drew you to this kind of role."
        ),
        InterviewCategory::SystemDesign => format!(
            "Welcome to your {level}-level system design interview for the {role} position. \
             We'll work through designing a system together, so please ask clarifying questions and explain your trade-offs. \
             Before we dive in, tell me about a system you've built or worked on that you're proud of."
        ),
        InterviewCategory::CompanySpecific => {
            let company = config
                .company()
                .map(|name| name.to_string())
                .unwrap_or_else(|| "our company".to_string());
            format!(
                "Hello, and welcome to your {level}-level interview with {company} for the {role} role. \
                 This conversation will mirror the way {company} runs its interviews, mixing technical and behavioral questions. \
                 To start, why are you interested in joining {company}?"
            )
        }
        InterviewCategory::General => format!(
            "Hello, and welcome to your {level}-level interview for the {role} position. \
             I'll ask you a range of questions to understand your experience and how you approach problems. \
             Let's start with a quick introduction about yourself."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(category: InterviewCategory, company: Option<&str>) -> InterviewConfig {
        InterviewConfig {
            category,
            company_name: company.map(str::to_string),
            job_role: "Data Engineer".to_string(),
            experience_level: "senior".to_string(),
            duration_secs: 900,
            focus_topics: None,
            resume_summary: None,
        }
    }

    #[test]
    fn test_company_greeting_names_company() {
        let greeting = opening_greeting(&config(InterviewCategory::CompanySpecific, Some("Acme")));
        assert!(greeting.contains("with Acme"));
        assert!(greeting.contains("senior-level"));
    }

    #[test]
    fn test_company_greeting_falls_back_without_name() {
        let greeting = opening_greeting(&config(InterviewCategory::CompanySpecific, Some("  ")));
        assert!(greeting.contains("our company"));
    }

    #[test]
    fn test_each_category_has_a_distinct_template() {
        let greetings: Vec<String> = [
            InterviewCategory::Technical,
            InterviewCategory::Behavioral,
            InterviewCategory::SystemDesign,
            InterviewCategory::CompanySpecific,
            InterviewCategory::General,
        ]
        .into_iter()
        .map(|category| opening_greeting(&config(category, None)))
        .collect();

        for (i, a) in greetings.iter().enumerate() {
            assert!(a.contains("Data Engineer"));
            for b in greetings.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
