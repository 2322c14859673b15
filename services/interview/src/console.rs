//! Terminal front end: turns typed lines into session input and renders the
//! commands the session emits.

use interview_core::Command;
use interview_core::runtime::SessionInput;
use interview_core::session::{InterviewSession, Role, TranscriptEntry};
use std::fmt::Write;

pub const HELP: &str = "\
Type your answer and press Enter. Commands:
  /voice on|off      talk instead of typing
  /speak on|off      read interviewer replies aloud
  /voice-name NAME   choose the synthesized voice
  /rate N            speech rate (0.5 - 2.0)
  /pitch N           speech pitch (0.0 - 2.0)
  /quit              leave the interview";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConsoleError {
    #[error("Unknown command '{0}'. Type /help for the list.")]
    UnknownCommand(String),
    #[error("'{command}' expects {expected}")]
    BadArgument {
        command: &'static str,
        expected: &'static str,
    },
}

/// What a typed line asks for.
#[derive(Debug, PartialEq)]
pub enum ConsoleLine {
    Input(SessionInput),
    Help,
    Blank,
}

pub fn parse_line(line: &str) -> Result<ConsoleLine, ConsoleError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ConsoleLine::Blank);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(ConsoleLine::Input(SessionInput::CandidateText(line.to_string())));
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    let input = match name {
        "help" => return Ok(ConsoleLine::Help),
        "quit" | "exit" => SessionInput::Shutdown,
        "voice" => match arg {
            "on" => SessionInput::EnableVoice,
            "off" => SessionInput::DisableVoice,
            _ => return Err(bad("/voice", "on or off")),
        },
        "speak" => match arg {
            "on" => SessionInput::SetAutoSpeak(true),
            "off" => SessionInput::SetAutoSpeak(false),
            _ => return Err(bad("/speak", "on or off")),
        },
        "voice-name" if !arg.is_empty() => SessionInput::SetVoice(arg.to_string()),
        "voice-name" => return Err(bad("/voice-name", "a voice name")),
        "rate" => SessionInput::SetRate(arg.parse().map_err(|_| bad("/rate", "a number"))?),
        "pitch" => SessionInput::SetPitch(arg.parse().map_err(|_| bad("/pitch", "a number"))?),
        other => return Err(ConsoleError::UnknownCommand(other.to_string())),
    };
    Ok(ConsoleLine::Input(input))
}

fn bad(command: &'static str, expected: &'static str) -> ConsoleError {
    ConsoleError::BadArgument { command, expected }
}

/// Text to print for a session command, if any. Speech requests are not printed
/// since the same text already arrived as a transcript entry.
pub fn render_command(command: &Command) -> Option<String> {
    match command {
        Command::Display(entry) => Some(render_entry(entry)),
        Command::SpeakText(_) => None,
        Command::Notice(notice) => Some(format!("[!] {notice}")),
        Command::SessionComplete(session) => Some(render_summary(session)),
    }
}

pub fn render_entry(entry: &TranscriptEntry) -> String {
    let speaker = match entry.role {
        Role::Interviewer => "Interviewer",
        Role::Candidate => "You",
    };
    format!("{speaker}: {}", entry.message)
}

pub fn render_summary(session: &InterviewSession) -> String {
    let mut out = String::from("Interview complete.");
    if let Some(score) = session.score {
        let _ = write!(out, "\nScore: {score}/100");
    }
    if let Some(feedback) = &session.feedback {
        let _ = write!(out, "\n{feedback}");
    }
    for (title, items) in [
        ("Strengths", &session.strengths),
        ("To improve", &session.improvements),
    ] {
        if let Some(items) = items.as_ref().filter(|items| !items.is_empty()) {
            let _ = write!(out, "\n{title}:");
            for item in items {
                let _ = write!(out, "\n  - {item}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use interview_core::session::{InterviewCategory, InterviewConfig};

    #[test]
    fn test_plain_text_is_an_answer() {
        assert_eq!(
            parse_line("  I would use a queue  ").unwrap(),
            ConsoleLine::Input(SessionInput::CandidateText("I would use a queue".to_string()))
        );
        assert_eq!(parse_line("   ").unwrap(), ConsoleLine::Blank);
    }

    #[test]
    fn test_slash_commands() {
        assert_eq!(
            parse_line("/voice on").unwrap(),
            ConsoleLine::Input(SessionInput::EnableVoice)
        );
        assert_eq!(
            parse_line("/speak off").unwrap(),
            ConsoleLine::Input(SessionInput::SetAutoSpeak(false))
        );
        assert_eq!(
            parse_line("/rate 1.5").unwrap(),
            ConsoleLine::Input(SessionInput::SetRate(1.5))
        );
        assert_eq!(
            parse_line("/voice-name  nova ").unwrap(),
            ConsoleLine::Input(SessionInput::SetVoice("nova".to_string()))
        );
        assert_eq!(parse_line("/quit").unwrap(), ConsoleLine::Input(SessionInput::Shutdown));
        assert_eq!(parse_line("/help").unwrap(), ConsoleLine::Help);
    }

    #[test]
    fn test_bad_commands_are_reported() {
        assert_eq!(
            parse_line("/dance").unwrap_err(),
            ConsoleError::UnknownCommand("dance".to_string())
        );
        assert!(matches!(
            parse_line("/pitch high"),
            Err(ConsoleError::BadArgument { command: "/pitch", .. })
        ));
        assert!(parse_line("/voice maybe").is_err());
    }

    #[test]
    fn test_render_summary() {
        let mut session = InterviewSession::new(
            "s1".to_string(),
            "u1".to_string(),
            InterviewConfig {
                category: InterviewCategory::Technical,
                company_name: None,
                job_role: "SRE".to_string(),
                experience_level: "mid".to_string(),
                duration_secs: 60,
                focus_topics: None,
                resume_summary: None,
            },
        );
        session.score = Some(82);
        session.feedback = Some("Clear and structured.".to_string());
        session.strengths = Some(vec!["Communication".to_string()]);
        session.improvements = Some(Vec::new());

        let summary = render_summary(&session);
        assert!(summary.contains("Score: 82/100"));
        assert!(summary.contains("Strengths:\n  - Communication"));
        assert!(!summary.contains("To improve"));

        let entry = TranscriptEntry {
            session_id: "s1".to_string(),
            sequence: 0,
            role: Role::Candidate,
            message: "Hi".to_string(),
            created_at: Utc::now(),
        };
        assert_eq!(render_command(&Command::Display(entry)).as_deref(), Some("You: Hi"));
        assert!(render_command(&Command::SpeakText("Hi".to_string())).is_none());
    }
}
