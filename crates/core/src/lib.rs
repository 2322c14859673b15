pub mod chat;
pub mod context_window;
pub mod feedback;
pub mod greeting;
pub mod llm;
pub mod orchestrator;
pub mod post_process;
pub mod runtime;
pub mod session;
pub mod store;
pub mod tier;
pub mod voice;

#[cfg(test)]
pub(crate) mod test_support;

use session::{InterviewSession, TranscriptEntry};

/// Represents commands that the core logic (`InterviewOrchestrator`) issues to the runtime.
///
/// This enum is the primary API for decoupling the session's decision-making
/// from the runtime's execution of side effects (showing entries, speaking text).
#[derive(Debug, Clone)]
pub enum Command {
    /// A transcript entry was recorded and should be shown.
    Display(TranscriptEntry),
    /// Command the runtime to speak the given interviewer text.
    SpeakText(String),
    /// A recoverable, user-facing notice (connection issue, voice status).
    Notice(String),
    /// The session reached its terminal state.
    SessionComplete(Box<InterviewSession>),
}
