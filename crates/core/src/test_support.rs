//! Shared fakes for unit tests.

use crate::context_window::ConversationTurn;
use crate::llm::{Completion, LanguageModel};
use crate::session::{InterviewCategory, InterviewConfig};
use crate::voice::{
    CaptureError, SpeechCapture, SpeechSynthesizer, Utterance, VoiceBackend, VoiceEvent,
    VoiceEventSink, VoiceResource,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub(crate) fn sample_config(level: &str) -> InterviewConfig {
    InterviewConfig {
        category: InterviewCategory::Technical,
        company_name: None,
        job_role: "Backend Engineer".to_string(),
        experience_level: level.to_string(),
        duration_secs: 600,
        focus_topics: None,
        resume_summary: None,
    }
}

/// A language model that replays queued replies in order and records every prompt.
#[derive(Default)]
pub(crate) struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_reply(&self, text: &str) {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub(crate) fn push_failure(&self, error: &str) {
        self.replies.lock().unwrap().push_back(Err(error.to_string()));
    }

    pub(crate) fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub(crate) fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, turns: &[ConversationTurn]) -> anyhow::Result<Completion> {
        let prompt = turns
            .iter()
            .map(|turn| turn.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(prompt);

        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(Completion {
                text,
                reasoning: None,
            }),
            Some(Err(error)) => Err(anyhow::anyhow!(error)),
            None => Err(anyhow::anyhow!("no scripted reply left")),
        }
    }
}

/// Everything the fake voice devices were asked to do.
#[derive(Debug, Default)]
pub(crate) struct VoiceLog {
    pub(crate) starts: Vec<u64>,
    pub(crate) stops: usize,
    pub(crate) spoken: Vec<Utterance>,
    pub(crate) cancels: usize,
    pub(crate) start_results: VecDeque<Result<(), CaptureError>>,
}

struct RecordingCapture(Arc<Mutex<VoiceLog>>);

impl SpeechCapture for RecordingCapture {
    fn start(&mut self, sink: VoiceEventSink) -> Result<(), CaptureError> {
        let mut log = self.0.lock().unwrap();
        log.starts.push(sink.generation());
        log.start_results.pop_front().unwrap_or(Ok(()))
    }

    fn stop(&mut self) {
        self.0.lock().unwrap().stops += 1;
    }
}

struct RecordingSynth(Arc<Mutex<VoiceLog>>);

impl SpeechSynthesizer for RecordingSynth {
    fn speak(&mut self, utterance: Utterance) -> anyhow::Result<()> {
        self.0.lock().unwrap().spoken.push(utterance);
        Ok(())
    }

    fn cancel(&mut self) {
        self.0.lock().unwrap().cancels += 1;
    }
}

pub(crate) struct RecordingVoiceBackend {
    pub(crate) log: Arc<Mutex<VoiceLog>>,
    pub(crate) refuse: Option<CaptureError>,
}

impl RecordingVoiceBackend {
    pub(crate) fn new() -> (Self, Arc<Mutex<VoiceLog>>) {
        let log = Arc::new(Mutex::new(VoiceLog::default()));
        (
            Self {
                log: log.clone(),
                refuse: None,
            },
            log,
        )
    }
}

impl VoiceBackend for RecordingVoiceBackend {
    fn acquire(&mut self, _events: mpsc::Sender<VoiceEvent>) -> Result<VoiceResource, CaptureError> {
        if let Some(e) = self.refuse.clone() {
            return Err(e);
        }
        Ok(VoiceResource {
            capture: Box::new(RecordingCapture(self.log.clone())),
            synth: Box::new(RecordingSynth(self.log.clone())),
        })
    }
}
