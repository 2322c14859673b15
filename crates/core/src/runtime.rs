//! The event loop for one live session.
//!
//! A single task multiplexes the countdown tick, queued user input and voice events,
//! so at most one candidate turn is ever in flight. Input that arrives while a turn
//! is pending simply waits in the channel. A pending turn is raced against the
//! session deadline; ticks missed while it ran are replayed once it resolves.

use crate::Command;
use crate::orchestrator::{InterviewOrchestrator, SessionError, TurnOutcome};
use crate::session::InterviewSession;
use crate::voice::{CaptureError, VoiceEvent, VoiceIoWatchdog};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    CandidateText(String),
    EnableVoice,
    DisableVoice,
    SetAutoSpeak(bool),
    SetVoice(String),
    SetRate(f32),
    SetPitch(f32),
    Shutdown,
}

pub struct SessionRuntime {
    orchestrator: InterviewOrchestrator,
    commands: mpsc::Receiver<Command>,
    output: mpsc::Sender<Command>,
    watchdog: Option<VoiceIoWatchdog>,
    voice_events: Option<mpsc::Receiver<VoiceEvent>>,
}

impl SessionRuntime {
    /// `commands` is the receiving end of the channel the orchestrator emits into;
    /// every command is forwarded to `output` after the runtime has acted on it.
    pub fn new(
        orchestrator: InterviewOrchestrator,
        commands: mpsc::Receiver<Command>,
        output: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            orchestrator,
            commands,
            output,
            watchdog: None,
            voice_events: None,
        }
    }

    pub fn with_voice(mut self, watchdog: VoiceIoWatchdog, events: mpsc::Receiver<VoiceEvent>) -> Self {
        self.watchdog = Some(watchdog);
        self.voice_events = Some(events);
        self
    }

    /// Runs until the session completes, `Shutdown` is received or the input channel
    /// closes. Voice I/O is released and the timer dropped before returning.
    pub async fn run(self, mut inputs: mpsc::Receiver<SessionInput>) -> InterviewSession {
        let Self {
            mut orchestrator,
            mut commands,
            output,
            mut watchdog,
            mut voice_events,
        } = self;

        forward_commands(&mut commands, &mut watchdog, &output).await;

        let mut interval = tokio::time::interval(TICK_INTERVAL);
        // The first tick completes immediately.
        interval.tick().await;
        let deadline = Instant::now() + Duration::from_secs(orchestrator.remaining_secs());

        while orchestrator.is_in_progress() {
            tokio::select! {
                _ = interval.tick() => {
                    let fatal = match watchdog.as_mut() {
                        Some(watchdog) => match watchdog.ensure_capture() {
                            Ok(()) => None,
                            Err(e) => Some(fatal_notice(watchdog, &e)),
                        },
                        None => None,
                    };
                    if let Some(notice) = fatal {
                        notify(&output, &notice).await;
                    }
                    if let Some(outcome) = orchestrator.tick().await {
                        log_outcome(&outcome);
                    }
                }
                input = inputs.recv() => {
                    match input {
                        Some(SessionInput::CandidateText(text)) => {
                            submit(&mut orchestrator, &output, &text, deadline).await;
                        }
                        Some(SessionInput::Shutdown) | None => {
                            tracing::info!("Session {} torn down while in progress", orchestrator.session().id);
                            break;
                        }
                        Some(other) => {
                            apply_setting(other, &mut orchestrator, &mut watchdog, &output).await;
                        }
                    }
                }
                Some(event) = next_voice_event(&mut voice_events) => {
                    let was_enabled = watchdog.as_ref().is_some_and(VoiceIoWatchdog::is_enabled);
                    let finalized = watchdog.as_mut().and_then(|w| w.handle_event(event));
                    let fatal = watchdog
                        .as_ref()
                        .filter(|w| was_enabled && !w.is_enabled())
                        .and_then(|w| w.fatal_notice().map(str::to_string));
                    if let Some(notice) = fatal {
                        notify(&output, &notice).await;
                    }
                    if let Some(text) = finalized {
                        tracing::info!("Candidate said: \"{}\"", text);
                        submit(&mut orchestrator, &output, &text, deadline).await;
                    }
                }
            }
            forward_commands(&mut commands, &mut watchdog, &output).await;
        }

        drop(interval);
        forward_commands(&mut commands, &mut watchdog, &output).await;
        if let Some(watchdog) = watchdog.as_mut() {
            watchdog.disable();
        }
        orchestrator.session().clone()
    }
}

async fn next_voice_event(events: &mut Option<mpsc::Receiver<VoiceEvent>>) -> Option<VoiceEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn submit(
    orchestrator: &mut InterviewOrchestrator,
    output: &mpsc::Sender<Command>,
    text: &str,
    deadline: Instant,
) {
    let result = tokio::time::timeout_at(deadline, orchestrator.submit_candidate_turn(text)).await;
    match result {
        Ok(Ok(outcome)) => log_outcome(&outcome),
        Ok(Err(SessionError::EmptyTurn)) => tracing::debug!("Ignoring empty candidate input"),
        Ok(Err(e)) => {
            tracing::warn!("Candidate turn rejected: {}", e);
            notify(output, &e.to_string()).await;
        }
        Err(_) => {
            tracing::warn!(
                "Time ran out while session {} waited on the interviewer",
                orchestrator.session().id
            );
            if let Some(outcome) = orchestrator.run_out_clock().await {
                log_outcome(&outcome);
            }
        }
    }
}

async fn apply_setting(
    input: SessionInput,
    orchestrator: &mut InterviewOrchestrator,
    watchdog: &mut Option<VoiceIoWatchdog>,
    output: &mpsc::Sender<Command>,
) {
    match input {
        SessionInput::SetAutoSpeak(enabled) => orchestrator.set_auto_speak(enabled),
        SessionInput::EnableVoice => match watchdog.as_mut() {
            Some(watchdog) => {
                if let Err(e) = watchdog.enable() {
                    let notice = fatal_notice(watchdog, &e);
                    notify(output, &notice).await;
                }
            }
            None => notify(output, "Voice mode is not available in this session").await,
        },
        SessionInput::DisableVoice => {
            if let Some(watchdog) = watchdog.as_mut() {
                watchdog.disable();
            }
        }
        SessionInput::SetVoice(voice) => {
            if let Some(watchdog) = watchdog.as_mut() {
                watchdog.set_voice(&voice);
            }
        }
        SessionInput::SetRate(rate) => {
            if let Some(watchdog) = watchdog.as_mut() {
                watchdog.set_rate(rate);
            }
        }
        SessionInput::SetPitch(pitch) => {
            if let Some(watchdog) = watchdog.as_mut() {
                watchdog.set_pitch(pitch);
            }
        }
        SessionInput::CandidateText(_) | SessionInput::Shutdown => {}
    }
}

// Drains what the orchestrator emitted, routing speech to the watchdog.
async fn forward_commands(
    commands: &mut mpsc::Receiver<Command>,
    watchdog: &mut Option<VoiceIoWatchdog>,
    output: &mpsc::Sender<Command>,
) {
    while let Ok(command) = commands.try_recv() {
        if let Command::SpeakText(text) = &command {
            if let Some(watchdog) = watchdog.as_mut().filter(|w| w.is_enabled()) {
                watchdog.speak(text);
            }
        }
        if let Err(e) = output.send(command).await {
            tracing::warn!("Failed to forward command: {:?}", e);
        }
    }
}

fn fatal_notice(watchdog: &VoiceIoWatchdog, error: &CaptureError) -> String {
    watchdog
        .fatal_notice()
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

async fn notify(output: &mpsc::Sender<Command>, notice: &str) {
    if let Err(e) = output.send(Command::Notice(notice.to_string())).await {
        tracing::warn!("Failed to send notice: {:?}", e);
    }
}

fn log_outcome(outcome: &TurnOutcome) {
    match outcome {
        TurnOutcome::Continued { question, .. } => tracing::info!("Moving on with question {}", question),
        TurnOutcome::Completed { evaluation, .. } => tracing::info!(
            "Interview complete, score {:?}",
            evaluation.as_ref().map(|e| e.score)
        ),
        TurnOutcome::ConnectionIssue { notice } => tracing::warn!("{}", notice),
    }
}
