//! Voice I/O supervision: keeps speech capture alive while voice mode is on and
//! plays interviewer turns back one utterance at a time.
//!
//! Platform speech is modelled as a single owned [`VoiceResource`], acquired from a
//! [`VoiceBackend`] when voice mode is enabled and released when it is disabled.
//! Capture and synthesis report back asynchronously as [`VoiceEvent`]s which the
//! runtime feeds into [`VoiceIoWatchdog::handle_event`].

use regex::Regex;
use std::sync::LazyLock;
use tokio::sync::mpsc;

pub const MIN_RATE: f32 = 0.5;
pub const MAX_RATE: f32 = 2.0;
pub const MIN_PITCH: f32 = 0.0;
pub const MAX_PITCH: f32 = 2.0;

const CODE_PLACEHOLDER: &str = " (code block omitted) ";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("No speech was detected")]
    NoSpeech,
    #[error("Speech recognition network error: {0}")]
    Network(String),
    #[error("Speech capture was aborted")]
    Aborted,
    #[error("Microphone access was denied")]
    PermissionDenied,
    #[error("Audio capture device unavailable: {0}")]
    DeviceUnavailable(String),
}

impl CaptureError {
    /// Transient errors are retried automatically; the rest end voice mode.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CaptureError::NoSpeech | CaptureError::Network(_) | CaptureError::Aborted
        )
    }
}

/// Events produced by capture and synthesis. Capture events carry the generation of
/// the capture instance that produced them so superseded instances can be ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    Interim { generation: u64, text: String },
    Final { generation: u64, text: String },
    CaptureError { generation: u64, error: CaptureError },
    CaptureEnded { generation: u64 },
    SpeechStarted,
    SpeechFinished,
}

/// Handle given to a capture instance for reporting back.
#[derive(Debug, Clone)]
pub struct VoiceEventSink {
    generation: u64,
    tx: mpsc::Sender<VoiceEvent>,
}

impl VoiceEventSink {
    pub fn new(generation: u64, tx: mpsc::Sender<VoiceEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn interim(&self, text: impl Into<String>) {
        self.send(VoiceEvent::Interim {
            generation: self.generation,
            text: text.into(),
        });
    }

    pub fn finalized(&self, text: impl Into<String>) {
        self.send(VoiceEvent::Final {
            generation: self.generation,
            text: text.into(),
        });
    }

    pub fn error(&self, error: CaptureError) {
        self.send(VoiceEvent::CaptureError {
            generation: self.generation,
            error,
        });
    }

    pub fn ended(&self) {
        self.send(VoiceEvent::CaptureEnded {
            generation: self.generation,
        });
    }

    // Capture runs on audio threads, so this never blocks.
    fn send(&self, event: VoiceEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!("Failed to deliver voice event: {:?}", e);
        }
    }
}

/// Text plus the tuning it should be spoken with.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub voice: String,
    pub rate: f32,
    pub pitch: f32,
}

pub trait SpeechCapture: Send {
    /// Begins continuous capture, reporting through `sink` until stopped.
    fn start(&mut self, sink: VoiceEventSink) -> Result<(), CaptureError>;
    /// Stops capture immediately. No further events are expected afterwards.
    fn stop(&mut self);
}

pub trait SpeechSynthesizer: Send {
    fn speak(&mut self, utterance: Utterance) -> anyhow::Result<()>;
    /// Cancels the utterance currently playing, if any.
    fn cancel(&mut self);
}

pub struct VoiceResource {
    pub capture: Box<dyn SpeechCapture>,
    pub synth: Box<dyn SpeechSynthesizer>,
}

pub trait VoiceBackend: Send {
    fn acquire(&mut self, events: mpsc::Sender<VoiceEvent>) -> Result<VoiceResource, CaptureError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceTuning {
    pub voice: String,
    pub rate: f32,
    pub pitch: f32,
}

impl Default for VoiceTuning {
    fn default() -> Self {
        Self {
            voice: "alloy".to_string(),
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

/// Ephemeral state of an active voice session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceChannelState {
    pub listening: bool,
    pub speaking: bool,
    pub transcript: String,
    pub interim: String,
    pub voice: String,
    pub rate: f32,
    pub pitch: f32,
    pub last_note: Option<String>,
}

pub struct VoiceIoWatchdog {
    backend: Box<dyn VoiceBackend>,
    events: mpsc::Sender<VoiceEvent>,
    resource: Option<VoiceResource>,
    state: Option<VoiceChannelState>,
    tuning: VoiceTuning,
    fatal_notice: Option<String>,
    capture_running: bool,
    generation: u64,
}

impl VoiceIoWatchdog {
    pub fn new(backend: Box<dyn VoiceBackend>, events: mpsc::Sender<VoiceEvent>) -> Self {
        Self {
            backend,
            events,
            resource: None,
            state: None,
            tuning: VoiceTuning::default(),
            fatal_notice: None,
            capture_running: false,
            generation: 0,
        }
    }

    pub fn with_tuning(mut self, tuning: VoiceTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.resource.is_some()
    }

    pub fn state(&self) -> Option<&VoiceChannelState> {
        self.state.as_ref()
    }

    /// Persistent notice left by a terminal capture error, cleared on the next enable.
    pub fn fatal_notice(&self) -> Option<&str> {
        self.fatal_notice.as_deref()
    }

    pub fn enable(&mut self) -> Result<(), CaptureError> {
        if self.is_enabled() {
            return Ok(());
        }
        let resource = match self.backend.acquire(self.events.clone()) {
            Ok(resource) => resource,
            Err(e) => {
                tracing::error!("Failed to acquire voice devices: {}", e);
                if !e.is_transient() {
                    self.fatal_notice = Some(fatal_message(&e));
                }
                return Err(e);
            }
        };

        self.resource = Some(resource);
        self.fatal_notice = None;
        self.state = Some(VoiceChannelState {
            voice: self.tuning.voice.clone(),
            rate: self.tuning.rate,
            pitch: self.tuning.pitch,
            ..Default::default()
        });
        tracing::info!("Voice mode enabled");
        self.start_capture()
    }

    /// Stops capture and cancels synthesis before releasing the devices.
    pub fn disable(&mut self) {
        self.shutdown();
        tracing::info!("Voice mode disabled");
    }

    /// Restarts capture if voice mode is on but nothing is listening. A terminal
    /// start failure turns voice mode off and is returned.
    pub fn ensure_capture(&mut self) -> Result<(), CaptureError> {
        if self.is_enabled() && !self.capture_running {
            return self.start_capture();
        }
        Ok(())
    }

    /// Applies a capture or synthesis event. Returns finalized candidate speech.
    pub fn handle_event(&mut self, event: VoiceEvent) -> Option<String> {
        match event {
            VoiceEvent::Interim { generation, text } => {
                if self.is_current(generation) {
                    if let Some(state) = self.state.as_mut() {
                        state.interim = text;
                    }
                }
                None
            }
            VoiceEvent::Final { generation, text } => {
                if !self.is_current(generation) {
                    return None;
                }
                let text = text.trim().to_string();
                let state = self.state.as_mut()?;
                state.interim.clear();
                if text.is_empty() {
                    return None;
                }
                if !state.transcript.is_empty() {
                    state.transcript.push(' ');
                }
                state.transcript.push_str(&text);
                Some(text)
            }
            VoiceEvent::CaptureError { generation, error } => {
                if !self.is_current(generation) {
                    tracing::debug!("Ignoring error from superseded capture {}: {}", generation, error);
                    return None;
                }
                self.mark_idle();
                if error.is_transient() {
                    tracing::warn!("Transient capture error, restarting: {}", error);
                    if let Some(state) = self.state.as_mut() {
                        state.last_note = Some(format!("{error}. Still listening..."));
                    }
                    // A terminal start failure is left in `fatal_notice`.
                    let _ = self.start_capture();
                } else {
                    self.fail(&error);
                }
                None
            }
            VoiceEvent::CaptureEnded { generation } => {
                if self.is_current(generation) {
                    self.mark_idle();
                    tracing::debug!("Capture {} ended while enabled, restarting", generation);
                    let _ = self.start_capture();
                }
                None
            }
            VoiceEvent::SpeechStarted => {
                if let Some(state) = self.state.as_mut() {
                    state.speaking = true;
                }
                None
            }
            VoiceEvent::SpeechFinished => {
                if let Some(state) = self.state.as_mut() {
                    state.speaking = false;
                }
                None
            }
        }
    }

    /// Speaks `text`, cancelling whatever is currently playing.
    pub fn speak(&mut self, text: &str) {
        let Some(resource) = self.resource.as_mut() else {
            return;
        };
        let spoken = sanitize_for_speech(text);
        if spoken.is_empty() {
            return;
        }
        resource.synth.cancel();
        let utterance = Utterance {
            text: spoken,
            voice: self.tuning.voice.clone(),
            rate: self.tuning.rate,
            pitch: self.tuning.pitch,
        };
        if let Err(e) = resource.synth.speak(utterance) {
            tracing::warn!("Speech synthesis failed: {:?}", e);
        }
    }

    pub fn set_voice(&mut self, voice: &str) {
        self.tuning.voice = voice.trim().to_string();
        self.sync_tuning();
    }

    pub fn set_rate(&mut self, rate: f32) {
        self.tuning.rate = rate.clamp(MIN_RATE, MAX_RATE);
        self.sync_tuning();
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        self.tuning.pitch = pitch.clamp(MIN_PITCH, MAX_PITCH);
        self.sync_tuning();
    }

    fn sync_tuning(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.voice = self.tuning.voice.clone();
            state.rate = self.tuning.rate;
            state.pitch = self.tuning.pitch;
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_enabled() && generation == self.generation
    }

    fn mark_idle(&mut self) {
        self.capture_running = false;
        if let Some(state) = self.state.as_mut() {
            state.listening = false;
        }
    }

    // Only terminal errors are returned; transient ones leave capture idle.
    fn start_capture(&mut self) -> Result<(), CaptureError> {
        if self.capture_running {
            return Ok(());
        }
        let Some(resource) = self.resource.as_mut() else {
            return Ok(());
        };

        self.generation += 1;
        let sink = VoiceEventSink::new(self.generation, self.events.clone());
        match resource.capture.start(sink) {
            Ok(()) => {
                self.capture_running = true;
                if let Some(state) = self.state.as_mut() {
                    state.listening = true;
                }
                tracing::debug!("Capture {} started", self.generation);
                Ok(())
            }
            Err(e) if e.is_transient() => {
                // Left idle; the next tick re-arms it.
                tracing::warn!("Capture failed to start: {}", e);
                if let Some(state) = self.state.as_mut() {
                    state.last_note = Some(e.to_string());
                }
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn fail(&mut self, error: &CaptureError) {
        tracing::error!("Terminal capture error, voice mode stopped: {}", error);
        self.shutdown();
        self.fatal_notice = Some(fatal_message(error));
    }

    fn shutdown(&mut self) {
        // Bumping the generation turns any in-flight capture events stale.
        self.generation += 1;
        self.capture_running = false;
        if let Some(mut resource) = self.resource.take() {
            resource.capture.stop();
            resource.synth.cancel();
        }
        self.state = None;
    }
}

fn fatal_message(error: &CaptureError) -> String {
    format!("Voice mode stopped: {error}. Re-enable voice mode to try again.")
}

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid fence pattern"));
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").expect("valid link pattern"));
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]*)`").expect("valid inline code pattern"));
static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*|__([^_]+)__").expect("valid bold pattern"));
static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\n]+)\*|~~([^~]+)~~").expect("valid emphasis pattern"));
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*#{1,6}\s+").expect("valid heading pattern"));

/// Strips markdown the audio channel cannot render.
pub fn sanitize_for_speech(text: &str) -> String {
    let text = CODE_FENCE.replace_all(text, CODE_PLACEHOLDER);
    let text = LINK.replace_all(&text, "$1");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = BOLD.replace_all(&text, "$1$2");
    let text = EMPHASIS.replace_all(&text, "$1$2");
    let text = HEADING.replace_all(&text, "");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
