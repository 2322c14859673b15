//! Native voice devices: microphone capture with server-side transcription and
//! synthesized speech played through the default output device.

use crate::config::{Config, INPUT_CHUNK_SIZE, OUTPUT_CHUNK_SIZE, OUTPUT_LATENCY_MS};
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use interview_core::voice::{
    CaptureError, SpeechCapture, SpeechSynthesizer, Utterance, VoiceBackend, VoiceEvent,
    VoiceEventSink, VoiceResource,
};
use interview_native_utils::audio::{
    SPEECH_PCM16_SAMPLE_RATE, TRANSCRIPTION_SAMPLE_RATE, create_resampler, encode_wav,
    pcm16_to_f32, resample_all, shared_buffer, to_mono,
};
use interview_native_utils::device::{get_or_default_input, get_or_default_output};
use interview_native_utils::vad::{SegmentEvent, SegmenterConfig, UtteranceSegmenter};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use ringbuf::HeapProd;
use ringbuf::traits::{Consumer, Producer, Split};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// How long a device thread may take to report that its stream is playing.
const STREAM_STARTUP_TIMEOUT: Duration = Duration::from_secs(3);
/// How often device threads check their stop flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);
const PLAYBACK_POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Microphone chunks buffered while an utterance is being transcribed.
const CAPTURE_QUEUE_DEPTH: usize = 1024;

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for the OpenAI-compatible audio endpoints.
pub struct SpeechApi {
    client: Client,
    base_url: String,
    api_key: SecretString,
    transcription_model: String,
    tts_model: String,
}

impl SpeechApi {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.llm_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key(),
            transcription_model: config.transcription_model.clone(),
            tts_model: config.tts_model.clone(),
        }
    }

    /// Transcribes a mono WAV file and returns the trimmed text.
    pub async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        let file = Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")?;
        let form = Form::new()
            .text("model", self.transcription_model.clone())
            .part("file", file);

        let url = format!("{}/audio/transcriptions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .context("Transcription request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Transcription endpoint returned {status}: {}",
                detail.chars().take(200).collect::<String>()
            ));
        }

        let parsed = response
            .json::<TranscriptionResponse>()
            .await
            .context("Failed to decode transcription response")?;
        Ok(parsed.text.trim().to_string())
    }

    /// Synthesizes `utterance` as raw 24 kHz little-endian PCM16.
    pub async fn synthesize(&self, utterance: &Utterance) -> Result<Vec<u8>> {
        if (utterance.pitch - 1.0).abs() > f32::EPSILON {
            tracing::debug!("Speech endpoint has no pitch control, ignoring {}", utterance.pitch);
        }
        let body = serde_json::json!({
            "model": self.tts_model,
            "input": utterance.text,
            "voice": utterance.voice,
            "response_format": "pcm",
            "speed": utterance.rate,
        });

        let url = format!("{}/audio/speech", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("Speech request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Speech endpoint returned {status}: {}",
                detail.chars().take(200).collect::<String>()
            ));
        }

        let audio = response.bytes().await.context("Failed to read synthesized audio")?;
        Ok(audio.to_vec())
    }
}

fn device_error(error: impl std::fmt::Display) -> CaptureError {
    let detail = error.to_string();
    let lowered = detail.to_lowercase();
    if lowered.contains("permission") || lowered.contains("denied") {
        CaptureError::PermissionDenied
    } else {
        CaptureError::DeviceUnavailable(detail)
    }
}

struct ActiveCapture {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    task: tokio::task::JoinHandle<()>,
}

/// Listens on the input device, cuts the stream into utterances and reports each
/// transcribed utterance as a final result.
pub struct MicrophoneCapture {
    api: Arc<SpeechApi>,
    device_name: Option<String>,
    speaking: Arc<AtomicBool>,
    active: Option<ActiveCapture>,
}

impl MicrophoneCapture {
    fn new(api: Arc<SpeechApi>, device_name: Option<String>, speaking: Arc<AtomicBool>) -> Self {
        Self {
            api,
            device_name,
            speaking,
            active: None,
        }
    }
}

impl SpeechCapture for MicrophoneCapture {
    fn start(&mut self, sink: VoiceEventSink) -> Result<(), CaptureError> {
        self.stop();
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        let (samples_tx, samples_rx) = mpsc::channel::<Vec<f32>>(CAPTURE_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<u32, CaptureError>>();
        let stop = Arc::new(AtomicBool::new(false));

        // cpal streams are not Send, so each one lives on its own thread.
        let thread = {
            let stop = stop.clone();
            let speaking = self.speaking.clone();
            let device_name = self.device_name.clone();
            std::thread::Builder::new()
                .name("microphone".to_string())
                .spawn(move || run_input_stream(device_name, samples_tx, speaking, stop, ready_tx))
                .map_err(device_error)?
        };

        // Device failures arrive later as capture errors for this generation.
        let task = handle.spawn(listen(
            self.api.clone(),
            sink,
            samples_rx,
            ready_rx,
            stop.clone(),
        ));
        self.active = Some(ActiveCapture {
            stop,
            thread: Some(thread),
            task,
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.stop.store(true, Ordering::Relaxed);
            active.task.abort();
            if let Some(thread) = active.thread.take() {
                reap(thread, "Microphone");
            }
        }
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Joins a device thread without holding up an async worker. Device threads exit
/// within one stop poll once their flag is set.
fn reap(thread: JoinHandle<()>, name: &'static str) {
    let join = move || {
        if thread.join().is_err() {
            tracing::error!("{} thread panicked", name);
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(join);
        }
        Err(_) => join(),
    }
}

/// Waits for the microphone thread to open its stream, then transcribes until the
/// samples channel closes.
async fn listen(
    api: Arc<SpeechApi>,
    sink: VoiceEventSink,
    samples: mpsc::Receiver<Vec<f32>>,
    ready: oneshot::Receiver<Result<u32, CaptureError>>,
    stop: Arc<AtomicBool>,
) {
    let sample_rate = match tokio::time::timeout(STREAM_STARTUP_TIMEOUT, ready).await {
        Ok(Ok(Ok(rate))) => rate,
        Ok(Ok(Err(e))) => {
            tracing::error!("Failed to open the microphone: {}", e);
            sink.error(e);
            return;
        }
        Ok(Err(_)) => {
            sink.error(CaptureError::DeviceUnavailable(
                "Microphone thread exited before opening the device".to_string(),
            ));
            return;
        }
        Err(_) => {
            stop.store(true, Ordering::Relaxed);
            sink.error(CaptureError::DeviceUnavailable(
                "Timed out opening the microphone".to_string(),
            ));
            return;
        }
    };
    tracing::debug!("Capture {} listening at {} Hz", sink.generation(), sample_rate);
    transcribe_utterances(api, sink, samples, sample_rate).await;
}

fn run_input_stream(
    device_name: Option<String>,
    samples: mpsc::Sender<Vec<f32>>,
    speaking: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    ready: oneshot::Sender<Result<u32, CaptureError>>,
) {
    let stream = match build_input_stream(device_name, samples, speaking) {
        Ok((stream, sample_rate)) => {
            let _ = ready.send(Ok(sample_rate));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(STOP_POLL_INTERVAL);
    }
    drop(stream);
    tracing::debug!("Microphone stream closed");
}

fn build_input_stream(
    device_name: Option<String>,
    samples: mpsc::Sender<Vec<f32>>,
    speaking: Arc<AtomicBool>,
) -> Result<(cpal::Stream, u32), CaptureError> {
    let input = get_or_default_input(device_name).map_err(|e| device_error(format!("{e:#}")))?;
    tracing::info!("Using input device: {:?}", input.name().unwrap_or_default());

    let default_config = input.default_input_config().map_err(device_error)?;
    let input_config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(INPUT_CHUNK_SIZE as u32)),
    };
    let input_channel_count = input_config.channels as usize;
    tracing::info!("Input stream config: {:?}", &input_config);

    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        // The interviewer's own voice must not be transcribed as the candidate.
        if speaking.load(Ordering::Relaxed) {
            return;
        }
        if let Err(e) = samples.try_send(to_mono(data, input_channel_count)) {
            tracing::warn!("Failed to send audio data to buffer: {:?}", e);
        }
    };

    let stream = input
        .build_input_stream(
            &input_config,
            input_data_fn,
            move |err| tracing::error!("An error occurred on input stream: {}", err),
            None,
        )
        .map_err(device_error)?;
    stream.play().map_err(device_error)?;
    Ok((stream, input_config.sample_rate.0))
}

async fn transcribe_utterances(
    api: Arc<SpeechApi>,
    sink: VoiceEventSink,
    mut samples: mpsc::Receiver<Vec<f32>>,
    sample_rate: u32,
) {
    let mut segmenter = UtteranceSegmenter::new(SegmenterConfig::default(), sample_rate);
    while let Some(chunk) = samples.recv().await {
        for event in segmenter.push(&chunk) {
            match event {
                SegmentEvent::SpeechStarted => {
                    tracing::debug!("Candidate speech started");
                    sink.interim("...");
                }
                SegmentEvent::NoSpeech => sink.error(CaptureError::NoSpeech),
                SegmentEvent::Utterance(audio) => {
                    match transcribe(&api, &audio, segmenter.sample_rate()).await {
                        Ok(text) if text.is_empty() => {
                            tracing::debug!("Utterance transcribed to nothing");
                            sink.interim("");
                        }
                        Ok(text) => sink.finalized(text),
                        Err(e) => {
                            tracing::warn!("Transcription failed: {:?}", e);
                            sink.error(CaptureError::Network(format!("{e:#}")));
                        }
                    }
                }
            }
        }
    }
    sink.ended();
}

async fn transcribe(api: &SpeechApi, audio: &[f32], sample_rate: u32) -> Result<String> {
    let wav = {
        let mut resampler =
            create_resampler(sample_rate as f64, TRANSCRIPTION_SAMPLE_RATE, INPUT_CHUNK_SIZE)?;
        let resampled = resample_all(&mut resampler, audio, INPUT_CHUNK_SIZE)?;
        encode_wav(&resampled, TRANSCRIPTION_SAMPLE_RATE as u32)?
    };
    api.transcribe(wav).await
}

/// The write side of an opened output device.
#[derive(Clone)]
struct PlaybackSink {
    producer: Arc<Mutex<HeapProd<f32>>>,
    sample_rate: u32,
}

type OutputReady = Option<Result<PlaybackSink, CaptureError>>;

/// Handle to the output stream thread and the ring buffer feeding it. The device
/// is opened on the thread; playback waits for it through `ready`.
struct OutputStream {
    ready: watch::Receiver<OutputReady>,
    /// Samples pushed but not yet pulled by the device callback.
    queued: Arc<AtomicIsize>,
    flush: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl OutputStream {
    fn open(device_name: Option<String>) -> Result<Self, CaptureError> {
        let flush = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let queued = Arc::new(AtomicIsize::new(0));
        let (ready_tx, ready_rx) = watch::channel::<OutputReady>(None);

        let thread = {
            let flush = flush.clone();
            let stop = stop.clone();
            let queued = queued.clone();
            std::thread::Builder::new()
                .name("speaker".to_string())
                .spawn(move || {
                    let stream = match build_output_stream(device_name, flush, queued) {
                        Ok((stream, sample_rate, producer)) => {
                            let _ = ready_tx.send(Some(Ok(PlaybackSink {
                                producer: Arc::new(Mutex::new(producer)),
                                sample_rate,
                            })));
                            stream
                        }
                        Err(e) => {
                            tracing::error!("Failed to open the output device: {}", e);
                            let _ = ready_tx.send(Some(Err(e)));
                            return;
                        }
                    };
                    while !stop.load(Ordering::Relaxed) {
                        std::thread::sleep(STOP_POLL_INTERVAL);
                    }
                    drop(stream);
                    tracing::debug!("Output stream closed");
                })
                .map_err(device_error)?
        };

        Ok(Self {
            ready: ready_rx,
            queued,
            flush,
            stop,
            thread: Some(thread),
        })
    }

    /// Drops everything still queued for playback.
    fn flush(&self) {
        self.flush.store(true, Ordering::Relaxed);
        self.queued.store(0, Ordering::Relaxed);
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            reap(thread, "Output");
        }
    }
}

/// Resolves once the output thread has opened its device, or failed to.
async fn playback_sink(mut ready: watch::Receiver<OutputReady>) -> Result<PlaybackSink> {
    let opened = tokio::time::timeout(STREAM_STARTUP_TIMEOUT, ready.wait_for(Option::is_some))
        .await
        .context("Timed out opening the output device")?
        .context("Output thread exited before opening the device")?
        .clone();
    match opened {
        Some(Ok(sink)) => Ok(sink),
        Some(Err(e)) => Err(anyhow::anyhow!("Output device unavailable: {e}")),
        None => Err(anyhow::anyhow!("Output device was not opened")),
    }
}

fn build_output_stream(
    device_name: Option<String>,
    flush: Arc<AtomicBool>,
    queued: Arc<AtomicIsize>,
) -> Result<(cpal::Stream, u32, HeapProd<f32>), CaptureError> {
    let output = get_or_default_output(device_name).map_err(|e| device_error(format!("{e:#}")))?;
    tracing::info!("Using output device: {:?}", output.name().unwrap_or_default());

    let default_config = output.default_output_config().map_err(device_error)?;
    let output_config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(OUTPUT_CHUNK_SIZE as u32)),
    };
    let output_channel_count = output_config.channels as usize;
    let output_sample_rate = output_config.sample_rate.0;
    tracing::info!("Output stream config: {:?}", &output_config);

    let audio_out_buffer =
        shared_buffer(output_sample_rate as usize * OUTPUT_LATENCY_MS / 1000);
    let (audio_out_tx, mut audio_out_rx) = audio_out_buffer.split();

    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        if flush.swap(false, Ordering::Relaxed) {
            audio_out_rx.clear();
        }
        let mut played = 0isize;
        for frame in data.chunks_mut(output_channel_count) {
            let sample = match audio_out_rx.try_pop() {
                Some(sample) => {
                    played += 1;
                    sample
                }
                None => 0.0,
            };
            // Mirror mono speech onto left and right; silence any other channels.
            for (channel, slot) in frame.iter_mut().enumerate() {
                *slot = if channel < 2 { sample } else { 0.0 };
            }
        }
        if played > 0 {
            queued.fetch_sub(played, Ordering::Relaxed);
        }
    };

    let stream = output
        .build_output_stream(
            &output_config,
            output_data_fn,
            move |err| tracing::error!("An error occurred on output stream: {}", err),
            None,
        )
        .map_err(device_error)?;
    stream.play().map_err(device_error)?;
    Ok((stream, output_sample_rate, audio_out_tx))
}

/// Speaks one utterance at a time through the output device.
pub struct SpokenPlayback {
    api: Arc<SpeechApi>,
    events: mpsc::Sender<VoiceEvent>,
    speaking: Arc<AtomicBool>,
    output: OutputStream,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SpeechSynthesizer for SpokenPlayback {
    fn speak(&mut self, utterance: Utterance) -> Result<()> {
        self.cancel();
        let handle = tokio::runtime::Handle::try_current()
            .context("Speech playback needs a Tokio runtime")?;

        let api = self.api.clone();
        let events = self.events.clone();
        let speaking = self.speaking.clone();
        let ready = self.output.ready.clone();
        let queued = self.output.queued.clone();

        self.task = Some(handle.spawn(async move {
            let result = match playback_sink(ready).await {
                Ok(output) => {
                    play_utterance(&api, &utterance, &output, &queued, &events, &speaking).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!("Failed to play utterance: {:?}", e);
            }
            finish_speaking(&speaking, &events);
        }));
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                task.abort();
                self.output.flush();
                finish_speaking(&self.speaking, &self.events);
                tracing::debug!("Cancelled speech in progress");
            }
        }
    }
}

impl Drop for SpokenPlayback {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn finish_speaking(speaking: &AtomicBool, events: &mpsc::Sender<VoiceEvent>) {
    if speaking.swap(false, Ordering::Relaxed) {
        if let Err(e) = events.try_send(VoiceEvent::SpeechFinished) {
            tracing::warn!("Failed to deliver speech finished event: {:?}", e);
        }
    }
}

async fn play_utterance(
    api: &SpeechApi,
    utterance: &Utterance,
    output: &PlaybackSink,
    queued: &AtomicIsize,
    events: &mpsc::Sender<VoiceEvent>,
    speaking: &AtomicBool,
) -> Result<()> {
    let pcm = api.synthesize(utterance).await?;
    let samples = {
        let mut out_resampler = create_resampler(
            SPEECH_PCM16_SAMPLE_RATE,
            output.sample_rate as f64,
            OUTPUT_CHUNK_SIZE,
        )?;
        resample_all(&mut out_resampler, &pcm16_to_f32(&pcm), OUTPUT_CHUNK_SIZE)?
    };
    tracing::debug!("Playing {} samples of speech", samples.len());

    speaking.store(true, Ordering::Relaxed);
    if let Err(e) = events.try_send(VoiceEvent::SpeechStarted) {
        tracing::warn!("Failed to deliver speech started event: {:?}", e);
    }

    let mut pending = samples.as_slice();
    while !pending.is_empty() {
        let pushed = {
            let mut producer = output
                .producer
                .lock()
                .map_err(|_| anyhow::anyhow!("Playback buffer lock poisoned"))?;
            producer.push_slice(pending)
        };
        queued.fetch_add(pushed as isize, Ordering::Relaxed);
        pending = &pending[pushed..];
        if !pending.is_empty() {
            tokio::time::sleep(PLAYBACK_POLL_INTERVAL).await;
        }
    }
    while queued.load(Ordering::Relaxed) > 0 {
        tokio::time::sleep(PLAYBACK_POLL_INTERVAL).await;
    }
    Ok(())
}

/// Opens the default microphone and speakers when voice mode is switched on.
pub struct NativeVoiceBackend {
    api: Arc<SpeechApi>,
    input_device: Option<String>,
    output_device: Option<String>,
}

impl NativeVoiceBackend {
    pub fn new(api: Arc<SpeechApi>) -> Self {
        Self {
            api,
            input_device: None,
            output_device: None,
        }
    }

    pub fn with_devices(mut self, input: Option<String>, output: Option<String>) -> Self {
        self.input_device = input;
        self.output_device = output;
        self
    }
}

impl VoiceBackend for NativeVoiceBackend {
    fn acquire(&mut self, events: mpsc::Sender<VoiceEvent>) -> Result<VoiceResource, CaptureError> {
        let speaking = Arc::new(AtomicBool::new(false));
        let output = OutputStream::open(self.output_device.clone())?;
        let capture = MicrophoneCapture::new(
            self.api.clone(),
            self.input_device.clone(),
            speaking.clone(),
        );
        let synth = SpokenPlayback {
            api: self.api.clone(),
            events,
            speaking,
            output,
            task: None,
        };
        Ok(VoiceResource {
            capture: Box::new(capture),
            synth: Box::new(synth),
        })
    }
}
