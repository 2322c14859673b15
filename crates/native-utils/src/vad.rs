//! Energy-based voice activity detection that cuts a continuous microphone stream
//! into utterances.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Analysis window in samples.
    pub hop_size: usize,
    pub rms_threshold: f32,
    pub peak_threshold: f32,
    /// Consecutive quiet hops that end an utterance.
    pub silence_hops: usize,
    /// Utterances with fewer voiced hops are discarded as noise.
    pub min_speech_hops: usize,
    /// Quiet hops kept before speech so the first syllable is not clipped.
    pub pre_speech_hops: usize,
    pub max_utterance_secs: u32,
    /// Idle time after which `NoSpeech` is reported.
    pub no_speech_secs: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            hop_size: 1024,
            rms_threshold: 0.015,
            peak_threshold: 0.03,
            silence_hops: 35,
            min_speech_hops: 10,
            pre_speech_hops: 10,
            max_utterance_secs: 30,
            no_speech_secs: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    SpeechStarted,
    Utterance(Vec<f32>),
    NoSpeech,
}

pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    sample_rate: u32,
    pending: VecDeque<f32>,
    pre_speech: VecDeque<f32>,
    speech: Vec<f32>,
    in_speech: bool,
    speech_hops: usize,
    silence_hops: usize,
    idle_samples: usize,
}

impl UtteranceSegmenter {
    pub fn new(config: SegmenterConfig, sample_rate: u32) -> Self {
        Self {
            config,
            sample_rate,
            pending: VecDeque::new(),
            pre_speech: VecDeque::new(),
            speech: Vec::new(),
            in_speech: false,
            speech_hops: 0,
            silence_hops: 0,
            idle_samples: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Feeds mono samples and returns whatever boundaries they completed.
    pub fn push(&mut self, samples: &[f32]) -> Vec<SegmentEvent> {
        self.pending.extend(samples);
        let hop = self.config.hop_size;
        let mut events = Vec::new();

        while self.pending.len() >= hop {
            let chunk: Vec<f32> = self.pending.drain(..hop).collect();
            let (rms, peak) = level(&chunk);
            let voiced = rms > self.config.rms_threshold || peak > self.config.peak_threshold;

            if voiced {
                if !self.in_speech {
                    self.in_speech = true;
                    self.speech_hops = 0;
                    self.silence_hops = 0;
                    self.speech.extend(self.pre_speech.drain(..));
                    events.push(SegmentEvent::SpeechStarted);
                }
                self.idle_samples = 0;
                self.speech_hops += 1;
                self.silence_hops = 0;
                self.speech.extend_from_slice(&chunk);

                let max_samples = self.sample_rate as usize * self.config.max_utterance_secs as usize;
                if self.speech.len() >= max_samples {
                    tracing::debug!("Utterance hit the {}s cap", self.config.max_utterance_secs);
                    events.push(SegmentEvent::Utterance(std::mem::take(&mut self.speech)));
                    self.reset_speech();
                }
            } else if self.in_speech {
                self.silence_hops += 1;
                self.speech.extend_from_slice(&chunk);
                if self.silence_hops >= self.config.silence_hops {
                    if self.speech_hops >= self.config.min_speech_hops {
                        // Keep half of the trailing silence.
                        let trim = (self.config.silence_hops / 2) * hop;
                        let keep = self.speech.len().saturating_sub(trim);
                        self.speech.truncate(keep);
                        events.push(SegmentEvent::Utterance(std::mem::take(&mut self.speech)));
                    } else {
                        tracing::debug!("Discarding {} voiced hops as noise", self.speech_hops);
                    }
                    self.reset_speech();
                }
            } else {
                self.pre_speech.extend(chunk);
                while self.pre_speech.len() > self.config.pre_speech_hops * hop {
                    self.pre_speech.pop_front();
                }
                self.idle_samples += hop;
                if self.idle_samples >= self.sample_rate as usize * self.config.no_speech_secs as usize {
                    self.idle_samples = 0;
                    events.push(SegmentEvent::NoSpeech);
                }
            }
        }
        events
    }

    fn reset_speech(&mut self) {
        self.speech.clear();
        self.in_speech = false;
        self.speech_hops = 0;
        self.silence_hops = 0;
        self.idle_samples = 0;
    }
}

/// RMS and peak of one analysis window.
fn level(chunk: &[f32]) -> (f32, f32) {
    let mut sumsq = 0.0f32;
    let mut peak = 0.0f32;
    for &sample in chunk {
        peak = peak.max(sample.abs());
        sumsq += sample * sample;
    }
    ((sumsq / chunk.len() as f32).sqrt(), peak)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SegmenterConfig {
        SegmenterConfig {
            hop_size: 100,
            silence_hops: 4,
            min_speech_hops: 3,
            pre_speech_hops: 2,
            max_utterance_secs: 1,
            no_speech_secs: 1,
            ..Default::default()
        }
    }

    fn tone(hops: usize) -> Vec<f32> {
        vec![0.2; hops * 100]
    }

    fn quiet(hops: usize) -> Vec<f32> {
        vec![0.0; hops * 100]
    }

    #[test]
    fn test_utterance_is_cut_after_silence() {
        let mut segmenter = UtteranceSegmenter::new(config(), 1000);
        assert!(segmenter.push(&quiet(2)).is_empty());
        assert_eq!(segmenter.push(&tone(5)), vec![SegmentEvent::SpeechStarted]);

        let events = segmenter.push(&quiet(4));
        let [SegmentEvent::Utterance(samples)] = events.as_slice() else {
            panic!("expected one utterance, got {events:?}");
        };
        // Two pre-speech hops, five voiced hops, half of four silent hops.
        assert_eq!(samples.len(), (2 + 5 + 2) * 100);
    }

    #[test]
    fn test_short_blip_is_discarded() {
        let mut segmenter = UtteranceSegmenter::new(config(), 1000);
        let mut input = tone(2);
        input.extend(quiet(4));
        assert_eq!(segmenter.push(&input), vec![SegmentEvent::SpeechStarted]);
    }

    #[test]
    fn test_long_speech_is_capped() {
        let mut segmenter = UtteranceSegmenter::new(config(), 1000);
        let events = segmenter.push(&tone(10));
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], SegmentEvent::Utterance(s) if s.len() == 1000));
    }

    #[test]
    fn test_silence_reports_no_speech() {
        let mut segmenter = UtteranceSegmenter::new(config(), 1000);
        assert_eq!(segmenter.push(&quiet(10)), vec![SegmentEvent::NoSpeech]);
        // Partial hops wait for more input.
        assert!(segmenter.push(&[0.0; 50]).is_empty());
    }
}
