//! Voice activity detection using energy-based analysis.
//!
//! RMS energy thresholding splits the microphone stream into speech
//! segments for batch transcription.

use crate::audio::{AudioChunk, SpeechSegment, rms};
use crate::config::CaptureConfig;
use std::time::Instant;
use tracing::{debug, info};

/// Voice activity detector using RMS energy thresholding.
pub struct EnergyVad {
    /// Accumulated samples for the current speech segment.
    speech_buffer: Vec<f32>,
    /// Whether we are currently in a speech segment.
    in_speech: bool,
    /// Consecutive silent samples inside the current segment.
    silence_samples: usize,
    /// Silent samples that close a segment.
    silence_limit: usize,
    /// Segments shorter than this are dropped.
    min_speech_samples: usize,
    /// Segments are force-closed at this length.
    max_speech_samples: usize,
    /// When the current speech segment started.
    speech_start: Option<Instant>,
    sample_rate: u32,
    threshold: f32,
}

impl EnergyVad {
    pub fn new(config: &CaptureConfig, sample_rate: u32) -> Self {
        let ms = |ms: u32| (ms as u64 * sample_rate as u64 / 1000) as usize;

        info!(
            "VAD initialized: threshold={}, silence={}ms, min_speech={}ms",
            config.threshold, config.min_silence_duration_ms, config.min_speech_duration_ms
        );

        Self {
            speech_buffer: Vec::new(),
            in_speech: false,
            silence_samples: 0,
            silence_limit: ms(config.min_silence_duration_ms).max(1),
            min_speech_samples: ms(config.min_speech_duration_ms),
            max_speech_samples: ms(config.max_utterance_ms).max(1),
            speech_start: None,
            sample_rate,
            threshold: config.threshold,
        }
    }

    /// Whether a speech segment is currently open.
    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Process an audio chunk and return a speech segment if a complete
    /// utterance has been detected.
    pub fn process_chunk(&mut self, chunk: &AudioChunk) -> Option<SpeechSegment> {
        let is_speech = rms(&chunk.samples) > self.threshold;

        if is_speech {
            if !self.in_speech {
                debug!("speech onset");
                self.in_speech = true;
                self.speech_start = Some(chunk.captured_at);
                self.speech_buffer.clear();
            }
            self.silence_samples = 0;
            self.speech_buffer.extend_from_slice(&chunk.samples);
            if self.speech_buffer.len() >= self.max_speech_samples {
                debug!("max utterance length reached, closing segment");
                return self.close_segment();
            }
        } else if self.in_speech {
            self.silence_samples += chunk.samples.len();
            // Trailing silence within tolerance stays in the segment.
            self.speech_buffer.extend_from_slice(&chunk.samples);

            if self.silence_samples >= self.silence_limit {
                return self.close_segment();
            }
        }

        None
    }

    fn close_segment(&mut self) -> Option<SpeechSegment> {
        self.in_speech = false;
        self.silence_samples = 0;
        let started_at = self.speech_start.take().unwrap_or_else(Instant::now);

        if self.speech_buffer.len() >= self.min_speech_samples {
            return Some(SpeechSegment {
                samples: std::mem::take(&mut self.speech_buffer),
                sample_rate: self.sample_rate,
                started_at,
            });
        }
        debug!(
            "dropping short segment ({} samples)",
            self.speech_buffer.len()
        );
        self.speech_buffer.clear();
        None
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn config() -> CaptureConfig {
        CaptureConfig {
            threshold: 0.01,
            min_silence_duration_ms: 100,
            min_speech_duration_ms: 50,
            max_utterance_ms: 2_000,
            ..CaptureConfig::default()
        }
    }

    fn chunk(level: f32, len: usize) -> AudioChunk {
        AudioChunk {
            samples: vec![level; len],
            sample_rate: 16_000,
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn silence_never_opens_segment() {
        let mut vad = EnergyVad::new(&config(), 16_000);
        for _ in 0..20 {
            assert!(vad.process_chunk(&chunk(0.0, 512)).is_none());
        }
        assert!(!vad.in_speech());
    }

    #[test]
    fn speech_then_silence_closes_segment() {
        let mut vad = EnergyVad::new(&config(), 16_000);
        // 5 x 512 samples = 160ms of speech.
        for _ in 0..5 {
            assert!(vad.process_chunk(&chunk(0.2, 512)).is_none());
        }
        assert!(vad.in_speech());

        // 100ms silence = 1600 samples; the fourth silent chunk closes it.
        let mut segment = None;
        for _ in 0..4 {
            segment = vad.process_chunk(&chunk(0.0, 512));
        }
        let segment = segment.unwrap();
        assert_eq!(segment.samples.len(), 9 * 512);
        assert!(!vad.in_speech());
    }

    #[test]
    fn short_blip_is_dropped() {
        let mut vad = EnergyVad::new(&config(), 16_000);
        vad.process_chunk(&chunk(0.5, 160)); // 10ms
        let mut out = None;
        for _ in 0..4 {
            out = out.or(vad.process_chunk(&chunk(0.0, 512)));
        }
        assert!(out.is_none());
    }

    #[test]
    fn long_speech_is_force_closed() {
        let mut vad = EnergyVad::new(&config(), 16_000);
        let mut closed = None;
        for _ in 0..70 {
            if let Some(s) = vad.process_chunk(&chunk(0.3, 512)) {
                closed = Some(s);
                break;
            }
        }
        let segment = closed.unwrap();
        assert!(segment.samples.len() >= 32_000);
    }
}
