//! Microphone level monitor for visualisation.
//!
//! Reads the same chunk broadcast as capture and publishes band magnitudes at
//! a bounded rate. Nothing here feeds back into turn-taking: the monitor only
//! logs its own failures and stops.

use crate::audio::{AudioChunk, rms};
use crate::config::MonitorConfig;
use crate::session::DisplayEvent;
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One visualisation frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSample {
    /// Band magnitudes in 0.0-1.0, lowest frequency first.
    pub bins: Vec<f32>,
    /// RMS of the analysed window.
    pub rms: f32,
}

/// Hann-windowed magnitude spectrum grouped into equal-width bands.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    window_gain: f32,
    bands: usize,
    buf: Vec<Complex32>,
}

impl SpectrumAnalyzer {
    /// `fft_size` is the analysis window; `bands` the number of output bins.
    pub fn new(fft_size: usize, bands: usize) -> Self {
        let fft_size = fft_size.max(2);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let window: Vec<f32> = (0..fft_size)
            .map(|n| {
                0.5 * (1.0
                    - (2.0 * std::f32::consts::PI * n as f32 / (fft_size - 1) as f32).cos())
            })
            .collect();
        let window_gain = window.iter().sum::<f32>().max(f32::EPSILON);
        Self {
            fft,
            window,
            window_gain,
            bands: bands.max(1),
            buf: vec![Complex32::new(0.0, 0.0); fft_size],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    /// Analyse the first `fft_size` samples of `frame` (zero-padded if short).
    pub fn analyze(&mut self, frame: &[f32]) -> Vec<f32> {
        for (i, (slot, w)) in self.buf.iter_mut().zip(&self.window).enumerate() {
            let s = frame.get(i).copied().unwrap_or(0.0);
            *slot = Complex32::new(s * w, 0.0);
        }
        self.fft.process(&mut self.buf);

        let half = self.buf.len() / 2;
        let mut out = vec![0.0f32; self.bands];
        for (b, slot) in out.iter_mut().enumerate() {
            let start = (b * half) / self.bands;
            let end = (((b + 1) * half) / self.bands).max(start + 1).min(half);
            if end <= start {
                continue;
            }
            let sum: f32 = self.buf[start..end]
                .iter()
                .map(|c| (c.re * c.re + c.im * c.im).sqrt())
                .sum();
            let mean = sum / (end - start) as f32;
            // A full-scale sine peaks at 1.0.
            *slot = (2.0 * mean / self.window_gain).clamp(0.0, 1.0);
        }
        out
    }
}

/// Lets through at most one emission per interval.
#[derive(Debug, Clone)]
struct RateGate {
    interval: Duration,
    last: Option<Instant>,
}

impl RateGate {
    fn new(max_rate_hz: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / max_rate_hz.max(1),
            last: None,
        }
    }

    fn allow(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Spawns level monitors over live microphone audio.
#[derive(Debug, Clone)]
pub struct AudioLevelMonitor {
    config: MonitorConfig,
}

impl AudioLevelMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Run until `cancel` fires or the audio stream closes.
    pub fn spawn(
        &self,
        audio: broadcast::Receiver<AudioChunk>,
        display: broadcast::Sender<DisplayEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let analyzer = SpectrumAnalyzer::new(self.config.fft_size, self.config.bins);
        let gate = RateGate::new(self.config.max_rate_hz);
        tokio::spawn(run_monitor(audio, display, cancel, analyzer, gate))
    }
}

async fn run_monitor(
    mut audio: broadcast::Receiver<AudioChunk>,
    display: broadcast::Sender<DisplayEvent>,
    cancel: CancellationToken,
    mut analyzer: SpectrumAnalyzer,
    mut gate: RateGate,
) {
    let window = analyzer.fft_size();
    let mut pending: Vec<f32> = Vec::with_capacity(window * 2);
    debug!("level monitor started");

    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => break,
            chunk = audio.recv() => chunk,
        };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("level monitor lagged, skipped {skipped} chunks");
                pending.clear();
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        pending.extend_from_slice(&chunk.samples);
        if pending.len() < window {
            continue;
        }
        let frame_start = pending.len() - window;
        if gate.allow(Instant::now()) {
            let frame = &pending[frame_start..];
            let sample = LevelSample {
                bins: analyzer.analyze(frame),
                rms: rms(frame),
            };
            if sample.bins.iter().any(|b| !b.is_finite()) {
                warn!("level monitor produced non-finite bins, stopping");
                break;
            }
            // No display subscribers is not an error.
            let _ = display.send(DisplayEvent::AudioLevel { sample });
        }
        pending.drain(..frame_start);
    }

    debug!("level monitor stopped");
}
