//! Speech capture adapter.
//!
//! The controller starts and stops capture; the adapter reports what it heard
//! as tagged [`CaptureOutcome`]s stamped with the cycle that started it.
//! Adapters never restart themselves.

pub mod transcriber;

use crate::audio::AudioChunk;
use crate::audio::microphone::{Microphone, MicrophoneStream};
use crate::config::{CaptureConfig, CaptureMode};
use crate::error::CaptureErrorKind;
use crate::session::CycleToken;
use crate::vad::EnergyVad;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use transcriber::{BackendTranscriber, Transcriber};

/// What a capture cycle produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Partial transcript; superseded by the next event.
    Interim(String),
    /// Completed transcript.
    Final(String),
    /// Capture finished. Always the last event of a cycle.
    End,
    /// Capture failed.
    Error(CaptureErrorKind),
}

/// A capture outcome from a specific cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEvent {
    pub cycle: CycleToken,
    pub outcome: CaptureOutcome,
}

/// Contract for speech capture adapters.
#[async_trait]
pub trait SpeechCapture: Send {
    /// Begin capturing for `cycle`. Events are sent on `events`.
    ///
    /// # Errors
    ///
    /// Returns the error kind if capture cannot begin (permission, device).
    async fn start(
        &mut self,
        cycle: CycleToken,
        mode: CaptureMode,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> std::result::Result<(), CaptureErrorKind>;

    /// Request termination. Idempotent. An `End` event follows eventually.
    fn stop(&mut self);

    /// Whether capture currently holds the microphone.
    fn is_active(&self) -> bool;

    /// Live microphone audio for visualisation, while active.
    fn audio_tap(&self) -> Option<broadcast::Receiver<AudioChunk>> {
        None
    }
}

struct ActiveCapture {
    cancel: CancellationToken,
    tap: broadcast::Receiver<AudioChunk>,
    task: JoinHandle<()>,
}

/// Capture adapter that segments microphone audio with [`EnergyVad`] and
/// transcribes each segment with a [`Transcriber`].
pub struct VadSpeechCapture {
    microphone: Arc<dyn Microphone>,
    transcriber: Arc<dyn Transcriber>,
    config: CaptureConfig,
    active: Option<ActiveCapture>,
}

impl VadSpeechCapture {
    pub fn new(
        microphone: Arc<dyn Microphone>,
        transcriber: Arc<dyn Transcriber>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            microphone,
            transcriber,
            config,
            active: None,
        }
    }
}

#[async_trait]
impl SpeechCapture for VadSpeechCapture {
    async fn start(
        &mut self,
        cycle: CycleToken,
        mode: CaptureMode,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> std::result::Result<(), CaptureErrorKind> {
        self.stop();

        let stream = self.microphone.open().await?;
        let rx = stream.subscribe();
        let tap = stream.subscribe();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_capture_loop(
            stream,
            rx,
            Arc::clone(&self.transcriber),
            self.config.clone(),
            CaptureRun {
                cycle,
                mode,
                events,
                cancel: cancel.clone(),
            },
        ));

        info!(%cycle, ?mode, "speech capture started");
        self.active = Some(ActiveCapture { cancel, tap, task });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            debug!("stopping speech capture");
            active.cancel.cancel();
        }
    }

    fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    fn audio_tap(&self) -> Option<broadcast::Receiver<AudioChunk>> {
        self.active.as_ref().map(|active| active.tap.resubscribe())
    }
}

impl Drop for VadSpeechCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Per-cycle parameters of a capture loop.
struct CaptureRun {
    cycle: CycleToken,
    mode: CaptureMode,
    events: mpsc::UnboundedSender<CaptureEvent>,
    cancel: CancellationToken,
}

impl CaptureRun {
    fn emit(&self, outcome: CaptureOutcome) {
        let _ = self.events.send(CaptureEvent {
            cycle: self.cycle,
            outcome,
        });
    }
}

async fn run_capture_loop(
    stream: MicrophoneStream,
    mut rx: broadcast::Receiver<AudioChunk>,
    transcriber: Arc<dyn Transcriber>,
    config: CaptureConfig,
    run: CaptureRun,
) {
    let mut vad = EnergyVad::new(&config, stream.sample_rate());
    let no_speech_window = Duration::from_millis(config.no_speech_timeout_ms);
    let no_speech = tokio::time::sleep(no_speech_window);
    tokio::pin!(no_speech);
    let mut speaking = false;

    loop {
        tokio::select! {
            () = run.cancel.cancelled() => break,
            () = &mut no_speech, if !speaking => {
                info!(cycle = %run.cycle, "no speech before timeout, ending capture");
                break;
            }
            chunk = rx.recv() => {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("capture lagged, skipped {skipped} chunks");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        run.emit(CaptureOutcome::Error(CaptureErrorKind::MicrophoneUnavailable));
                        break;
                    }
                };

                let segment = vad.process_chunk(&chunk);
                let was_speaking = speaking;
                speaking = vad.in_speech();
                if was_speaking && !speaking && segment.is_none() {
                    no_speech.as_mut().reset(tokio::time::Instant::now() + no_speech_window);
                }
                let Some(segment) = segment else { continue };

                debug!("transcribing {:.1}s segment", segment.duration_secs());
                let result = tokio::select! {
                    () = run.cancel.cancelled() => None,
                    result = transcriber.transcribe(&segment) => Some(result),
                };
                let Some(result) = result else { break };

                match result {
                    Ok(text) if !text.trim().is_empty() => {
                        run.emit(CaptureOutcome::Final(text.trim().to_owned()));
                        if run.mode == CaptureMode::SingleShot {
                            break;
                        }
                    }
                    Ok(_) => {
                        debug!("blank transcription");
                        if run.mode == CaptureMode::SingleShot {
                            break;
                        }
                    }
                    Err(kind) => {
                        run.emit(CaptureOutcome::Error(kind));
                        break;
                    }
                }
                speaking = false;
                no_speech.as_mut().reset(tokio::time::Instant::now() + no_speech_window);
            }
        }
    }

    // Release the microphone before announcing the end of the cycle.
    drop(rx);
    drop(stream);
    run.emit(CaptureOutcome::End);
    debug!(cycle = %run.cycle, "speech capture ended");
}
