//! Fake adapters shared by controller tests.
//!
//! The fakes share an [`Activity`] record and count every moment capture and
//! playback would have been active together.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::audio::AudioChunk;
use crate::backend::{Answer, BackendClient, RequestContext};
use crate::capture::{CaptureEvent, CaptureOutcome, SpeechCapture};
use crate::config::{CaptureMode, VoicePreferences};
use crate::error::{CaptureErrorKind, DispatchFailure, PlaybackFailure};
use crate::playback::{PlaybackEvent, PlaybackOutcome, SpeechPlayback};
use crate::session::CycleToken;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, broadcast, mpsc};

/// Which fake adapters are active, plus overlap violations seen so far.
#[derive(Debug, Default)]
pub struct Activity {
    capture: AtomicBool,
    playback: AtomicBool,
    violations: AtomicUsize,
}

impl Activity {
    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    fn activate_capture(&self) {
        if self.playback.load(Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.capture.store(true, Ordering::SeqCst);
    }

    fn activate_playback(&self) {
        if self.capture.load(Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.playback.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CaptureShared {
    starts: Vec<(CycleToken, CaptureMode)>,
    events: Option<(CycleToken, mpsc::UnboundedSender<CaptureEvent>)>,
    deny: Option<CaptureErrorKind>,
}

/// Capture adapter driven by the test.
#[derive(Clone)]
pub struct FakeCapture {
    activity: Arc<Activity>,
    shared: Arc<Mutex<CaptureShared>>,
    tap: broadcast::Sender<AudioChunk>,
}

impl FakeCapture {
    pub fn new(activity: Arc<Activity>) -> Self {
        let (tap, _) = broadcast::channel(16);
        Self {
            activity,
            shared: Arc::default(),
            tap,
        }
    }

    /// Make the next starts fail with `kind`; `None` lets them succeed.
    pub fn deny_with(&self, kind: Option<CaptureErrorKind>) {
        self.shared.lock().unwrap().deny = kind;
    }

    pub fn starts(&self) -> Vec<(CycleToken, CaptureMode)> {
        self.shared.lock().unwrap().starts.clone()
    }

    /// Emit an outcome for the most recently started cycle.
    pub fn emit(&self, outcome: CaptureOutcome) {
        let shared = self.shared.lock().unwrap();
        if let Some((cycle, tx)) = &shared.events {
            let _ = tx.send(CaptureEvent {
                cycle: *cycle,
                outcome,
            });
        }
    }

    /// Emit an outcome stamped with an arbitrary cycle.
    pub fn emit_for(&self, cycle: CycleToken, outcome: CaptureOutcome) {
        let shared = self.shared.lock().unwrap();
        if let Some((_, tx)) = &shared.events {
            let _ = tx.send(CaptureEvent { cycle, outcome });
        }
    }

    /// End the cycle on the adapter's own initiative (silence timeout).
    pub fn end(&self) {
        self.activity.capture.store(false, Ordering::SeqCst);
        self.emit(CaptureOutcome::End);
    }
}

#[async_trait]
impl SpeechCapture for FakeCapture {
    async fn start(
        &mut self,
        cycle: CycleToken,
        mode: CaptureMode,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> std::result::Result<(), CaptureErrorKind> {
        let mut shared = self.shared.lock().unwrap();
        if let Some(kind) = shared.deny.clone() {
            return Err(kind);
        }
        self.activity.activate_capture();
        shared.starts.push((cycle, mode));
        shared.events = Some((cycle, events));
        Ok(())
    }

    fn stop(&mut self) {
        if self.activity.capture.swap(false, Ordering::SeqCst) {
            self.emit(CaptureOutcome::End);
        }
    }

    fn is_active(&self) -> bool {
        self.activity.capture.load(Ordering::SeqCst)
    }

    fn audio_tap(&self) -> Option<broadcast::Receiver<AudioChunk>> {
        self.is_active().then(|| self.tap.subscribe())
    }
}

/// One call to [`FakePlayback::speak`].
#[derive(Debug, Clone)]
pub struct Spoken {
    pub cycle: CycleToken,
    pub text: String,
    pub preferences: VoicePreferences,
}

#[derive(Default)]
struct PlaybackShared {
    spoken: Vec<Spoken>,
    events: Option<(CycleToken, mpsc::UnboundedSender<PlaybackEvent>)>,
    refuse: Option<PlaybackFailure>,
    cancels: usize,
}

/// Playback adapter driven by the test.
#[derive(Clone)]
pub struct FakePlayback {
    activity: Arc<Activity>,
    shared: Arc<Mutex<PlaybackShared>>,
}

impl FakePlayback {
    pub fn new(activity: Arc<Activity>) -> Self {
        Self {
            activity,
            shared: Arc::default(),
        }
    }

    pub fn spoken(&self) -> Vec<Spoken> {
        self.shared.lock().unwrap().spoken.clone()
    }

    pub fn cancels(&self) -> usize {
        self.shared.lock().unwrap().cancels
    }

    /// Make the next `speak` calls fail immediately.
    pub fn refuse_with(&self, failure: Option<PlaybackFailure>) {
        self.shared.lock().unwrap().refuse = failure;
    }

    /// Finish the current utterance normally.
    pub fn finish(&self) {
        self.activity.playback.store(false, Ordering::SeqCst);
        self.send(PlaybackOutcome::End);
    }

    /// Fail the current utterance.
    pub fn fail(&self, failure: PlaybackFailure) {
        self.activity.playback.store(false, Ordering::SeqCst);
        self.send(PlaybackOutcome::Error(failure));
    }

    /// Send an outcome for the last spoken cycle without touching activity.
    pub fn send(&self, outcome: PlaybackOutcome) {
        let shared = self.shared.lock().unwrap();
        if let Some((cycle, tx)) = &shared.events {
            let _ = tx.send(PlaybackEvent {
                cycle: *cycle,
                outcome,
            });
        }
    }
}

impl SpeechPlayback for FakePlayback {
    fn speak(
        &mut self,
        cycle: CycleToken,
        text: &str,
        preferences: &VoicePreferences,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> std::result::Result<(), PlaybackFailure> {
        let mut shared = self.shared.lock().unwrap();
        if let Some(failure) = shared.refuse.clone() {
            return Err(failure);
        }
        self.activity.activate_playback();
        shared.spoken.push(Spoken {
            cycle,
            text: text.to_owned(),
            preferences: preferences.clone(),
        });
        let _ = events.send(PlaybackEvent {
            cycle,
            outcome: PlaybackOutcome::Start,
        });
        shared.events = Some((cycle, events));
        Ok(())
    }

    fn cancel(&mut self) {
        if self.activity.playback.swap(false, Ordering::SeqCst) {
            self.shared.lock().unwrap().cancels += 1;
        }
    }

    fn is_active(&self) -> bool {
        self.activity.playback.load(Ordering::SeqCst)
    }
}

/// Backend returning queued results, optionally held until released.
#[derive(Default)]
pub struct FakeBackend {
    results: Mutex<VecDeque<std::result::Result<Answer, DispatchFailure>>>,
    calls: Mutex<Vec<(String, RequestContext)>>,
    hold: AtomicBool,
    release: Notify,
}

impl FakeBackend {
    pub fn answering(texts: &[&str]) -> Self {
        let backend = Self::default();
        for text in texts {
            backend.push(Ok(Answer {
                text: (*text).to_owned(),
                workflow_id: None,
            }));
        }
        backend
    }

    pub fn push(&self, result: std::result::Result<Answer, DispatchFailure>) {
        self.results.lock().unwrap().push_back(result);
    }

    /// Hold every response until [`release`](Self::release).
    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.release.notify_waiters();
    }

    pub fn calls(&self) -> Vec<(String, RequestContext)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendClient for FakeBackend {
    async fn send(
        &self,
        utterance_text: &str,
        context: &RequestContext,
    ) -> std::result::Result<Answer, DispatchFailure> {
        self.calls
            .lock()
            .unwrap()
            .push((utterance_text.to_owned(), context.clone()));
        if self.hold.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(DispatchFailure::Malformed {
                message: "no scripted answer".to_owned(),
            }))
    }
}
