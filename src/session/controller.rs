//! Dialogue session controller.
//!
//! The controller is the only writer of [`SessionState`]. It owns the capture
//! and playback adapters, starts and stops them, and reacts to their events
//! one at a time from a single queue. Events stamped with a stale
//! [`CycleToken`] are dropped.

use super::events::{DisplayEvent, SessionCommand, SessionEvent};
use super::{CycleToken, SessionState};
use crate::backend::{Answer, BackendClient, RequestContext};
use crate::capture::{CaptureEvent, CaptureOutcome, SpeechCapture};
use crate::config::{SessionConfig, VoiceConfig, VoicePreferences};
use crate::conversation::ConversationLog;
use crate::error::{DispatchFailure, PlaybackFailure, Result, SessionFault, VoiceError};
use crate::monitor::AudioLevelMonitor;
use crate::playback::{PlaybackEvent, PlaybackOutcome, SpeechPlayback};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Command queue depth for [`SessionHandle`].
const COMMAND_CHANNEL_SIZE: usize = 16;
/// Display events buffered per subscriber.
const DISPLAY_CHANNEL_SIZE: usize = 256;

/// The adapters a session drives.
pub struct SessionAdapters {
    pub capture: Box<dyn SpeechCapture>,
    pub playback: Box<dyn SpeechPlayback>,
    pub backend: Arc<dyn BackendClient>,
}

/// The single outstanding backend request.
struct PendingRequest {
    cycle: CycleToken,
    utterance_text: String,
    submitted_at: Instant,
    task: JoinHandle<()>,
}

/// What the playback adapter is currently voicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Voicing {
    /// The answer for the current cycle.
    Answer(Uuid),
    /// A spoken failure notice. Never followed by a resume.
    Announcement(Uuid),
}

/// Clonable front for a running controller.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    display: broadcast::Sender<DisplayEvent>,
}

impl SessionHandle {
    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| VoiceError::Channel("session controller has stopped".to_owned()))
    }

    /// Begin listening.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller is no longer running.
    pub async fn start(&self) -> Result<()> {
        self.send(SessionCommand::Start).await
    }

    /// Stop the active adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller is no longer running.
    pub async fn stop(&self) -> Result<()> {
        self.send(SessionCommand::Stop).await
    }

    /// Empty the conversation log.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller is no longer running.
    pub async fn clear_log(&self) -> Result<()> {
        self.send(SessionCommand::ClearLog).await
    }

    /// End the run loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller is no longer running.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(SessionCommand::Shutdown).await
    }

    /// Receive display events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DisplayEvent> {
        self.display.subscribe()
    }
}

/// Turn-taking state machine over capture, dispatch and playback.
pub struct DialogueSessionController {
    state: SessionState,
    cycle: CycleToken,
    capture: Box<dyn SpeechCapture>,
    playback: Box<dyn SpeechPlayback>,
    backend: Arc<dyn BackendClient>,
    monitor: AudioLevelMonitor,
    monitor_cancel: Option<CancellationToken>,
    log: ConversationLog,
    preferences: watch::Receiver<VoicePreferences>,
    config: SessionConfig,
    session_id: String,
    pending: Option<PendingRequest>,
    voicing: Option<Voicing>,
    resume: Option<CancellationToken>,
    display: broadcast::Sender<DisplayEvent>,
    commands: mpsc::Receiver<SessionCommand>,
    capture_tx: mpsc::UnboundedSender<CaptureEvent>,
    capture_rx: mpsc::UnboundedReceiver<CaptureEvent>,
    playback_tx: mpsc::UnboundedSender<PlaybackEvent>,
    playback_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
    internal_tx: mpsc::UnboundedSender<SessionEvent>,
    internal_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl DialogueSessionController {
    /// Build a controller and the handle that drives it.
    ///
    /// `preferences` is read at speak time; only its sender's owner changes it.
    pub fn new(
        adapters: SessionAdapters,
        config: &VoiceConfig,
        preferences: watch::Receiver<VoicePreferences>,
    ) -> (Self, SessionHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (display, _) = broadcast::channel(DISPLAY_CHANNEL_SIZE);
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let session_id = config
            .backend
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info!(%session_id, "voice session created");

        let controller = Self {
            state: SessionState::Idle,
            cycle: CycleToken::default(),
            capture: adapters.capture,
            playback: adapters.playback,
            backend: adapters.backend,
            monitor: AudioLevelMonitor::new(config.monitor.clone()),
            monitor_cancel: None,
            log: ConversationLog::new(),
            preferences,
            config: config.session.clone(),
            session_id,
            pending: None,
            voicing: None,
            resume: None,
            display: display.clone(),
            commands,
            capture_tx,
            capture_rx,
            playback_tx,
            playback_rx,
            internal_tx,
            internal_rx,
        };
        let handle = SessionHandle {
            commands: command_tx,
            display,
        };
        (controller, handle)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn cycle(&self) -> CycleToken {
        self.cycle
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    /// Whether a backend request is outstanding.
    pub fn has_pending_request(&self) -> bool {
        self.pending.is_some()
    }

    /// Receive display events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DisplayEvent> {
        self.display.subscribe()
    }

    /// Process events until shutdown.
    pub async fn run(mut self) {
        info!("voice session running");
        while let Some(event) = self.next_event().await {
            if !self.handle(event).await {
                break;
            }
        }
        info!("voice session ended");
    }

    /// Wait for the next event. User commands win ties.
    ///
    /// Dropping every [`SessionHandle`] reads as a shutdown.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        tokio::select! {
            biased;
            command = self.commands.recv() => {
                Some(SessionEvent::Command(command.unwrap_or(SessionCommand::Shutdown)))
            }
            Some(event) = self.capture_rx.recv() => Some(SessionEvent::Capture(event)),
            Some(event) = self.playback_rx.recv() => Some(SessionEvent::Playback(event)),
            Some(event) = self.internal_rx.recv() => Some(event),
            else => None,
        }
    }

    /// Apply one event. Returns `false` once the session has shut down.
    pub async fn handle(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Command(command) => return self.on_command(command).await,
            SessionEvent::Capture(event) => self.on_capture(event),
            SessionEvent::Playback(event) => self.on_playback(event),
            SessionEvent::Dispatched { cycle, result } => self.on_dispatched(cycle, result),
            SessionEvent::ResumeDue(cycle) => self.on_resume_due(cycle).await,
        }
        self.check_exclusive();
        true
    }

    async fn on_command(&mut self, command: SessionCommand) -> bool {
        debug!(?command, state = %self.state, "session command");
        match command {
            SessionCommand::Start => self.on_start().await,
            SessionCommand::Stop => self.on_stop(),
            SessionCommand::ClearLog => {
                let cleared = self.log.clear();
                info!("conversation log cleared ({cleared} entries)");
                self.emit(DisplayEvent::LogCleared);
            }
            SessionCommand::Shutdown => {
                self.teardown();
                return false;
            }
        }
        self.check_exclusive();
        true
    }

    async fn on_start(&mut self) {
        match self.state {
            SessionState::Idle | SessionState::Error { .. } => {
                self.silence_announcement();
                self.begin_listening().await;
            }
            _ => debug!(state = %self.state, "start ignored while busy"),
        }
    }

    fn on_stop(&mut self) {
        match self.state {
            SessionState::Idle => {
                // Only a spoken failure notice can still be playing here.
                if self.silence_announcement() {
                    self.status("Stopped.");
                }
            }
            SessionState::Listening => {
                self.capture.stop();
                self.stop_monitor();
                self.set_state(SessionState::Idle);
                self.status("Stopped listening.");
            }
            SessionState::Dispatching => {
                if let Some(pending) = self.pending.take() {
                    pending.task.abort();
                    info!(
                        cycle = %pending.cycle,
                        waited_ms = pending.submitted_at.elapsed().as_millis() as u64,
                        "request abandoned"
                    );
                }
                self.set_state(SessionState::Idle);
                self.status("Request cancelled.");
            }
            SessionState::Speaking => {
                self.cancel_resume();
                self.playback.cancel();
                if let Some(Voicing::Answer(id) | Voicing::Announcement(id)) = self.voicing.take()
                {
                    self.complete_utterance(id);
                }
                self.set_state(SessionState::Idle);
                self.status("Stopped speaking.");
            }
            SessionState::Error { .. } => self.set_state(SessionState::Idle),
        }
    }

    async fn begin_listening(&mut self) {
        self.cancel_resume();
        self.playback.cancel();
        self.cycle = self.cycle.next();
        let cycle = self.cycle;

        match self
            .capture
            .start(cycle, self.config.capture_mode, self.capture_tx.clone())
            .await
        {
            Ok(()) => {
                self.set_state(SessionState::Listening);
                self.start_monitor();
                self.status("Listening...");
            }
            Err(kind) => {
                warn!(%cycle, "capture failed to start: {kind}");
                self.fail(SessionFault::capture_start(kind));
            }
        }
    }

    fn on_capture(&mut self, event: CaptureEvent) {
        if event.cycle != self.cycle || self.state != SessionState::Listening {
            debug!(
                event_cycle = %event.cycle,
                cycle = %self.cycle,
                state = %self.state,
                outcome = ?event.outcome,
                "discarding stale capture event"
            );
            return;
        }

        match event.outcome {
            CaptureOutcome::Interim(text) => self.emit(DisplayEvent::InterimTranscript { text }),
            CaptureOutcome::Final(text) => {
                let text = text.trim();
                if text.is_empty() {
                    debug!("ignoring empty final transcript");
                    return;
                }
                let text = text.to_owned();
                self.capture.stop();
                self.stop_monitor();
                self.dispatch(text);
            }
            CaptureOutcome::End => {
                info!(cycle = %self.cycle, "capture ended without a transcript");
                self.stop_monitor();
                self.set_state(SessionState::Idle);
                self.status("No speech detected. Press start to talk again.");
            }
            CaptureOutcome::Error(kind) => {
                warn!(cycle = %self.cycle, "capture error: {kind}");
                self.capture.stop();
                self.stop_monitor();
                self.fail(SessionFault::from(kind));
            }
        }
    }

    fn dispatch(&mut self, text: String) {
        let cycle = self.cycle;
        let context = RequestContext {
            session_id: self.session_id.clone(),
            conversation: self.log.context_window(self.config.context_turns),
        };
        let utterance = self.log.append_user(text.clone());
        self.emit(DisplayEvent::UtteranceAppended { utterance });
        self.set_state(SessionState::Dispatching);
        self.status("Thinking...");

        let backend = Arc::clone(&self.backend);
        let events = self.internal_tx.clone();
        let request_text = text.clone();
        let task = tokio::spawn(async move {
            let result = backend.send(&request_text, &context).await;
            let _ = events.send(SessionEvent::Dispatched { cycle, result });
        });
        info!(%cycle, chars = text.len(), "utterance dispatched");
        self.pending = Some(PendingRequest {
            cycle,
            utterance_text: text,
            submitted_at: Instant::now(),
            task,
        });
    }

    fn on_dispatched(
        &mut self,
        cycle: CycleToken,
        result: std::result::Result<Answer, DispatchFailure>,
    ) {
        let matches = self.state == SessionState::Dispatching
            && self.pending.as_ref().is_some_and(|p| p.cycle == cycle);
        if !matches {
            debug!(%cycle, state = %self.state, "discarding abandoned response");
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        let elapsed_ms = pending.submitted_at.elapsed().as_millis() as u64;

        match result {
            Ok(answer) => {
                info!(%cycle, elapsed_ms, workflow_id = ?answer.workflow_id, "answer received");
                self.set_state(SessionState::Speaking);
                let utterance = self.log.append_assistant(answer.text.clone());
                let id = utterance.id;
                self.emit(DisplayEvent::UtteranceAppended { utterance });
                self.voicing = Some(Voicing::Answer(id));

                if let Err(failure) = self.speak(&answer.text) {
                    warn!(%cycle, "playback failed to start: {failure}");
                    self.voicing = None;
                    self.complete_utterance(id);
                    self.fail(SessionFault::from(failure));
                }
            }
            Err(failure) => {
                warn!(
                    %cycle,
                    elapsed_ms,
                    utterance = %pending.utterance_text,
                    "dispatch failed: {failure}"
                );
                let notice = announcement_text(&failure);
                self.set_state(SessionState::Error {
                    fault: SessionFault::Dispatch { failure },
                });
                self.status_for_state();
                self.announce(&notice);
                self.set_state(SessionState::Idle);
            }
        }
    }

    /// Record and speak a failure notice. The session does not resume after it.
    fn announce(&mut self, notice: &str) {
        let utterance = self.log.append_assistant(notice);
        let id = utterance.id;
        self.emit(DisplayEvent::UtteranceAppended { utterance });
        self.voicing = Some(Voicing::Announcement(id));
        if let Err(failure) = self.speak(notice) {
            warn!("could not speak failure notice: {failure}");
            self.voicing = None;
            self.complete_utterance(id);
        }
    }

    fn speak(&mut self, text: &str) -> std::result::Result<(), PlaybackFailure> {
        let preferences = self.preferences.borrow().clone();
        self.playback
            .speak(self.cycle, text, &preferences, self.playback_tx.clone())
    }

    fn on_playback(&mut self, event: PlaybackEvent) {
        if event.cycle != self.cycle {
            debug!(event_cycle = %event.cycle, cycle = %self.cycle, "discarding stale playback event");
            return;
        }

        match (event.outcome, self.voicing) {
            (PlaybackOutcome::Start, Some(_)) => debug!(cycle = %self.cycle, "playback started"),
            (PlaybackOutcome::End, Some(Voicing::Announcement(id))) => {
                self.voicing = None;
                self.complete_utterance(id);
            }
            (PlaybackOutcome::Error(failure), Some(Voicing::Announcement(id))) => {
                warn!("failure notice could not be spoken: {failure}");
                self.voicing = None;
                self.complete_utterance(id);
            }
            (PlaybackOutcome::End, Some(Voicing::Answer(id)))
                if self.state == SessionState::Speaking =>
            {
                self.voicing = None;
                self.complete_utterance(id);
                if self.config.auto_resume {
                    self.schedule_resume();
                } else {
                    self.set_state(SessionState::Idle);
                    self.status("Press start to talk again.");
                }
            }
            (PlaybackOutcome::Error(failure), Some(Voicing::Answer(id)))
                if self.state == SessionState::Speaking =>
            {
                warn!(cycle = %self.cycle, "playback error: {failure}");
                self.voicing = None;
                self.complete_utterance(id);
                self.fail(SessionFault::from(failure));
            }
            (outcome, _) => {
                debug!(?outcome, state = %self.state, "ignoring playback event");
            }
        }
    }

    fn schedule_resume(&mut self) {
        let cycle = self.cycle;
        let delay = self.config.resume_delay();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let events = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = events.send(SessionEvent::ResumeDue(cycle));
                }
            }
        });
        debug!(%cycle, delay_ms = delay.as_millis() as u64, "resume scheduled");
        self.resume = Some(cancel);
    }

    async fn on_resume_due(&mut self, cycle: CycleToken) {
        if cycle != self.cycle || self.state != SessionState::Speaking || self.resume.is_none() {
            debug!(%cycle, state = %self.state, "discarding cancelled resume");
            return;
        }
        self.resume = None;
        info!(%cycle, "resuming listening");
        self.begin_listening().await;
    }

    fn cancel_resume(&mut self) {
        if let Some(resume) = self.resume.take() {
            debug!("pending resume cancelled");
            resume.cancel();
        }
    }

    /// Stop a failure notice still playing. Returns whether one was.
    fn silence_announcement(&mut self) -> bool {
        if let Some(Voicing::Announcement(id)) = self.voicing {
            self.playback.cancel();
            self.voicing = None;
            self.complete_utterance(id);
            return true;
        }
        false
    }

    /// Surface a fault. Anything but a permission refusal settles back to idle.
    fn fail(&mut self, fault: SessionFault) {
        let terminal = fault == SessionFault::PermissionDenied;
        self.set_state(SessionState::Error { fault });
        self.status_for_state();
        if !terminal {
            self.set_state(SessionState::Idle);
        }
    }

    fn start_monitor(&mut self) {
        if !self.monitor.enabled() {
            return;
        }
        let Some(tap) = self.capture.audio_tap() else {
            return;
        };
        let cancel = CancellationToken::new();
        self.monitor.spawn(tap, self.display.clone(), cancel.clone());
        self.monitor_cancel = Some(cancel);
    }

    fn stop_monitor(&mut self) {
        if let Some(cancel) = self.monitor_cancel.take() {
            cancel.cancel();
        }
    }

    fn complete_utterance(&mut self, id: Uuid) {
        if let Some(utterance) = self.log.complete(id) {
            self.emit(DisplayEvent::UtteranceCompleted { utterance });
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        info!(cycle = %self.cycle, from = %self.state, to = %state, "session state");
        self.state = state.clone();
        self.emit(DisplayEvent::StateChanged { state });
    }

    fn status(&self, message: &str) {
        self.emit(DisplayEvent::Status {
            message: message.to_owned(),
        });
    }

    fn status_for_state(&self) {
        if let SessionState::Error { fault } = &self.state {
            self.status(&fault.status_message());
        }
    }

    fn emit(&self, event: DisplayEvent) {
        // No display subscribers is fine.
        let _ = self.display.send(event);
    }

    fn check_exclusive(&self) {
        if self.capture.is_active() && self.playback.is_active() {
            warn!(state = %self.state, "capture and playback both active");
        }
    }

    fn teardown(&mut self) {
        info!("shutting down voice session");
        self.cancel_resume();
        self.capture.stop();
        self.playback.cancel();
        self.stop_monitor();
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
        }
        if let Some(Voicing::Answer(id) | Voicing::Announcement(id)) = self.voicing.take() {
            self.complete_utterance(id);
        }
        self.set_state(SessionState::Idle);
    }
}

impl Drop for DialogueSessionController {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
        }
        self.cancel_resume();
        self.stop_monitor();
    }
}

/// Text spoken when a request fails.
pub fn announcement_text(failure: &DispatchFailure) -> String {
    match failure {
        DispatchFailure::Timeout => "Sorry, the assistant took too long to respond.".to_owned(),
        other => format!("Sorry, I could not reach the assistant: {other}"),
    }
}
