//! Events flowing into and out of the session controller.

use super::{CycleToken, SessionState};
use crate::backend::Answer;
use crate::capture::CaptureEvent;
use crate::conversation::Utterance;
use crate::error::DispatchFailure;
use crate::monitor::LevelSample;
use crate::playback::PlaybackEvent;
use serde::Serialize;

/// User actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Begin listening.
    Start,
    /// Stop whatever is active. No-op while idle.
    Stop,
    /// Empty the conversation log.
    ClearLog,
    /// Tear down adapters and end the run loop.
    Shutdown,
}

/// Everything the controller reacts to, in one serialized queue.
#[derive(Debug)]
pub enum SessionEvent {
    Command(SessionCommand),
    Capture(CaptureEvent),
    Playback(PlaybackEvent),
    /// A backend request for `cycle` finished.
    Dispatched {
        cycle: CycleToken,
        result: std::result::Result<Answer, DispatchFailure>,
    },
    /// The post-speech resume delay for `cycle` elapsed.
    ResumeDue(CycleToken),
}

/// What the display layer is told.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DisplayEvent {
    StateChanged { state: SessionState },
    /// User-visible status line.
    Status { message: String },
    /// Latest partial transcript of the current cycle.
    InterimTranscript { text: String },
    UtteranceAppended { utterance: Utterance },
    UtteranceCompleted { utterance: Utterance },
    LogCleared,
    AudioLevel { sample: LevelSample },
}
