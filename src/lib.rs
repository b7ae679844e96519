//! Copilot Voice: full-duplex spoken conversation with the research copilot.
//!
//! This crate sequences one spoken conversation turn after another:
//! Microphone → VAD → STT → Backend → TTS → Microphone
//!
//! # Architecture
//!
//! A single controller owns every adapter and reacts to their events in order:
//! - **Capture**: Records from the microphone via `cpal`, segments speech with an
//!   energy VAD and transcribes it through the backend
//! - **Backend**: Sends each utterance to the agent-coordination endpoint
//! - **Playback**: Speaks answers with the platform synthesizer
//! - **Monitor**: Publishes microphone levels for visualisation while listening
//! - **Session**: The turn-taking state machine tying the above together

pub mod audio;
pub mod backend;
pub mod capture;
pub mod config;
pub mod conversation;
pub mod error;
pub mod monitor;
pub mod playback;
pub mod session;
pub mod vad;

#[cfg(test)]
pub(crate) mod test_utils;

pub use backend::{Answer, BackendClient, HttpBackendClient, RequestContext};
pub use capture::{CaptureEvent, CaptureOutcome, SpeechCapture, VadSpeechCapture};
pub use config::{VoiceConfig, VoicePreferences};
pub use conversation::{ConversationLog, Speaker, Utterance};
pub use error::{Result, SessionFault, VoiceError};
pub use playback::{CommandPlayback, PlaybackEvent, PlaybackOutcome, SpeechPlayback};
pub use session::{
    CycleToken, DialogueSessionController, DisplayEvent, SessionAdapters, SessionHandle,
    SessionState,
};
