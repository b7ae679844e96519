//! Error types for the voice session.
//!
//! [`VoiceError`] covers setup and plumbing failures (devices, config, I/O).
//! Failures that happen *during* a conversation are reported through the
//! closed kinds below and mapped by the controller onto a [`SessionFault`];
//! they never escape as faults of the host process.

use serde::Serialize;

/// Top-level error type for the voice conversation system.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VoiceError>;

/// Why a speech capture cycle failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CaptureErrorKind {
    /// Capture ran but no speech was heard.
    #[error("no speech detected")]
    NoSpeechDetected,
    /// No usable input device.
    #[error("microphone unavailable")]
    MicrophoneUnavailable,
    /// The user or the platform refused microphone access.
    #[error("microphone permission denied")]
    PermissionDenied,
    /// The recognition service could not be reached.
    #[error("speech recognition network error")]
    NetworkError,
    /// Anything else the platform reports, with its code or message.
    #[error("speech recognition failed: {0}")]
    Other(String),
}

/// Why a backend request produced no answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchFailure {
    /// Connection or transport failure.
    #[error("network error: {message}")]
    Network { message: String },
    /// The backend answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    /// The response body did not contain an answer.
    #[error("malformed response: {message}")]
    Malformed { message: String },
    /// No response within the configured window.
    #[error("request timed out")]
    Timeout,
}

/// Why speech synthesis failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PlaybackFailure {
    /// No synthesizer is available on this platform.
    #[error("speech synthesizer unavailable: {0}")]
    Unavailable(String),
    /// The synthesizer started but failed.
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),
}

/// The reason a session entered [`SessionState::Error`](crate::session::SessionState::Error).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionFault {
    /// Microphone access denied. Terminal for the cycle; the user must retry.
    PermissionDenied,
    /// Capture failed (timeout, network, device).
    Capture { error: CaptureErrorKind },
    /// The backend request failed.
    Dispatch { failure: DispatchFailure },
    /// Synthesis failed. The text is not retried.
    Playback { failure: PlaybackFailure },
    /// A platform service is missing entirely.
    AdapterUnavailable { message: String },
}

impl SessionFault {
    /// Short user-facing status line for this fault.
    pub fn status_message(&self) -> String {
        match self {
            Self::PermissionDenied => {
                "Microphone access was denied. Allow microphone access and press start again."
                    .to_owned()
            }
            Self::Capture { error } => match error {
                CaptureErrorKind::NoSpeechDetected => {
                    "I didn't hear anything. Press start to try again.".to_owned()
                }
                CaptureErrorKind::MicrophoneUnavailable => {
                    "No microphone is available.".to_owned()
                }
                CaptureErrorKind::PermissionDenied => {
                    "Microphone access was denied.".to_owned()
                }
                CaptureErrorKind::NetworkError => {
                    "Speech recognition could not reach the network.".to_owned()
                }
                CaptureErrorKind::Other(code) => format!("Speech recognition error: {code}"),
            },
            Self::Dispatch { failure } => format!("Request failed: {failure}"),
            Self::Playback { failure } => format!("Could not speak the response: {failure}"),
            Self::AdapterUnavailable { message } => format!("Voice is unavailable: {message}"),
        }
    }
}

impl SessionFault {
    /// Fault for a capture adapter that could not begin a cycle.
    ///
    /// A missing microphone at start means the platform has no input at all.
    pub fn capture_start(error: CaptureErrorKind) -> Self {
        match error {
            CaptureErrorKind::MicrophoneUnavailable => Self::AdapterUnavailable {
                message: error.to_string(),
            },
            error => Self::from(error),
        }
    }
}

impl From<CaptureErrorKind> for SessionFault {
    fn from(error: CaptureErrorKind) -> Self {
        match error {
            CaptureErrorKind::PermissionDenied => Self::PermissionDenied,
            error => Self::Capture { error },
        }
    }
}

impl From<PlaybackFailure> for SessionFault {
    fn from(failure: PlaybackFailure) -> Self {
        match failure {
            PlaybackFailure::Unavailable(message) => Self::AdapterUnavailable { message },
            failure => Self::Playback { failure },
        }
    }
}
