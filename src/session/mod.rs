//! Turn-taking session: state, cycle tokens and the controller.
//!
//! A session moves through [`SessionState`]s in response to user commands and
//! adapter events. Each entry to [`SessionState::Listening`] starts a new
//! [`CycleToken`]; events stamped with an older token are discarded.

pub mod controller;
pub mod events;

use crate::error::SessionFault;
use serde::Serialize;

pub use controller::{DialogueSessionController, SessionAdapters, SessionHandle};
pub use events::{DisplayEvent, SessionCommand, SessionEvent};

/// Monotonic id of one listen/dispatch/speak cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CycleToken(u64);

impl CycleToken {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The token of the following cycle.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for CycleToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the session is in the conversation turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing active; waiting for the user to start.
    #[default]
    Idle,
    /// Capture is running.
    Listening,
    /// A request is in flight; capture is stopped.
    Dispatching,
    /// The answer is playing, or the resume delay is running.
    Speaking,
    /// A failure was surfaced to the user.
    Error { fault: SessionFault },
}

impl SessionState {
    /// Short lowercase name, for logs and status lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Dispatching => "dispatching",
            Self::Speaking => "speaking",
            Self::Error { .. } => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
