//! Append-only conversation record consumed by the display layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    /// Role name used in the backend conversation context.
    pub fn role(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub id: Uuid,
    pub speaker: Speaker,
    pub text: String,
    pub started_at: DateTime<Utc>,
    /// Set once; the utterance is immutable afterwards.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Utterance {
    fn new(speaker: Speaker, text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            speaker,
            text,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Whether the utterance has been completed.
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// `{role, content}` pair sent to the backend as conversation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTurn {
    pub role: String,
    pub content: String,
}

/// Ordered record of utterances for one session.
#[derive(Debug, Default, Clone)]
pub struct ConversationLog {
    entries: Vec<Utterance>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user utterance. User turns are complete when accepted.
    pub fn append_user(&mut self, text: impl Into<String>) -> Utterance {
        let mut utterance = Utterance::new(Speaker::User, text.into());
        utterance.completed_at = Some(utterance.started_at);
        self.entries.push(utterance.clone());
        utterance
    }

    /// Append an assistant utterance that is about to be spoken.
    ///
    /// It stays open until [`complete`](Self::complete) is called for it.
    pub fn append_assistant(&mut self, text: impl Into<String>) -> Utterance {
        let utterance = Utterance::new(Speaker::Assistant, text.into());
        self.entries.push(utterance.clone());
        utterance
    }

    /// Mark an utterance completed. Returns the completed entry, or `None`
    /// if it is unknown or was already completed.
    pub fn complete(&mut self, id: Uuid) -> Option<Utterance> {
        let entry = self.entries.iter_mut().find(|u| u.id == id)?;
        if entry.completed_at.is_some() {
            return None;
        }
        entry.completed_at = Some(Utc::now());
        Some(entry.clone())
    }

    pub fn entries(&self) -> &[Utterance] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let cleared = self.entries.len();
        self.entries.clear();
        cleared
    }

    /// The last `turns` utterances mapped to backend context entries.
    pub fn context_window(&self, turns: usize) -> Vec<ContextTurn> {
        let skip = self.entries.len().saturating_sub(turns);
        self.entries[skip..]
            .iter()
            .filter(|u| !u.text.trim().is_empty())
            .map(|u| ContextTurn {
                role: u.speaker.role().to_owned(),
                content: u.text.clone(),
            })
            .collect()
    }
}
