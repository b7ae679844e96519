//! Speech playback adapter.
//!
//! The controller hands answer text to a [`SpeechPlayback`] and hears back
//! through tagged [`PlaybackEvent`]s. At most one utterance plays at a time.

pub mod system;

use crate::config::VoicePreferences;
use crate::error::PlaybackFailure;
use crate::session::CycleToken;
use tokio::sync::mpsc;

pub use system::CommandPlayback;

/// Longest text handed to a synthesizer in one call.
pub const MAX_SPEECH_CHARS: usize = 4000;

/// What a playback produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Audio started.
    Start,
    /// Audio finished normally.
    End,
    /// Synthesis failed.
    Error(PlaybackFailure),
}

/// A playback outcome from a specific cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackEvent {
    pub cycle: CycleToken,
    pub outcome: PlaybackOutcome,
}

/// Contract for speech playback adapters.
pub trait SpeechPlayback: Send {
    /// Speak `text` for `cycle`, cancelling anything already playing.
    ///
    /// A cancelled playback emits no further events.
    ///
    /// # Errors
    ///
    /// Returns a failure if playback cannot be started at all.
    fn speak(
        &mut self,
        cycle: CycleToken,
        text: &str,
        preferences: &VoicePreferences,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> std::result::Result<(), PlaybackFailure>;

    /// Stop playback immediately. Safe to call when idle.
    fn cancel(&mut self);

    /// Whether audio is playing or about to play.
    fn is_active(&self) -> bool;
}

/// Prepare answer text for a synthesizer.
///
/// Strips markdown markers (`**`, `*`, backticks, `#` headings, list bullets
/// and `_emphasis_`), turns line breaks into sentence breaks and collapses
/// whitespace. An underscore inside an identifier reads as a space.
pub fn sanitize_for_speech(text: &str) -> String {
    let mut sentences: Vec<String> = Vec::new();
    for line in text.lines() {
        let mut content = line.trim();
        if content.starts_with("```") {
            continue;
        }
        content = content.trim_start_matches('#').trim_start();
        for bullet in ["- ", "+ ", "* ", "• "] {
            if let Some(rest) = content.strip_prefix(bullet) {
                content = rest;
                break;
            }
        }

        let stripped = strip_inline_markers(content);
        let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            continue;
        }
        sentences.push(collapsed);
    }

    let mut out = String::with_capacity(text.len());
    for sentence in sentences {
        if !out.is_empty() {
            if !out.ends_with(['.', '!', '?', ':', ';']) {
                out.push('.');
            }
            out.push(' ');
        }
        out.push_str(&sentence);
    }
    out
}

fn strip_inline_markers(content: &str) -> String {
    let chars: Vec<char> = content
        .chars()
        .filter(|c| !matches!(c, '*' | '`'))
        .collect();
    chars
        .iter()
        .enumerate()
        .filter_map(|(i, &c)| {
            if c != '_' {
                return Some(c);
            }
            let joins_word = i > 0
                && chars[i - 1].is_alphanumeric()
                && chars.get(i + 1).is_some_and(|next| next.is_alphanumeric());
            joins_word.then_some(' ')
        })
        .collect()
}

/// Cut `text` to at most `max_chars`, preferring the last sentence end.
pub fn truncate_for_speech(text: &str, max_chars: usize) -> &str {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text;
    };
    let head = &text[..cut];
    match head.rfind(['.', '!', '?']) {
        Some(end) if end > 0 => &head[..=end],
        _ => head,
    }
}
