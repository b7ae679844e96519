//! Playback through the platform's command-line synthesizer.

use super::{
    MAX_SPEECH_CHARS, PlaybackEvent, PlaybackOutcome, SpeechPlayback, sanitize_for_speech,
    truncate_for_speech,
};
use crate::config::{PlaybackConfig, VoicePreferences};
use crate::error::PlaybackFailure;
use crate::session::CycleToken;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Synthesizers probed on `PATH`, in order.
const CANDIDATES: [&str; 3] = ["espeak-ng", "espeak", "say"];

/// Words per minute at rate 1.0.
const BASE_WPM: f32 = 175.0;

/// How a synthesizer takes its options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgStyle {
    /// `espeak` / `espeak-ng`: `-s wpm -a amplitude -v voice`.
    Espeak,
    /// macOS `say`: `-r wpm -v voice`.
    Say,
    /// Any other program: the text is the only argument.
    Plain,
}

impl ArgStyle {
    fn for_program(program: &Path) -> Self {
        match program.file_stem().and_then(|s| s.to_str()) {
            Some("espeak" | "espeak-ng") => Self::Espeak,
            Some("say") => Self::Say,
            _ => Self::Plain,
        }
    }
}

struct ActivePlayback {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// [`SpeechPlayback`] that runs one synthesizer process per utterance.
///
/// The child is killed on [`cancel`](SpeechPlayback::cancel) or when a new
/// utterance starts.
pub struct CommandPlayback {
    program: Option<PathBuf>,
    active: Option<ActivePlayback>,
}

impl CommandPlayback {
    pub fn new(config: &PlaybackConfig) -> Self {
        let program = match &config.command {
            Some(command) => which::which(command).ok().or_else(|| Some(command.clone())),
            None => CANDIDATES.iter().find_map(|name| which::which(name).ok()),
        };
        match &program {
            Some(path) => info!("speech synthesizer: {}", path.display()),
            None => warn!("no speech synthesizer found on PATH"),
        }
        Self {
            program,
            active: None,
        }
    }

    /// Resolved synthesizer program, if any.
    pub fn program(&self) -> Option<&Path> {
        self.program.as_deref()
    }
}

fn build_args(style: ArgStyle, text: &str, preferences: &VoicePreferences) -> Vec<String> {
    let wpm = (BASE_WPM * preferences.clamped_rate()).round() as u32;
    let mut args = Vec::new();
    match style {
        ArgStyle::Espeak => {
            args.push("-s".to_owned());
            args.push(wpm.to_string());
            args.push("-a".to_owned());
            args.push(((preferences.clamped_volume() * 200.0).round() as u32).to_string());
            let voice = preferences
                .voice_id
                .clone()
                .unwrap_or_else(|| preferences.language.to_ascii_lowercase());
            if !voice.is_empty() {
                args.push("-v".to_owned());
                args.push(voice);
            }
            args.push("--".to_owned());
        }
        ArgStyle::Say => {
            args.push("-r".to_owned());
            args.push(wpm.to_string());
            if let Some(voice) = &preferences.voice_id {
                args.push("-v".to_owned());
                args.push(voice.clone());
            }
            args.push("--".to_owned());
        }
        ArgStyle::Plain => {}
    }
    args.push(text.to_owned());
    args
}

impl SpeechPlayback for CommandPlayback {
    fn speak(
        &mut self,
        cycle: CycleToken,
        text: &str,
        preferences: &VoicePreferences,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> std::result::Result<(), PlaybackFailure> {
        self.cancel();

        let program = self.program.clone().ok_or_else(|| {
            PlaybackFailure::Unavailable("no speech synthesizer found on PATH".to_owned())
        })?;
        let clean = sanitize_for_speech(text);
        let spoken = truncate_for_speech(&clean, MAX_SPEECH_CHARS);
        if spoken.len() < clean.len() {
            debug!(
                "truncated speech from {} to {} bytes",
                clean.len(),
                spoken.len()
            );
        }
        let args = build_args(ArgStyle::for_program(&program), spoken, preferences);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_synthesizer(program, args, cycle, events, cancel.clone()));
        self.active = Some(ActivePlayback { cancel, task });
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            debug!("cancelling speech playback");
            active.cancel.cancel();
        }
    }

    fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }
}

impl Drop for CommandPlayback {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_synthesizer(
    program: PathBuf,
    args: Vec<String>,
    cycle: CycleToken,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    cancel: CancellationToken,
) {
    let emit = |outcome| {
        let _ = events.send(PlaybackEvent { cycle, outcome });
    };

    let spawned = tokio::process::Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            if !cancel.is_cancelled() {
                emit(PlaybackOutcome::Error(PlaybackFailure::Unavailable(format!(
                    "failed to run {}: {e}",
                    program.display()
                ))));
            }
            return;
        }
    };

    if cancel.is_cancelled() {
        let _ = child.kill().await;
        return;
    }
    emit(PlaybackOutcome::Start);

    tokio::select! {
        () = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!("failed to kill synthesizer: {e}");
            }
            debug!(%cycle, "speech playback cancelled");
        }
        status = child.wait() => match status {
            Ok(status) if status.success() => emit(PlaybackOutcome::End),
            Ok(status) => emit(PlaybackOutcome::Error(PlaybackFailure::Synthesis(format!(
                "{} exited with {status}",
                program.display()
            )))),
            Err(e) => emit(PlaybackOutcome::Error(PlaybackFailure::Synthesis(e.to_string()))),
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::time::Duration;

    fn playback_with(command: &str) -> CommandPlayback {
        CommandPlayback::new(&PlaybackConfig {
            command: Some(PathBuf::from(command)),
        })
    }

    async fn next_outcome(rx: &mut mpsc::UnboundedReceiver<PlaybackEvent>) -> PlaybackOutcome {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .outcome
    }

    #[test]
    fn espeak_args_carry_rate_volume_and_voice() {
        let prefs = VoicePreferences {
            voice_id: Some("en-gb".into()),
            rate: 2.0,
            volume: 0.5,
            ..VoicePreferences::default()
        };
        let args = build_args(ArgStyle::Espeak, "Hello.", &prefs);
        assert_eq!(
            args,
            vec!["-s", "350", "-a", "100", "-v", "en-gb", "--", "Hello."]
        );
    }

    #[test]
    fn say_args_skip_volume() {
        let prefs = VoicePreferences {
            rate: 0.5,
            ..VoicePreferences::default()
        };
        let args = build_args(ArgStyle::Say, "Hi", &prefs);
        assert_eq!(args, vec!["-r", "88", "--", "Hi"]);
    }

    #[test]
    fn arg_style_follows_program_name() {
        assert_eq!(
            ArgStyle::for_program(Path::new("/usr/bin/espeak-ng")),
            ArgStyle::Espeak
        );
        assert_eq!(ArgStyle::for_program(Path::new("say")), ArgStyle::Say);
        assert_eq!(ArgStyle::for_program(Path::new("/bin/true")), ArgStyle::Plain);
    }

    #[tokio::test]
    async fn missing_synthesizer_is_unavailable() {
        let mut playback = CommandPlayback {
            program: None,
            active: None,
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = playback.speak(
            CycleToken::new(1),
            "hello",
            &VoicePreferences::default(),
            tx,
        );
        assert!(matches!(result, Err(PlaybackFailure::Unavailable(_))));
        assert!(!playback.is_active());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_process_reports_start_then_end() {
        let mut playback = playback_with("true");
        let (tx, mut rx) = mpsc::unbounded_channel();
        playback
            .speak(CycleToken::new(2), "hello", &VoicePreferences::default(), tx)
            .unwrap();
        assert_eq!(next_outcome(&mut rx).await, PlaybackOutcome::Start);
        assert_eq!(next_outcome(&mut rx).await, PlaybackOutcome::End);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_process_reports_synthesis_error() {
        let mut playback = playback_with("false");
        let (tx, mut rx) = mpsc::unbounded_channel();
        playback
            .speak(CycleToken::new(2), "hello", &VoicePreferences::default(), tx)
            .unwrap();
        assert_eq!(next_outcome(&mut rx).await, PlaybackOutcome::Start);
        assert!(matches!(
            next_outcome(&mut rx).await,
            PlaybackOutcome::Error(PlaybackFailure::Synthesis(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_kills_process_without_end() {
        // `sleep 30` stands in for a long utterance.
        let mut playback = playback_with("sleep");
        let (tx, mut rx) = mpsc::unbounded_channel();
        playback
            .speak(CycleToken::new(4), "30", &VoicePreferences::default(), tx)
            .unwrap();
        assert_eq!(next_outcome(&mut rx).await, PlaybackOutcome::Start);

        playback.cancel();
        playback.cancel();
        assert!(!playback.is_active());
        let after = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(matches!(after, Ok(None) | Err(_)));
    }
}
