//! Configuration types for the voice session.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for a voice session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Turn-taking behaviour.
    pub session: SessionConfig,
    /// Remote coordination backend.
    pub backend: BackendConfig,
    /// Microphone settings.
    pub audio: AudioConfig,
    /// Speech capture / segmentation settings.
    pub capture: CaptureConfig,
    /// Speech playback settings.
    pub playback: PlaybackConfig,
    /// Default voice preferences, used until the settings owner changes them.
    pub voice: VoicePreferences,
    /// Audio level visualisation.
    pub monitor: MonitorConfig,
}

/// Whether capture stops by itself after the first final transcript.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Keep segmenting speech until stopped.
    Continuous,
    /// End the capture after the first final transcript.
    #[default]
    SingleShot,
}

/// Turn-taking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Delay between the end of playback and resuming capture.
    pub resume_delay_ms: u64,
    /// Resume listening automatically after the assistant finishes speaking.
    pub auto_resume: bool,
    /// Number of prior utterances sent as conversation context.
    pub context_turns: usize,
    /// Capture mode requested from the capture adapter.
    pub capture_mode: CaptureMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            resume_delay_ms: 500,
            auto_resume: true,
            context_turns: 4,
            capture_mode: CaptureMode::SingleShot,
        }
    }
}

impl SessionConfig {
    /// Delay before the scheduled resume-to-listening transition fires.
    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }
}

/// Backend endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the coordination service.
    pub base_url: String,
    /// Path of the multi-agent coordination endpoint.
    pub coordinate_path: String,
    /// Path of the speech-to-text endpoint.
    pub transcribe_path: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Agents requested for every task.
    pub agents: Vec<String>,
    /// Sent as `X-User-ID` when set.
    pub user_id: Option<String>,
    /// Conversation session id. A random one is generated when unset.
    pub session_id: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_owned(),
            coordinate_path: "/api/agents/coordinate".to_owned(),
            transcribe_path: "/api/voice/speech-to-text".to_owned(),
            timeout_ms: 30_000,
            agents: vec!["researcher".to_owned(), "analyzer".to_owned()],
            user_id: None,
            session_id: None,
        }
    }
}

impl BackendConfig {
    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Join the base URL with an endpoint path.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Microphone configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate delivered to capture and monitor, in Hz.
    pub input_sample_rate: u32,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            input_device: None,
        }
    }
}

/// Speech capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Language tag sent to the transcription service.
    pub language: String,
    /// RMS energy threshold for speech detection.
    ///
    /// Typical values for f32 samples in \[-1, 1\]:
    ///   - 0.005: very sensitive
    ///   - 0.01:  normal sensitivity (default)
    ///   - 0.02:  noisy environments
    pub threshold: f32,
    /// Silence needed to close a speech segment, in ms.
    pub min_silence_duration_ms: u32,
    /// Shorter segments are discarded as noise, in ms.
    pub min_speech_duration_ms: u32,
    /// A cycle with no speech onset for this long ends without a transcript.
    pub no_speech_timeout_ms: u64,
    /// Segments are force-closed after this long, in ms.
    pub max_utterance_ms: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            language: "en".to_owned(),
            threshold: 0.01,
            min_silence_duration_ms: 1200,
            min_speech_duration_ms: 300,
            no_speech_timeout_ms: 8_000,
            max_utterance_ms: 30_000,
        }
    }
}

/// Speech playback configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Synthesizer program to run. Found on `PATH` when unset.
    pub command: Option<PathBuf>,
}

/// Voice settings read by the playback adapter at speak time.
///
/// Only the settings owner changes these; the session controller reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoicePreferences {
    /// Synthesizer voice name (None = synthesizer default).
    pub voice_id: Option<String>,
    /// Speech rate multiplier (0.5–2.0).
    pub rate: f32,
    /// Output volume (0.0–1.0).
    pub volume: f32,
    /// BCP-47 language tag.
    pub language: String,
}

impl Default for VoicePreferences {
    fn default() -> Self {
        Self {
            voice_id: None,
            rate: 1.0,
            volume: 1.0,
            language: "en-US".to_owned(),
        }
    }
}

impl VoicePreferences {
    /// Lowest accepted speech rate.
    pub const MIN_RATE: f32 = 0.5;
    /// Highest accepted speech rate.
    pub const MAX_RATE: f32 = 2.0;

    /// Rate clamped to the supported range. NaN falls back to 1.0.
    pub fn clamped_rate(&self) -> f32 {
        if self.rate.is_nan() {
            return 1.0;
        }
        self.rate.clamp(Self::MIN_RATE, Self::MAX_RATE)
    }

    /// Volume clamped to 0.0–1.0. NaN falls back to 1.0.
    pub fn clamped_volume(&self) -> f32 {
        if self.volume.is_nan() {
            return 1.0;
        }
        self.volume.clamp(0.0, 1.0)
    }
}

/// Audio level monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Whether level samples are produced while listening.
    pub enabled: bool,
    /// Number of frequency bins per sample.
    pub bins: usize,
    /// FFT window size (power of two).
    pub fft_size: usize,
    /// Upper bound on samples emitted per second.
    pub max_rate_hz: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bins: 32,
            fft_size: 512,
            max_rate_hz: 30,
        }
    }
}

impl VoiceConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::VoiceError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::VoiceError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    ///
    /// Resolves to `dirs::config_dir()/copilot-voice/config.toml`. Override the
    /// directory with the `COPILOT_VOICE_CONFIG_DIR` environment variable.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        let dir = match std::env::var_os("COPILOT_VOICE_CONFIG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .map(|d| d.join("copilot-voice"))
                .unwrap_or_else(|| PathBuf::from("/tmp/copilot-voice")),
        };
        dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = VoiceConfig::default();
        assert!(config.audio.input_sample_rate > 0);
        assert_eq!(config.session.context_turns, 4);
        assert!(config.session.auto_resume);
        assert!(config.backend.timeout_ms > 0);
        assert!(config.monitor.fft_size.is_power_of_two());
        assert!(config.monitor.bins > 0);
        assert_eq!(config.session.capture_mode, CaptureMode::SingleShot);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = VoiceConfig::default();
        config.session.resume_delay_ms = 750;
        config.backend.user_id = Some("user-7".to_owned());
        config.voice.rate = 1.5;

        config.save_to_file(&path).unwrap();
        assert!(path.exists());

        let loaded = VoiceConfig::from_file(&path).unwrap();
        assert_eq!(loaded.session.resume_delay_ms, 750);
        assert_eq!(loaded.backend.user_id.as_deref(), Some("user-7"));
        assert!((loaded.voice.rate - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = VoiceConfig::from_file(std::path::Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();

        assert!(VoiceConfig::from_file(&path).is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml_str = r#"
[session]
capture_mode = "continuous"

[backend]
base_url = "https://copilot.example.com/"
"#;
        let config: VoiceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.session.capture_mode, CaptureMode::Continuous);
        assert_eq!(config.session.resume_delay_ms, 500);
        assert_eq!(
            config.backend.endpoint(&config.backend.coordinate_path),
            "https://copilot.example.com/api/agents/coordinate"
        );
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = VoiceConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert!(path_str.contains("copilot-voice"));
    }

    #[test]
    fn voice_preferences_clamp_out_of_range_values() {
        let prefs = VoicePreferences {
            rate: 3.0,
            volume: -0.2,
            ..VoicePreferences::default()
        };
        assert!((prefs.clamped_rate() - 2.0).abs() < f32::EPSILON);
        assert!(prefs.clamped_volume().abs() < f32::EPSILON);

        let slow = VoicePreferences {
            rate: 0.1,
            volume: f32::NAN,
            ..VoicePreferences::default()
        };
        assert!((slow.clamped_rate() - 0.5).abs() < f32::EPSILON);
        assert!((slow.clamped_volume() - 1.0).abs() < f32::EPSILON);
    }
}
