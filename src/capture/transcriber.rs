//! Speech-to-text for captured segments.

use crate::audio::SpeechSegment;
use crate::audio::wav::encode_wav_f32_mono;
use crate::config::{BackendConfig, CaptureConfig};
use crate::error::{CaptureErrorKind, Result, VoiceError};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

/// Turns a speech segment into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one segment. An empty string means nothing intelligible.
    ///
    /// # Errors
    ///
    /// Returns the capture error kind the failure maps to.
    async fn transcribe(
        &self,
        segment: &SpeechSegment,
    ) -> std::result::Result<String, CaptureErrorKind>;
}

#[derive(Debug, Deserialize)]
struct TranscriptionBody {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Uploads segments as WAV to the backend speech-to-text endpoint.
pub struct BackendTranscriber {
    client: reqwest::Client,
    url: String,
    language: String,
    user_id: Option<String>,
}

impl BackendTranscriber {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(backend: &BackendConfig, capture: &CaptureConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(backend.timeout())
            .build()
            .map_err(|e| VoiceError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: backend.endpoint(&backend.transcribe_path),
            language: capture.language.clone(),
            user_id: backend.user_id.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for BackendTranscriber {
    async fn transcribe(
        &self,
        segment: &SpeechSegment,
    ) -> std::result::Result<String, CaptureErrorKind> {
        let wav = encode_wav_f32_mono(&segment.samples, segment.sample_rate)
            .map_err(|e| CaptureErrorKind::Other(e.to_string()))?;
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| CaptureErrorKind::Other(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let mut request = self
            .client
            .post(&self.url)
            .query(&[("language", self.language.as_str())])
            .multipart(form);
        if let Some(user_id) = &self.user_id {
            request = request.header("X-User-ID", user_id);
        }

        let response = request.send().await.map_err(|e| {
            warn!("transcription request failed: {e}");
            CaptureErrorKind::NetworkError
        })?;
        let status = response.status();
        if !status.is_success() {
            warn!("transcription endpoint returned HTTP {}", status.as_u16());
            return Err(CaptureErrorKind::Other(format!("http-{}", status.as_u16())));
        }

        let body: TranscriptionBody = response.json().await.map_err(|e| {
            CaptureErrorKind::Other(format!("malformed transcription response: {e}"))
        })?;
        if let Some(error) = body.error {
            return Err(CaptureErrorKind::Other(error));
        }
        let text = body.text.unwrap_or_default();
        info!(
            "transcribed {:.1}s segment ({} chars)",
            segment.duration_secs(),
            text.len()
        );
        Ok(text)
    }
}
