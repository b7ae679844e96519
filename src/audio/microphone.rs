//! Microphone acquisition using cpal.
//!
//! A [`MicrophoneStream`] is the single owner of the open input device.
//! Chunks are fanned out over a broadcast channel so the capture adapter and
//! the level monitor can read the same stream. Dropping the handle releases
//! the device.

use crate::audio::AudioChunk;
use crate::config::AudioConfig;
use crate::error::CaptureErrorKind;
use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::time::Instant;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info};

/// Chunks buffered per subscriber before the slowest one starts lagging.
const CHUNK_CHANNEL_SIZE: usize = 64;

/// Source of live microphone audio.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Open the input device and start streaming.
    ///
    /// # Errors
    ///
    /// Returns the capture error kind describing why the device cannot be used.
    async fn open(&self) -> std::result::Result<MicrophoneStream, CaptureErrorKind>;
}

/// An open microphone. Released when dropped.
pub struct MicrophoneStream {
    chunks: broadcast::Sender<AudioChunk>,
    sample_rate: u32,
    _release: DropGuard,
}

impl MicrophoneStream {
    /// Wrap an existing chunk sender. `release` is cancelled when the stream is dropped.
    pub fn new(
        chunks: broadcast::Sender<AudioChunk>,
        sample_rate: u32,
        release: CancellationToken,
    ) -> Self {
        Self {
            chunks,
            sample_rate,
            _release: release.drop_guard(),
        }
    }

    /// Subscribe to chunks captured from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<AudioChunk> {
        self.chunks.subscribe()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// System microphone via cpal.
///
/// Captures at the device's native sample rate and downsamples to the
/// configured input rate (default 16kHz).
#[derive(Debug, Clone)]
pub struct CpalMicrophone {
    config: AudioConfig,
}

impl CpalMicrophone {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> crate::error::Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices().map_err(|e| {
            crate::error::VoiceError::Audio(format!("cannot enumerate devices: {e}"))
        })?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }

    fn select_device(&self) -> std::result::Result<cpal::Device, CaptureErrorKind> {
        let host = cpal::default_host();
        if let Some(ref name) = self.config.input_device {
            host.input_devices()
                .map_err(|e| classify_device_error(&e.to_string()))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| {
                    error!("input device '{name}' not found");
                    CaptureErrorKind::MicrophoneUnavailable
                })
        } else {
            host.default_input_device()
                .ok_or(CaptureErrorKind::MicrophoneUnavailable)
        }
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn open(&self) -> std::result::Result<MicrophoneStream, CaptureErrorKind> {
        let device = self.select_device()?;
        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using input device: {device_name}");

        let default_config = device
            .default_input_config()
            .map_err(|e| classify_device_error(&e.to_string()))?;
        let stream_config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        let target_rate = self.config.input_sample_rate;

        let (chunk_tx, _) = broadcast::channel::<AudioChunk>(CHUNK_CHANNEL_SIZE);
        let release = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        let callback_tx = chunk_tx.clone();
        let cancel = release.clone();
        tokio::spawn(async move {
            hold_input_stream(
                device,
                stream_config,
                target_rate,
                callback_tx,
                ready_tx,
                cancel,
            )
            .await;
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(MicrophoneStream::new(chunk_tx, target_rate, release)),
            Ok(Err(kind)) => Err(kind),
            Err(_) => Err(CaptureErrorKind::Other(
                "microphone task ended before the stream started".to_owned(),
            )),
        }
    }
}

/// Build and play the input stream, then hold it until `cancel` fires.
async fn hold_input_stream(
    device: cpal::Device,
    stream_config: StreamConfig,
    target_rate: u32,
    tx: broadcast::Sender<AudioChunk>,
    ready: oneshot::Sender<std::result::Result<(), CaptureErrorKind>>,
    cancel: CancellationToken,
) {
    let native_rate = stream_config.sample_rate;
    let native_channels = stream_config.channels;

    let built = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _info: &cpal::InputCallbackInfo| {
            let mono = if native_channels > 1 {
                to_mono(data, native_channels)
            } else {
                data.to_vec()
            };
            let samples = if native_rate != target_rate {
                downsample(&mono, native_rate, target_rate)
            } else {
                mono
            };
            let chunk = AudioChunk {
                samples,
                sample_rate: target_rate,
                captured_at: Instant::now(),
            };
            // No subscribers is fine; broadcast never blocks the audio thread.
            if tx.send(chunk).is_err() {
                debug!("no microphone subscribers, dropping chunk");
            }
        },
        move |err| {
            error!("audio input stream error: {err}");
        },
        None,
    );

    let stream = match built {
        Ok(stream) => stream,
        Err(e) => {
            let kind = match e {
                cpal::BuildStreamError::DeviceNotAvailable => {
                    CaptureErrorKind::MicrophoneUnavailable
                }
                other => classify_device_error(&other.to_string()),
            };
            let _ = ready.send(Err(kind));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(classify_device_error(&e.to_string())));
        return;
    }

    info!("microphone opened: native {native_rate}Hz -> target {target_rate}Hz");
    if ready.send(Ok(())).is_err() {
        return;
    }

    cancel.cancelled().await;
    drop(stream);
    info!("microphone released");
}

/// Map a platform error message onto a capture error kind.
///
/// cpal reports access refusals as backend-specific strings.
fn classify_device_error(message: &str) -> CaptureErrorKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        CaptureErrorKind::PermissionDenied
    } else if lower.contains("not available") || lower.contains("no device") {
        CaptureErrorKind::MicrophoneUnavailable
    } else {
        CaptureErrorKind::Other(message.to_owned())
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Simple linear-interpolation downsampler.
///
/// Speech energy sits below 8kHz, so 48kHz → 16kHz needs no anti-alias filter.
fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac
        } else {
            samples[idx.min(samples.len() - 1)] as f64
        };

        output.push(sample as f32);
    }

    output
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn to_mono_averages_frames() {
        let stereo = [1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(to_mono(&stereo, 2), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn downsample_reduces_length_by_ratio() {
        let samples: Vec<f32> = (0..480).map(|i| i as f32).collect();
        let out = downsample(&samples, 48_000, 16_000);
        assert_eq!(out.len(), 160);
        assert!((out[1] - 3.0).abs() < 1e-4);
    }

    #[test]
    fn downsample_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(downsample(&samples, 16_000, 16_000), samples);
    }

    #[test]
    fn classify_permission_messages() {
        assert_eq!(
            classify_device_error("Permission denied by the user"),
            CaptureErrorKind::PermissionDenied
        );
        assert_eq!(
            classify_device_error("The requested device is no longer available"),
            CaptureErrorKind::Other("The requested device is no longer available".into())
        );
        assert_eq!(
            classify_device_error("device not available"),
            CaptureErrorKind::MicrophoneUnavailable
        );
    }

    #[tokio::test]
    async fn dropping_stream_cancels_release_token() {
        let (tx, _) = broadcast::channel(4);
        let release = CancellationToken::new();
        let stream = MicrophoneStream::new(tx, 16_000, release.clone());
        assert!(!release.is_cancelled());
        drop(stream);
        assert!(release.is_cancelled());
    }

    #[tokio::test]
    async fn subscribers_see_chunks_sent_after_subscribe() {
        let (tx, _) = broadcast::channel(4);
        let stream = MicrophoneStream::new(tx.clone(), 16_000, CancellationToken::new());
        let mut rx = stream.subscribe();
        tx.send(AudioChunk {
            samples: vec![0.25; 4],
            sample_rate: 16_000,
            captured_at: Instant::now(),
        })
        .unwrap();
        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.samples.len(), 4);
        assert_eq!(stream.sample_rate(), 16_000);
    }
}
