//! In-memory WAV encoding for transcription uploads.

use crate::error::{Result, VoiceError};
use std::io::Cursor;

/// Encode mono f32 samples as a 16-bit PCM WAV file.
///
/// # Errors
///
/// Returns an error if the WAV writer fails.
pub fn encode_wav_f32_mono(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| VoiceError::Audio(format!("failed to create wav writer: {e}")))?;

        for &s in samples {
            let clamped = s.clamp(-1.0, 1.0);
            let v = (clamped * i16::MAX as f32).round() as i16;
            writer
                .write_sample(v)
                .map_err(|e| VoiceError::Audio(format!("failed to write wav sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| VoiceError::Audio(format!("failed to finalize wav: {e}")))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn encoded_wav_reads_back() {
        let samples = vec![0.0, 0.5, -0.5, 2.0];
        let bytes = encode_wav_f32_mono(&samples, 16_000).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");

        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded[3], i16::MAX);
    }
}
