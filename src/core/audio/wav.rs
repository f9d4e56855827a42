use std::io::{Cursor, ErrorKind};

use tokio_util::sync::CancellationToken;

use super::{ConversionError, INPUT_SAMPLE_RATE};

/// Source rates the resampler accepts.
const SUPPORTED_RATES: std::ops::RangeInclusive<u32> = 8_000..=192_000;

/// Returns true for a RIFF/WAVE header.
pub(super) fn is_wav(data: &[u8]) -> bool {
    data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE"
}

/// Decode a WAV file to 16 kHz mono PCM16, downmixing and resampling as needed.
///
/// The header's declared length is checked against `max_samples` (counted at
/// 16 kHz) before any sample is read.
pub(super) fn decode(
    data: &[u8],
    max_samples: usize,
    cancel: &CancellationToken,
) -> Result<Vec<i16>, ConversionError> {
    let reader = hound::WavReader::new(Cursor::new(data)).map_err(map_hound_error)?;
    let spec = reader.spec();

    if !SUPPORTED_RATES.contains(&spec.sample_rate) {
        return Err(ConversionError::UnsupportedCodec(format!(
            "WAV sample rate {} Hz",
            spec.sample_rate
        )));
    }
    let output_len =
        reader.duration() as u64 * INPUT_SAMPLE_RATE as u64 / spec.sample_rate as u64;
    if output_len > max_samples as u64 {
        return Err(ConversionError::TooLong {
            limit_seconds: max_samples as u64 / INPUT_SAMPLE_RATE as u64,
        });
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_val))
                .collect::<Result<_, _>>()
                .map_err(map_hound_error)?
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(map_hound_error)?,
    };

    if cancel.is_cancelled() {
        return Err(ConversionError::Cancelled);
    }
    if samples.is_empty() {
        return Err(ConversionError::NoAudio);
    }

    let mono = downmix(&samples, spec.channels as usize);
    let resampled = resample_linear(&mono, spec.sample_rate, INPUT_SAMPLE_RATE);

    Ok(resampled.into_iter().map(to_i16).collect())
}

fn map_hound_error(err: hound::Error) -> ConversionError {
    match err {
        hound::Error::IoError(e) if e.kind() == ErrorKind::UnexpectedEof => {
            ConversionError::Truncated(e.to_string())
        }
        hound::Error::Unsupported => {
            ConversionError::UnsupportedCodec("unsupported WAV sample format".to_string())
        }
        other => ConversionError::Malformed(other.to_string()),
    }
}

fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear interpolation resampler, adequate for speech.
fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if samples.is_empty() || from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (samples.len() as f64 / ratio) as usize;

    let mut resampled = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let idx1 = (idx0 + 1).min(samples.len() - 1);
        let frac = src_idx - idx0 as f64;

        let sample = samples[idx0] as f64 * (1.0 - frac) + samples[idx1] as f64 * frac;
        resampled.push(sample as f32);
    }
    resampled
}

fn to_i16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_wav(sample_rate: u32, samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for sample in samples {
            writer.write_sample(*sample).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_decode_rejects_absurd_sample_rate() {
        let data = mono_wav(1, &[0; 4]);

        let result = decode(&data, usize::MAX, &CancellationToken::new());

        assert!(matches!(result, Err(ConversionError::UnsupportedCodec(_))));
    }

    #[test]
    fn test_decode_rejects_rate_above_range() {
        let data = mono_wav(384_000, &[0; 4]);

        let result = decode(&data, usize::MAX, &CancellationToken::new());

        assert!(matches!(result, Err(ConversionError::UnsupportedCodec(_))));
    }

    #[test]
    fn test_decode_rejects_audio_past_ceiling() {
        // 0.5 s at 8 kHz becomes 8000 samples at 16 kHz
        let data = mono_wav(8_000, &[0; 4_000]);

        let result = decode(&data, 7_999, &CancellationToken::new());
        assert_eq!(result, Err(ConversionError::TooLong { limit_seconds: 0 }));

        let samples = decode(&data, 8_000, &CancellationToken::new()).unwrap();
        assert_eq!(samples.len(), 8_000);
    }

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix(&[0.5, -0.5, 1.0, 0.0], 2);
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn test_resample_halves_length() {
        let samples: Vec<f32> = (0..3200).map(|i| i as f32).collect();
        let resampled = resample_linear(&samples, 32_000, 16_000);

        assert_eq!(resampled.len(), 1600);
        assert_eq!(resampled[1], 2.0);
    }

    #[test]
    fn test_to_i16_clamps() {
        assert_eq!(to_i16(1.5), i16::MAX);
        assert_eq!(to_i16(-1.0), i16::MIN);
        assert_eq!(to_i16(0.0), 0);
    }

    #[test]
    fn test_is_wav() {
        assert!(is_wav(b"RIFF\0\0\0\0WAVEfmt "));
        assert!(!is_wav(b"RIFF\0\0\0\0AVI "));
        assert!(!is_wav(b"RIFF"));
    }
}
