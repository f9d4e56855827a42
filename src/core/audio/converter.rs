use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ConversionError, INPUT_SAMPLE_RATE, opus, samples_to_le_bytes, wav, webm};

/// Decoded-audio ceiling for one turn when none is configured.
pub const DEFAULT_MAX_TURN_DURATION: Duration = Duration::from_secs(120);

/// Audio containers the converter recognizes from their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    /// WebM/Matroska carrying Opus, as recorded by browsers
    WebmOpus,
    /// RIFF/WAVE with integer or float samples
    Wav,
}

impl ContainerFormat {
    pub fn detect(data: &[u8]) -> Option<Self> {
        if webm::is_webm(data) {
            Some(ContainerFormat::WebmOpus)
        } else if wav::is_wav(data) {
            Some(ContainerFormat::Wav)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerFormat::WebmOpus => "webm/opus",
            ContainerFormat::Wav => "wav",
        }
    }
}

/// Decodes one complete recorded turn to 16 kHz mono PCM16 (little-endian).
///
/// Output is capped at a per-turn duration; a turn that would decode past it
/// fails with [`ConversionError::TooLong`] instead of growing without bound.
#[derive(Debug, Clone, Copy)]
pub struct AudioConverter {
    /// Ceiling in output samples at 16 kHz
    max_samples: usize,
}

impl Default for AudioConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioConverter {
    pub fn new() -> Self {
        Self {
            max_samples: samples_for(DEFAULT_MAX_TURN_DURATION),
        }
    }

    /// Replace the per-turn ceiling on decoded audio.
    pub fn with_max_duration(mut self, max: Duration) -> Self {
        self.max_samples = samples_for(max);
        self
    }

    /// The per-turn ceiling, in 16 kHz output samples.
    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    /// Convert a complete container to PCM bytes.
    ///
    /// This is CPU-bound; async callers should go through [`AudioConverter::spawn`].
    pub fn convert(
        &self,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Bytes, ConversionError> {
        if data.is_empty() {
            return Err(ConversionError::Empty);
        }
        let format = ContainerFormat::detect(data).ok_or(ConversionError::UnknownFormat)?;

        let samples = match format {
            ContainerFormat::WebmOpus => {
                let track = webm::demux_opus(data)?;
                opus::decode_track(&track, self.max_samples, cancel)?
            }
            ContainerFormat::Wav => wav::decode(data, self.max_samples, cancel)?,
        };

        if samples.is_empty() {
            return Err(ConversionError::NoAudio);
        }

        debug!(
            format = format.as_str(),
            input_bytes = data.len(),
            samples = samples.len(),
            "Converted turn audio"
        );

        Ok(Bytes::from(samples_to_le_bytes(&samples)))
    }

    /// Run [`AudioConverter::convert`] on the blocking thread pool.
    pub fn spawn(
        &self,
        data: Bytes,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<Bytes, ConversionError>> {
        let converter = *self;
        tokio::task::spawn_blocking(move || converter.convert(&data, &cancel))
    }
}

fn samples_for(duration: Duration) -> usize {
    let samples = duration.as_millis() * INPUT_SAMPLE_RATE as u128 / 1000;
    usize::try_from(samples).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::opus::test_support::encode_tone;
    use crate::core::audio::webm::test_support::build_webm;
    use std::io::Cursor;

    fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for sample in samples {
                writer.write_sample(*sample).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn le_samples(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn test_detect_format() {
        let wav = wav_bytes(&[0; 4], 16_000, 1);
        let webm = build_webm(&[vec![0xFC]], 0, 1);

        assert_eq!(ContainerFormat::detect(&wav), Some(ContainerFormat::Wav));
        assert_eq!(ContainerFormat::detect(&webm), Some(ContainerFormat::WebmOpus));
        assert_eq!(ContainerFormat::detect(b"OggS\0\0"), None);
    }

    #[test]
    fn test_convert_wav_passthrough() {
        let samples: Vec<i16> = (0..1600).map(|i| ((i * 37) % 2000 - 1000) as i16).collect();
        let wav = wav_bytes(&samples, 16_000, 1);

        let pcm = AudioConverter::new()
            .convert(&wav, &CancellationToken::new())
            .unwrap();

        assert_eq!(le_samples(&pcm), samples);
    }

    #[test]
    fn test_convert_wav_stereo_48k() {
        let samples: Vec<i16> = (0..4800 * 2).map(|i| (i % 100) as i16).collect();
        let wav = wav_bytes(&samples, 48_000, 2);

        let pcm = AudioConverter::new()
            .convert(&wav, &CancellationToken::new())
            .unwrap();

        // 100 ms at 16 kHz mono
        assert_eq!(pcm.len(), 1600 * 2);
    }

    #[test]
    fn test_convert_webm_opus() {
        let packets = encode_tone(25);
        let webm = build_webm(&packets, 312, 10);

        let pcm = AudioConverter::new()
            .convert(&webm, &CancellationToken::new())
            .unwrap();

        // 500 ms at 16 kHz minus 312 / 3 samples of pre-skip
        assert_eq!(pcm.len(), (8000 - 104) * 2);
        assert!(le_samples(&pcm).iter().any(|s| s.abs() > 1000));
    }

    #[test]
    fn test_convert_webm_past_ceiling() {
        let webm = build_webm(&encode_tone(100), 0, 10);

        // two seconds of tone against a one second ceiling
        let result = AudioConverter::new()
            .with_max_duration(Duration::from_secs(1))
            .convert(&webm, &CancellationToken::new());

        assert_eq!(result, Err(ConversionError::TooLong { limit_seconds: 1 }));
    }

    #[test]
    fn test_convert_wav_past_ceiling() {
        let wav = wav_bytes(&[0; 32_000], 16_000, 1);
        let converter = AudioConverter::new().with_max_duration(Duration::from_secs(1));

        let result = converter.convert(&wav, &CancellationToken::new());

        assert_eq!(result, Err(ConversionError::TooLong { limit_seconds: 1 }));
        assert_eq!(converter.max_samples(), 16_000);
    }

    #[test]
    fn test_convert_rejects_absurd_wav_rate() {
        let wav = wav_bytes(&[0; 16], 1, 1);

        let result = AudioConverter::new().convert(&wav, &CancellationToken::new());

        assert!(matches!(result, Err(ConversionError::UnsupportedCodec(_))));
    }

    #[test]
    fn test_convert_empty() {
        let result = AudioConverter::new().convert(&[], &CancellationToken::new());
        assert_eq!(result, Err(ConversionError::Empty));
    }

    #[test]
    fn test_convert_unknown_format() {
        let result = AudioConverter::new().convert(b"not audio at all", &CancellationToken::new());
        assert_eq!(result, Err(ConversionError::UnknownFormat));
    }

    #[test]
    fn test_convert_truncated_webm() {
        let webm = build_webm(&encode_tone(5), 312, 5);

        // cut inside the EBML header
        let result = AudioConverter::new().convert(&webm[..20], &CancellationToken::new());

        assert!(result.is_err());
    }

    #[test]
    fn test_convert_truncated_wav() {
        let wav = wav_bytes(&[100; 800], 16_000, 1);

        let result = AudioConverter::new().convert(&wav[..wav.len() - 11], &CancellationToken::new());

        assert!(matches!(result, Err(ConversionError::Truncated(_))));
    }

    #[tokio::test]
    async fn test_spawn_runs_on_blocking_pool() {
        let wav = Bytes::from(wav_bytes(&[1, 2, 3, 4], 16_000, 1));

        let pcm = AudioConverter::new()
            .spawn(wav, CancellationToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(le_samples(&pcm), vec![1, 2, 3, 4]);
    }
}
