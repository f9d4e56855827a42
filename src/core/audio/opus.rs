use audiopus::coder::Decoder;
use audiopus::packet::Packet;
use audiopus::{Channels, MutSignals, SampleRate};
use tokio_util::sync::CancellationToken;

use super::webm::OpusTrack;
use super::{ConversionError, INPUT_SAMPLE_RATE};

/// Longest Opus packet (120 ms) at 16 kHz mono.
const MAX_SAMPLES_PER_PACKET: usize = 1920;

/// Opus pre-skip is always counted at 48 kHz regardless of the input rate.
const OPUS_CLOCK_RATE: usize = 48_000;

/// Decode every packet of the track straight to 16 kHz mono.
///
/// libopus resamples and downmixes internally, so stereo recordings need no
/// separate pass. Decoding stops with [`ConversionError::TooLong`] as soon as
/// the output would pass `max_samples` after pre-skip.
pub(super) fn decode_track(
    track: &OpusTrack,
    max_samples: usize,
    cancel: &CancellationToken,
) -> Result<Vec<i16>, ConversionError> {
    let mut decoder = Decoder::new(SampleRate::Hz16000, Channels::Mono)
        .map_err(|e| ConversionError::Decode(format!("failed to create Opus decoder: {e}")))?;

    let skip = track.pre_skip as usize * INPUT_SAMPLE_RATE as usize / OPUS_CLOCK_RATE;
    let limit = max_samples.saturating_add(skip);

    let mut samples = Vec::with_capacity(track.packets.len().saturating_mul(320).min(limit));
    let mut buffer = vec![0i16; MAX_SAMPLES_PER_PACKET];

    for (index, data) in track.packets.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(ConversionError::Cancelled);
        }
        // DTX gaps are written as empty blocks
        if data.is_empty() {
            continue;
        }

        let packet = Packet::try_from(data.as_slice())
            .map_err(|e| ConversionError::Decode(format!("packet {index}: {e}")))?;
        let signals = MutSignals::try_from(buffer.as_mut_slice())
            .map_err(|e| ConversionError::Decode(format!("output buffer: {e}")))?;
        let decoded = decoder
            .decode(Some(packet), signals, false)
            .map_err(|e| ConversionError::Decode(format!("packet {index}: {e}")))?;

        if samples.len() + decoded > limit {
            return Err(ConversionError::TooLong {
                limit_seconds: (max_samples / INPUT_SAMPLE_RATE as usize) as u64,
            });
        }
        samples.extend_from_slice(&buffer[..decoded]);
    }

    samples.drain(..skip.min(samples.len()));

    Ok(samples)
}
