//! Format conversion from browser-recorded audio to the speech API's input format.
//!
//! The browser records with `MediaRecorder`, which produces a WebM container
//! carrying Opus packets. The speech API only accepts raw PCM, so every turn
//! is decoded here into 16 kHz mono signed 16-bit little-endian samples.
//!
//! WAV input is also accepted, which makes scripted clients and tests simpler.
//!
//! # Example
//!
//! ```rust,ignore
//! use speech_relay::core::audio::AudioConverter;
//! use tokio_util::sync::CancellationToken;
//!
//! let pcm = AudioConverter::new().convert(&webm_bytes, &CancellationToken::new())?;
//! assert_eq!(pcm.len() % 2, 0);
//! ```

mod converter;
mod opus;
mod wav;
mod webm;

pub use converter::{AudioConverter, ContainerFormat};

use thiserror::Error;

/// Sample rate expected by the speech API for input audio.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// MIME type announced with every PCM blob sent upstream.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Errors raised while decoding one turn's audio.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// No bytes were buffered for the turn
    #[error("no audio data received")]
    Empty,

    /// Neither a WebM nor a WAV signature was found
    #[error("unrecognized audio container")]
    UnknownFormat,

    /// The container structure is invalid
    #[error("malformed container: {0}")]
    Malformed(String),

    /// The container ends before a declared element does
    #[error("truncated container: {0}")]
    Truncated(String),

    /// The container holds a codec or layout this relay cannot decode
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// The container is valid but carries no audio samples
    #[error("container holds no audio frames")]
    NoAudio,

    /// The decoded audio would exceed the per-turn duration ceiling
    #[error("turn audio exceeds {limit_seconds} s")]
    TooLong { limit_seconds: u64 },

    /// The codec rejected a packet
    #[error("decode failed: {0}")]
    Decode(String),

    /// The session closed while conversion was running
    #[error("conversion cancelled")]
    Cancelled,
}


/// Serialize samples as little-endian PCM16 bytes.
pub(crate) fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}
