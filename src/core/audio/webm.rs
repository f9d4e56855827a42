//! WebM (Matroska) demuxing of Opus audio on top of symphonia's MKV reader.
//!
//! Browser `MediaRecorder` output is a live-streaming WebM: the Segment and
//! every Cluster are written with unknown sizes, so the packet loop runs until
//! the reader reports the end of the data.

use std::io::{Cursor, ErrorKind};

use symphonia::core::codecs::CODEC_TYPE_OPUS;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;
use tracing::debug;

use super::ConversionError;

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const OPUS_HEAD_MAGIC: &[u8] = b"OpusHead";
const OPUS_HEAD_LEN: usize = 19;

/// Returns true when the data starts with the EBML magic number.
pub(super) fn is_webm(data: &[u8]) -> bool {
    data.starts_with(&EBML_MAGIC)
}

/// The Opus track of a WebM file, with its packets in container order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct OpusTrack {
    pub channels: u8,
    /// Samples (at 48 kHz) the decoder must discard from the start
    pub pre_skip: u16,
    pub packets: Vec<Vec<u8>>,
}

/// Extract the Opus track's packets from a WebM file.
pub(super) fn demux_opus(data: &[u8]) -> Result<OpusTrack, ConversionError> {
    let source = MediaSourceStream::new(Box::new(Cursor::new(data.to_vec())), Default::default());
    let mut hint = Hint::new();
    hint.with_extension("webm");

    let probed = get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(map_header_error)?;
    let mut format = probed.format;

    let track = match format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec == CODEC_TYPE_OPUS)
    {
        Some(track) => track,
        None => {
            let codecs = format
                .tracks()
                .iter()
                .map(|t| t.codec_params.codec.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ConversionError::UnsupportedCodec(if codecs.is_empty() {
                "no audio track".to_string()
            } else {
                codecs
            }));
        }
    };

    let track_id = track.id;
    let (head_channels, pre_skip) = match track.codec_params.extra_data.as_deref() {
        Some(head) if head.len() >= OPUS_HEAD_LEN && head.starts_with(OPUS_HEAD_MAGIC) => {
            (Some(head[9]), u16::from_le_bytes([head[10], head[11]]))
        }
        Some(_) => {
            return Err(ConversionError::Malformed(
                "Opus CodecPrivate is not an OpusHead".to_string(),
            ));
        }
        None => (None, 0),
    };

    let channels = head_channels
        .or_else(|| {
            track
                .codec_params
                .channels
                .map(|c| c.count().min(u8::MAX as usize) as u8)
        })
        .unwrap_or(1);
    if channels == 0 || channels > 2 {
        return Err(ConversionError::UnsupportedCodec(format!(
            "Opus with {channels} channels"
        )));
    }

    let mut packets = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(map_packet_error(err)),
        };
        if packet.track_id() == track_id {
            packets.push(packet.data.into_vec());
        }
    }

    debug!(
        channels,
        pre_skip,
        packets = packets.len(),
        "Demuxed WebM Opus track"
    );

    if packets.is_empty() {
        return Err(ConversionError::NoAudio);
    }

    Ok(OpusTrack {
        channels,
        pre_skip,
        packets,
    })
}

fn map_header_error(err: SymphoniaError) -> ConversionError {
    match err {
        SymphoniaError::IoError(e) if e.kind() == ErrorKind::UnexpectedEof => {
            ConversionError::Truncated("WebM header".to_string())
        }
        SymphoniaError::Unsupported(msg) => ConversionError::UnsupportedCodec(msg.to_string()),
        other => ConversionError::Malformed(other.to_string()),
    }
}

fn map_packet_error(err: SymphoniaError) -> ConversionError {
    match err {
        SymphoniaError::Unsupported(msg) => ConversionError::UnsupportedCodec(msg.to_string()),
        other => ConversionError::Malformed(other.to_string()),
    }
}
