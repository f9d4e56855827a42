//! Relay WebSocket message types
//!
//! The browser protocol is deliberately plain: binary frames carry audio in
//! both directions, text frames carry a single control marker from the client
//! and `STATUS:` / `ERROR:` notices from the server.

use axum::extract::ws::Message;
use bytes::Bytes;

/// Client text marker ending the current turn's audio.
pub const END_OF_STREAM: &str = "END_OF_STREAM";

pub const STATUS_PREFIX: &str = "STATUS: ";
pub const ERROR_PREFIX: &str = "ERROR: ";

pub const READY_MESSAGE: &str = "Connected to Gemini. Ready to record.";
pub const TURN_COMPLETE_MESSAGE: &str = "Gemini turn complete. Ready to record.";
pub const CONVERSION_FAILED_MESSAGE: &str = "Could not process audio. Ready to record.";
pub const RESUMED_MESSAGE: &str = "Session resumed. Ready to record.";

/// Routing for everything the session writes to the client socket.
///
/// A single writer task drains these in order, so response audio and the
/// notice that follows it can never swap places.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessageRoute {
    /// Lifecycle notice, sent as `STATUS: <message>`
    Status(String),
    /// Fatal error, sent as `ERROR: <message>`
    Error(String),
    /// Raw response audio
    Audio(Bytes),
}

impl RelayMessageRoute {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status(message.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// The WebSocket frame this route is written as.
    pub fn into_message(self) -> Message {
        match self {
            Self::Status(message) => Message::Text(format!("{STATUS_PREFIX}{message}").into()),
            Self::Error(message) => Message::Text(format!("{ERROR_PREFIX}{message}").into()),
            Self::Audio(data) => Message::Binary(data),
        }
    }
}

/// A client frame, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientInput {
    /// Compressed audio for the current turn
    Chunk(Bytes),
    /// The `END_OF_STREAM` marker
    EndOfTurn,
    /// Any other text; not part of the protocol
    UnknownText(String),
}

impl ClientInput {
    pub fn from_text(text: &str) -> Self {
        if text.trim() == END_OF_STREAM {
            Self::EndOfTurn
        } else {
            Self::UnknownText(text.to_string())
        }
    }
}
