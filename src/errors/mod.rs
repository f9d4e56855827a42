//! Session error taxonomy.
//!
//! Every failure a relay session can observe is classified into one of five
//! categories. Only the fatal ones are ever surfaced to the browser as an
//! `ERROR:` message; the rest are logged and the session carries on.

use thiserror::Error;

use crate::core::audio::ConversionError;
use crate::core::live::{AuthError, LiveError};

/// Errors raised while serving one relay session.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The buffered turn audio could not be decoded
    #[error("Audio conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    /// The credential service refused or failed to issue a token
    #[error("Credential issuance failed: {0}")]
    Auth(#[from] AuthError),

    /// The connection to the speech API failed and could not be resumed
    #[error("Remote connection failed: {0}")]
    RemoteTransport(#[from] LiveError),

    /// The browser socket failed or closed
    #[error("Client connection failed: {0}")]
    ClientTransport(String),

    /// The client sent something the session cannot accept right now
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
}

impl RelayError {
    /// Whether this error ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Auth(_) | RelayError::RemoteTransport(_) | RelayError::ClientTransport(_)
        )
    }

    /// Text shown to the browser after the `ERROR: ` prefix.
    ///
    /// Returns `None` for categories that must never reach the client.
    pub fn client_message(&self) -> Option<String> {
        match self {
            RelayError::Auth(_) => Some("Could not create an API token.".to_string()),
            RelayError::RemoteTransport(e) => Some(format!("Gemini connection error: {e}")),
            RelayError::ClientTransport(_)
            | RelayError::Conversion(_)
            | RelayError::ProtocolViolation(_) => None,
        }
    }
}

/// Result type for relay session operations.
pub type RelayResult<T> = Result<T, RelayError>;
