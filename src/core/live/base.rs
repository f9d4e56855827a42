//! Base traits and types for live speech-dialogue backends.
//!
//! A backend is split in two seams so the relay can be exercised without the
//! network:
//!
//! - [`CredentialIssuer`] mints a short-lived token for one session.
//! - [`LiveConnector`] opens a duplex connection with that token and hands
//!   back a write half ([`LiveSink`]) and a read half ([`LiveSource`]).
//!
//! # Audio Format
//!
//! Input is PCM 16-bit signed little-endian mono at 16kHz. Output is the same
//! layout at 24kHz.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;
use zeroize::Zeroize;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by the remote speech API connection.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Connection to the remote endpoint failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The setup handshake was rejected or answered with something unexpected
    #[error("Setup failed: {0}")]
    SetupFailed(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The remote closed the connection
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for live connection operations.
pub type LiveResult<T> = Result<T, LiveError>;

/// Errors raised while obtaining an ephemeral credential.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The request never produced a response
    #[error("Token request failed: {0}")]
    Request(String),

    /// The credential service answered with a non-success status
    #[error("Token request rejected: {0}")]
    Rejected(String),

    /// The response body could not be understood
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// The session's token can no longer open connections
    #[error("Token expired at {0}")]
    Expired(String),
}

// =============================================================================
// Credential Types
// =============================================================================

/// Short-lived credential scoped to one relay session.
///
/// The secret is wiped from memory on drop and never printed by `Debug`.
#[derive(Clone)]
pub struct CredentialToken {
    secret: String,
    expires_at: Option<OffsetDateTime>,
}

impl CredentialToken {
    pub fn new(secret: impl Into<String>, expires_at: Option<OffsetDateTime>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    /// The token value to present to the remote API.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.expires_at
    }

    /// True once `now` has reached the expiry. Tokens without one never expire.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

impl fmt::Debug for CredentialToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Drop for CredentialToken {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

// =============================================================================
// Remote Events
// =============================================================================

/// Something the remote speech API told us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    /// A chunk of response audio (24kHz PCM16 mono)
    Audio(Bytes),
    /// The model finished its response for the current turn
    TurnComplete,
    /// The model stopped its response early
    Interrupted,
    /// A new resumption handle the session may reconnect with
    ResumptionUpdate { handle: String },
    /// The remote will drop the connection soon
    GoAway { time_left: Option<String> },
}

// =============================================================================
// Traits
// =============================================================================

/// Issues ephemeral credentials for new sessions.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue_token(&self) -> Result<CredentialToken, AuthError>;
}

/// Write half of an established remote connection.
#[async_trait]
pub trait LiveSink: Send {
    /// Send one PCM frame.
    async fn send_audio(&mut self, pcm: Bytes) -> LiveResult<()>;

    /// Tell the remote the current turn's input is complete.
    async fn end_audio_stream(&mut self) -> LiveResult<()>;

    /// Close the connection.
    async fn close(&mut self) -> LiveResult<()>;
}

/// Read half of an established remote connection.
#[async_trait]
pub trait LiveSource: Send {
    /// Next event from the remote, or `None` once the connection has ended.
    ///
    /// Must be cancel-safe: it is polled inside `tokio::select!`.
    async fn next_event(&mut self) -> Option<LiveResult<RemoteEvent>>;
}

/// An established connection whose setup handshake has completed.
pub struct LiveConnection {
    pub sink: Box<dyn LiveSink>,
    pub source: Box<dyn LiveSource>,
}

/// Opens connections to the remote speech API.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Connect and complete the setup handshake.
    ///
    /// `resume_handle` continues the context of an earlier connection.
    async fn connect(
        &self,
        token: &CredentialToken,
        resume_handle: Option<&str>,
    ) -> LiveResult<LiveConnection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_token_debug_redacts_secret() {
        let token = CredentialToken::new("auth_tokens/very-secret", None);
        let debug = format!("{token:?}");

        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("<redacted>"));
        assert_eq!(token.secret(), "auth_tokens/very-secret");
    }

    #[test]
    fn test_credential_token_expiry() {
        let now = OffsetDateTime::now_utc();
        let token = CredentialToken::new("t", Some(now + time::Duration::minutes(5)));

        assert!(!token.is_expired_at(now));
        assert!(token.is_expired_at(now + time::Duration::minutes(5)));
        assert!(!CredentialToken::new("t", None).is_expired_at(now));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(LiveError::NotConnected.to_string(), "Not connected");
        assert_eq!(
            AuthError::Rejected("403 Forbidden".into()).to_string(),
            "Token request rejected: 403 Forbidden"
        );
    }
}
