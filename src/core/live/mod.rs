//! Live speech-dialogue backends and the per-session upstream bridge.
//!
//! `base` defines the seams ([`CredentialIssuer`], [`LiveConnector`]) the
//! bridge drives, `gemini` implements them against Gemini Live, and
//! `bridge` owns one upstream connection for the lifetime of a client
//! session.

mod base;
pub mod bridge;
pub mod gemini;

pub use base::{
    AuthError, CredentialIssuer, CredentialToken, LiveConnection, LiveConnector, LiveError,
    LiveResult, LiveSink, LiveSource, RemoteEvent,
};
pub use bridge::{BridgeState, UpstreamBridge, UpstreamCommand, UpstreamEvent};
