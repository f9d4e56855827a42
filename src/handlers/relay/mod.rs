//! Browser relay WebSocket
//!
//! # Protocol
//!
//! ## Client → Server
//!
//! - **Binary frames**: compressed audio for the current turn (WebM/Opus from
//!   `MediaRecorder`, or WAV)
//! - **`END_OF_STREAM`**: the current turn's audio is complete
//!
//! ## Server → Client
//!
//! - **`STATUS: <message>`**: lifecycle notice; a message ending in
//!   "Ready to record." means a new turn may start
//! - **`ERROR: <message>`**: fatal; the connection closes right after
//! - **Binary frames**: response audio, PCM16 24kHz mono, in playback order

mod handler;
pub mod messages;
mod supervisor;

pub use handler::{ClientHandler, HandlerLimits, SessionEnd, SessionPhase};
pub use supervisor::{relay_handler, run_session};
