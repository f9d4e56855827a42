//! Speech Relay
//!
//! Streams browser microphone audio to a live speech-dialogue API and plays the
//! spoken reply back. Each browser WebSocket gets its own upstream session:
//! compressed turn audio is decoded to 16 kHz mono PCM16, forwarded upstream,
//! and the model's PCM response is relayed to the browser as it arrives.

pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use errors::{RelayError, RelayResult};
pub use state::AppState;
