//! Configuration module for the speech relay server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use speech_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod validation;
mod yaml;

use crate::core::live::gemini::{
    DEFAULT_GEMINI_API_BASE_URL, DEFAULT_GEMINI_API_VERSION, DEFAULT_GEMINI_MODEL,
    DEFAULT_GEMINI_WS_BASE_URL,
};

pub(crate) const DEFAULT_HOST: &str = "127.0.0.1";
pub(crate) const DEFAULT_PORT: u16 = 8765;
/// The first connection plus three resumptions.
pub(crate) const DEFAULT_TOKEN_USES: u32 = 4;
pub(crate) const DEFAULT_TOKEN_EXPIRE_MINUTES: u64 = 30;
/// Matches the token lifetime so a late resumption can still open a session.
pub(crate) const DEFAULT_TOKEN_SESSION_START_MINUTES: u64 = 30;
pub(crate) const DEFAULT_SETUP_TIMEOUT_SECONDS: u64 = 15;
pub(crate) const DEFAULT_SESSION_QUEUE_CAPACITY: usize = 64;
/// 200 ms of 16 kHz mono PCM16.
pub(crate) const DEFAULT_UPSTREAM_FRAME_BYTES: usize = 6400;
pub(crate) const DEFAULT_MAX_TURN_BYTES: usize = 10 * 1024 * 1024;
pub(crate) const DEFAULT_MAX_TURN_SECONDS: u64 = 120;
pub(crate) const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 300;
pub(crate) const DEFAULT_MAX_CONNECTIONS_PER_IP: u32 = 100;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Contains all configuration needed to run the relay, including:
/// - Server settings (host, port, TLS)
/// - Gemini Live credentials, model and endpoints
/// - Ephemeral token lifetime
/// - Per-session queue and buffer limits
/// - Security settings (CORS, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Gemini Live settings
    /// Long-lived API key used only to mint per-session ephemeral tokens
    pub google_api_key: String,
    /// Model name without the `models/` prefix
    pub gemini_model: String,
    /// Optional system instruction sent with every session setup
    pub gemini_system_instruction: Option<String>,
    /// API version segment, e.g. "v1alpha"
    pub gemini_api_version: String,
    /// Base URL for REST calls (token issuance)
    pub gemini_api_base_url: String,
    /// Base URL for the bidirectional streaming endpoint
    pub gemini_ws_base_url: String,
    /// How long to wait for `setupComplete` after connecting
    pub setup_timeout_seconds: u64,

    // Ephemeral token settings
    /// Number of connections one token may open (first connect plus resumptions)
    pub token_uses: u32,
    /// Minutes until the token expires
    pub token_expire_minutes: u64,
    /// Minutes within which the first session must be opened with the token
    pub token_session_start_minutes: u64,

    // Session settings
    /// Capacity of each bounded per-session queue
    pub session_queue_capacity: usize,
    /// Size of each PCM frame forwarded to the speech API
    pub upstream_frame_bytes: usize,
    /// Ceiling on compressed audio buffered for one turn
    pub max_turn_bytes: usize,
    /// Ceiling on decoded audio for one turn
    pub max_turn_seconds: u64,
    /// Close client sockets that stay silent this long
    pub idle_timeout_seconds: u64,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

/// Zeroize the API key when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        self.google_api_key.zeroize();
    }
}

impl ServerConfig {
    /// Build a configuration with every setting at its default and the given API key.
    ///
    /// Mostly useful for embedding the relay in tests or other binaries.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls: None,
            google_api_key: api_key.into(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_system_instruction: None,
            gemini_api_version: DEFAULT_GEMINI_API_VERSION.to_string(),
            gemini_api_base_url: DEFAULT_GEMINI_API_BASE_URL.to_string(),
            gemini_ws_base_url: DEFAULT_GEMINI_WS_BASE_URL.to_string(),
            setup_timeout_seconds: DEFAULT_SETUP_TIMEOUT_SECONDS,
            token_uses: DEFAULT_TOKEN_USES,
            token_expire_minutes: DEFAULT_TOKEN_EXPIRE_MINUTES,
            token_session_start_minutes: DEFAULT_TOKEN_SESSION_START_MINUTES,
            session_queue_capacity: DEFAULT_SESSION_QUEUE_CAPACITY,
            upstream_frame_bytes: DEFAULT_UPSTREAM_FRAME_BYTES,
            max_turn_bytes: DEFAULT_MAX_TURN_BYTES,
            max_turn_seconds: DEFAULT_MAX_TURN_SECONDS,
            idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_SECONDS,
            cors_allowed_origins: None,
            max_websocket_connections: None,
            max_connections_per_ip: DEFAULT_MAX_CONNECTIONS_PER_IP,
        }
    }

    /// Load configuration from environment variables only
    ///
    /// Reads the variables documented in `env.rs`, falls back to defaults for
    /// everything except `GOOGLE_API_KEY`, then validates the result.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // .env is loaded in main.rs, so by this point it is part of the process environment
        let yaml_config = yaml::YamlConfig::from_file(path)?;

        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;

        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    ///
    /// Returns true if TLS configuration is present
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_seconds)
    }
}
