//! Gemini Live API configuration types.
//!
//! This module contains the endpoints and connection settings for the Gemini
//! Live (`BidiGenerateContent`) API:
//! - REST endpoint for ephemeral token issuance
//! - WebSocket endpoint for token-authenticated sessions
//! - Model and setup options

use std::time::Duration;

use url::Url;

use crate::config::ServerConfig;
use crate::core::live::LiveError;

/// Default REST base URL.
pub const DEFAULT_GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default WebSocket base URL.
pub const DEFAULT_GEMINI_WS_BASE_URL: &str = "wss://generativelanguage.googleapis.com";

/// Ephemeral tokens are only available on the alpha API surface.
pub const DEFAULT_GEMINI_API_VERSION: &str = "v1alpha";

/// Native-audio dialog model.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-preview-native-audio-dialog";

/// Connection settings for one Gemini Live session.
#[derive(Debug, Clone)]
pub struct GeminiLiveConfig {
    /// Model name, with or without the `models/` prefix
    pub model: String,
    /// Optional system instruction sent with the setup message
    pub system_instruction: Option<String>,
    /// API version segment, e.g. "v1alpha"
    pub api_version: String,
    /// WebSocket base URL
    pub ws_base_url: String,
    /// How long to wait for the connection and `setupComplete`
    pub setup_timeout: Duration,
}

impl Default for GeminiLiveConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_GEMINI_MODEL.to_string(),
            system_instruction: None,
            api_version: DEFAULT_GEMINI_API_VERSION.to_string(),
            ws_base_url: DEFAULT_GEMINI_WS_BASE_URL.to_string(),
            setup_timeout: Duration::from_secs(15),
        }
    }
}

impl GeminiLiveConfig {
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            model: config.gemini_model.clone(),
            system_instruction: config.gemini_system_instruction.clone(),
            api_version: config.gemini_api_version.clone(),
            ws_base_url: config.gemini_ws_base_url.clone(),
            setup_timeout: config.setup_timeout(),
        }
    }

    /// Fully-qualified model resource name.
    pub fn model_resource(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }

    /// WebSocket URL for a session authenticated with an ephemeral token.
    pub fn ws_url(&self, access_token: &str) -> Result<Url, LiveError> {
        let raw = format!(
            "{}/ws/google.ai.generativelanguage.{}.GenerativeService.BidiGenerateContentConstrained",
            self.ws_base_url.trim_end_matches('/'),
            self.api_version
        );
        let mut url = Url::parse(&raw)
            .map_err(|e| LiveError::ConnectionFailed(format!("Invalid WebSocket URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("access_token", access_token);
        Ok(url)
    }
}

/// Token issuance settings.
#[derive(Debug, Clone)]
pub struct GeminiTokenConfig {
    /// REST base URL
    pub api_base_url: String,
    /// API version segment
    pub api_version: String,
    /// Connections one token may open
    pub uses: u32,
    /// Token lifetime
    pub expire_after: Duration,
    /// Window in which the first connection must be opened
    pub new_session_expire_after: Duration,
}

impl GeminiTokenConfig {
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            api_base_url: config.gemini_api_base_url.clone(),
            api_version: config.gemini_api_version.clone(),
            uses: config.token_uses,
            expire_after: Duration::from_secs(config.token_expire_minutes * 60),
            new_session_expire_after: Duration::from_secs(
                config.token_session_start_minutes * 60,
            ),
        }
    }

    /// REST endpoint that mints ephemeral tokens.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}/auth_tokens",
            self.api_base_url.trim_end_matches('/'),
            self.api_version
        )
    }
}
