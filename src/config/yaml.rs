use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present here
/// override the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8765
///   tls:
///     enabled: true
///     cert_path: "/etc/relay/cert.pem"
///     key_path: "/etc/relay/key.pem"
///
/// gemini:
///   api_key: "your-google-api-key"
///   model: "gemini-2.5-flash-preview-native-audio-dialog"
///   system_instruction: "You are a helpful assistant."
///   api_version: "v1alpha"
///   setup_timeout_seconds: 15
///
/// token:
///   uses: 4
///   expire_minutes: 30
///   new_session_expire_minutes: 30
///
/// session:
///   queue_capacity: 64
///   upstream_frame_bytes: 6400
///   max_turn_bytes: 10485760
///   max_turn_seconds: 120
///   idle_timeout_seconds: 300
///
/// security:
///   cors_allowed_origins: "https://example.com"
///   max_websocket_connections: 1000
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub gemini: Option<GeminiYaml>,
    pub token: Option<TokenYaml>,
    pub session: Option<SessionYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Gemini Live settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GeminiYaml {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub system_instruction: Option<String>,
    pub api_version: Option<String>,
    pub api_base_url: Option<String>,
    pub ws_base_url: Option<String>,
    pub setup_timeout_seconds: Option<u64>,
}

/// Ephemeral token lifetime from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TokenYaml {
    pub uses: Option<u32>,
    pub expire_minutes: Option<u64>,
    pub new_session_expire_minutes: Option<u64>,
}

/// Per-session limits from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub queue_capacity: Option<usize>,
    pub upstream_frame_bytes: Option<usize>,
    pub max_turn_bytes: Option<usize>,
    pub max_turn_seconds: Option<u64>,
    pub idle_timeout_seconds: Option<u64>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
    /// Maximum concurrent WebSocket connections
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Required fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
