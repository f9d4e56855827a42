//! Environment variable loading
//!
//! | Variable | Default |
//! |---|---|
//! | `HOST` | `127.0.0.1` |
//! | `PORT` | `8765` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | unset (plain HTTP) |
//! | `GOOGLE_API_KEY` | required |
//! | `GEMINI_MODEL` | native-audio dialog model |
//! | `GEMINI_SYSTEM_INSTRUCTION` | unset |
//! | `GEMINI_API_VERSION` | `v1alpha` |
//! | `GEMINI_API_BASE_URL` | `https://generativelanguage.googleapis.com` |
//! | `GEMINI_WS_BASE_URL` | `wss://generativelanguage.googleapis.com` |
//! | `GEMINI_SETUP_TIMEOUT_SECONDS` | `15` |
//! | `TOKEN_USES` | `4` |
//! | `TOKEN_EXPIRE_MINUTES` | `30` |
//! | `TOKEN_NEW_SESSION_EXPIRE_MINUTES` | `30` |
//! | `SESSION_QUEUE_CAPACITY` | `64` |
//! | `UPSTREAM_FRAME_BYTES` | `6400` |
//! | `MAX_TURN_BYTES` | `10485760` |
//! | `MAX_TURN_SECONDS` | `120` |
//! | `IDLE_TIMEOUT_SECONDS` | `300` |
//! | `CORS_ALLOWED_ORIGINS` | unset |
//! | `MAX_WEBSOCKET_CONNECTIONS` | unset (unlimited) |
//! | `MAX_CONNECTIONS_PER_IP` | `100` |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::{
    DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT_SECONDS, DEFAULT_MAX_CONNECTIONS_PER_IP,
    DEFAULT_MAX_TURN_BYTES, DEFAULT_MAX_TURN_SECONDS, DEFAULT_PORT, DEFAULT_SESSION_QUEUE_CAPACITY,
    DEFAULT_SETUP_TIMEOUT_SECONDS, DEFAULT_TOKEN_EXPIRE_MINUTES,
    DEFAULT_TOKEN_SESSION_START_MINUTES, DEFAULT_TOKEN_USES, DEFAULT_UPSTREAM_FRAME_BYTES,
};
use crate::core::live::gemini::{
    DEFAULT_GEMINI_API_BASE_URL, DEFAULT_GEMINI_API_VERSION, DEFAULT_GEMINI_MODEL,
    DEFAULT_GEMINI_WS_BASE_URL,
};

/// Values read from the process environment, with defaults applied.
///
/// The API key stays optional here because a YAML file may still supply it.
#[derive(Debug, Clone)]
pub(super) struct EnvConfig {
    pub host: String,
    pub port: u16,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub google_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_system_instruction: Option<String>,
    pub gemini_api_version: String,
    pub gemini_api_base_url: String,
    pub gemini_ws_base_url: String,
    pub setup_timeout_seconds: u64,
    pub token_uses: u32,
    pub token_expire_minutes: u64,
    pub token_session_start_minutes: u64,
    pub session_queue_capacity: usize,
    pub upstream_frame_bytes: usize,
    pub max_turn_bytes: usize,
    pub max_turn_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub cors_allowed_origins: Option<String>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: u32,
}

impl EnvConfig {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            host: env_string("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: env_parse("PORT")?.unwrap_or(DEFAULT_PORT),
            tls_cert_path: env_string("TLS_CERT_PATH").map(PathBuf::from),
            tls_key_path: env_string("TLS_KEY_PATH").map(PathBuf::from),
            google_api_key: env_string("GOOGLE_API_KEY"),
            gemini_model: env_string("GEMINI_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            gemini_system_instruction: env_string("GEMINI_SYSTEM_INSTRUCTION"),
            gemini_api_version: env_string("GEMINI_API_VERSION")
                .unwrap_or_else(|| DEFAULT_GEMINI_API_VERSION.to_string()),
            gemini_api_base_url: env_string("GEMINI_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE_URL.to_string()),
            gemini_ws_base_url: env_string("GEMINI_WS_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GEMINI_WS_BASE_URL.to_string()),
            setup_timeout_seconds: env_parse("GEMINI_SETUP_TIMEOUT_SECONDS")?
                .unwrap_or(DEFAULT_SETUP_TIMEOUT_SECONDS),
            token_uses: env_parse("TOKEN_USES")?.unwrap_or(DEFAULT_TOKEN_USES),
            token_expire_minutes: env_parse("TOKEN_EXPIRE_MINUTES")?
                .unwrap_or(DEFAULT_TOKEN_EXPIRE_MINUTES),
            token_session_start_minutes: env_parse("TOKEN_NEW_SESSION_EXPIRE_MINUTES")?
                .unwrap_or(DEFAULT_TOKEN_SESSION_START_MINUTES),
            session_queue_capacity: env_parse("SESSION_QUEUE_CAPACITY")?
                .unwrap_or(DEFAULT_SESSION_QUEUE_CAPACITY),
            upstream_frame_bytes: env_parse("UPSTREAM_FRAME_BYTES")?
                .unwrap_or(DEFAULT_UPSTREAM_FRAME_BYTES),
            max_turn_bytes: env_parse("MAX_TURN_BYTES")?.unwrap_or(DEFAULT_MAX_TURN_BYTES),
            max_turn_seconds: env_parse("MAX_TURN_SECONDS")?.unwrap_or(DEFAULT_MAX_TURN_SECONDS),
            idle_timeout_seconds: env_parse("IDLE_TIMEOUT_SECONDS")?
                .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECONDS),
            cors_allowed_origins: env_string("CORS_ALLOWED_ORIGINS"),
            max_websocket_connections: env_parse("MAX_WEBSOCKET_CONNECTIONS")?,
            max_connections_per_ip: env_parse("MAX_CONNECTIONS_PER_IP")?
                .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_IP),
        })
    }
}

/// Read a variable, treating empty strings as unset.
fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {key} ('{raw}'): {e}").into()),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_string_ignores_blank() {
        unsafe {
            env::set_var("SPEECH_RELAY_TEST_BLANK", "   ");
        }
        assert_eq!(env_string("SPEECH_RELAY_TEST_BLANK"), None);
        unsafe {
            env::remove_var("SPEECH_RELAY_TEST_BLANK");
        }
    }

    #[test]
    #[serial]
    fn test_env_parse_reports_key() {
        unsafe {
            env::set_var("SPEECH_RELAY_TEST_NUM", "abc");
        }
        let result: Result<Option<u32>, _> = env_parse("SPEECH_RELAY_TEST_NUM");
        let message = result.unwrap_err().to_string();
        assert!(message.contains("SPEECH_RELAY_TEST_NUM"));
        assert!(message.contains("abc"));
        unsafe {
            env::remove_var("SPEECH_RELAY_TEST_NUM");
        }
    }
}
