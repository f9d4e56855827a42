use std::path::PathBuf;

use super::env::EnvConfig;
use super::yaml::{TlsYaml, YamlConfig};
use super::{ServerConfig, TlsConfig};

/// Build the final configuration: environment values first, YAML values on top.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let env = EnvConfig::load()?;
    let yaml = yaml.unwrap_or_default();

    let server = yaml.server.unwrap_or_default();
    let gemini = yaml.gemini.unwrap_or_default();
    let token = yaml.token.unwrap_or_default();
    let session = yaml.session.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    let tls = match server.tls {
        Some(tls_yaml) => tls_from_yaml(tls_yaml)?,
        None => tls_from_env(env.tls_cert_path.clone(), env.tls_key_path.clone())?,
    };

    let google_api_key = gemini
        .api_key
        .or(env.google_api_key)
        .filter(|key| !key.is_empty())
        .ok_or("GOOGLE_API_KEY is required (or gemini.api_key in the YAML config)")?;

    Ok(ServerConfig {
        host: server.host.unwrap_or(env.host),
        port: server.port.unwrap_or(env.port),
        tls,
        google_api_key,
        gemini_model: gemini.model.unwrap_or(env.gemini_model),
        gemini_system_instruction: gemini
            .system_instruction
            .or(env.gemini_system_instruction),
        gemini_api_version: gemini.api_version.unwrap_or(env.gemini_api_version),
        gemini_api_base_url: gemini.api_base_url.unwrap_or(env.gemini_api_base_url),
        gemini_ws_base_url: gemini.ws_base_url.unwrap_or(env.gemini_ws_base_url),
        setup_timeout_seconds: gemini
            .setup_timeout_seconds
            .unwrap_or(env.setup_timeout_seconds),
        token_uses: token.uses.unwrap_or(env.token_uses),
        token_expire_minutes: token.expire_minutes.unwrap_or(env.token_expire_minutes),
        token_session_start_minutes: token
            .new_session_expire_minutes
            .unwrap_or(env.token_session_start_minutes),
        session_queue_capacity: session.queue_capacity.unwrap_or(env.session_queue_capacity),
        upstream_frame_bytes: session
            .upstream_frame_bytes
            .unwrap_or(env.upstream_frame_bytes),
        max_turn_bytes: session.max_turn_bytes.unwrap_or(env.max_turn_bytes),
        max_turn_seconds: session.max_turn_seconds.unwrap_or(env.max_turn_seconds),
        idle_timeout_seconds: session
            .idle_timeout_seconds
            .unwrap_or(env.idle_timeout_seconds),
        cors_allowed_origins: security.cors_allowed_origins.or(env.cors_allowed_origins),
        max_websocket_connections: security
            .max_websocket_connections
            .or(env.max_websocket_connections),
        max_connections_per_ip: security
            .max_connections_per_ip
            .unwrap_or(env.max_connections_per_ip),
    })
}

fn tls_from_yaml(tls: TlsYaml) -> Result<Option<TlsConfig>, Box<dyn std::error::Error>> {
    if tls.enabled == Some(false) {
        return Ok(None);
    }
    match (tls.cert_path, tls.key_path) {
        (Some(cert), Some(key)) => Ok(Some(TlsConfig {
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
        })),
        (None, None) if tls.enabled.is_none() => Ok(None),
        _ => Err("server.tls requires both cert_path and key_path".into()),
    }
}

fn tls_from_env(
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
) -> Result<Option<TlsConfig>, Box<dyn std::error::Error>> {
    match (cert, key) {
        (Some(cert_path), Some(key_path)) => Ok(Some(TlsConfig {
            cert_path,
            key_path,
        })),
        (None, None) => Ok(None),
        (Some(_), None) => Err("TLS_KEY_PATH must be set when TLS_CERT_PATH is set".into()),
        (None, Some(_)) => Err("TLS_CERT_PATH must be set when TLS_KEY_PATH is set".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_from_yaml_disabled() {
        let tls = TlsYaml {
            enabled: Some(false),
            cert_path: Some("cert.pem".into()),
            key_path: Some("key.pem".into()),
        };
        assert!(tls_from_yaml(tls).unwrap().is_none());
    }

    #[test]
    fn test_tls_from_yaml_enabled_without_paths() {
        let tls = TlsYaml {
            enabled: Some(true),
            cert_path: None,
            key_path: None,
        };
        assert!(tls_from_yaml(tls).is_err());
    }

    #[test]
    fn test_tls_from_env_pairs() {
        assert!(tls_from_env(None, None).unwrap().is_none());
        assert!(
            tls_from_env(Some("c".into()), Some("k".into()))
                .unwrap()
                .is_some()
        );
        assert!(tls_from_env(None, Some("k".into())).is_err());
    }
}
