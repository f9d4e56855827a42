use super::ServerConfig;

/// Reject settings the relay cannot run with.
pub(super) fn validate(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.gemini_model.trim().is_empty() {
        return Err("gemini_model must not be empty".into());
    }
    if config.token_uses == 0 {
        return Err("token_uses must be at least 1".into());
    }
    if config.token_expire_minutes == 0 {
        return Err("token_expire_minutes must be at least 1".into());
    }
    if config.session_queue_capacity == 0 {
        return Err("session_queue_capacity must be at least 1".into());
    }
    // PCM16 frames must not split a sample
    if config.upstream_frame_bytes == 0 || config.upstream_frame_bytes % 2 != 0 {
        return Err(format!(
            "upstream_frame_bytes must be a positive even number, got {}",
            config.upstream_frame_bytes
        )
        .into());
    }
    if config.max_turn_bytes == 0 {
        return Err("max_turn_bytes must be at least 1".into());
    }
    if config.max_turn_seconds == 0 {
        return Err("max_turn_seconds must be at least 1".into());
    }
    if config.idle_timeout_seconds == 0 {
        return Err("idle_timeout_seconds must be at least 1".into());
    }
    Ok(())
}
