//! Ephemeral token issuance for Gemini Live.
//!
//! The long-lived API key never leaves the relay. Each session gets its own
//! short-lived token minted through `POST /{version}/auth_tokens`, which the
//! WebSocket connection then presents as `access_token`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use zeroize::Zeroize;

use super::config::GeminiTokenConfig;
use crate::core::live::{AuthError, CredentialIssuer, CredentialToken};

/// Timeout for the token request itself.
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTokenRequest {
    uses: u32,
    expire_time: String,
    new_session_expire_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTokenResponse {
    name: Option<String>,
    #[serde(default)]
    expire_time: Option<String>,
}

/// Mints one ephemeral token per call using the configured API key.
pub struct GeminiTokenIssuer {
    api_key: String,
    config: GeminiTokenConfig,
    http_client: reqwest::Client,
}

impl GeminiTokenIssuer {
    pub fn new(api_key: impl Into<String>, config: GeminiTokenConfig) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder()
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Request(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key: api_key.into(),
            config,
            http_client,
        })
    }

    fn request_body(&self, now: OffsetDateTime) -> Result<CreateTokenRequest, AuthError> {
        let format = |offset: Duration| {
            (now + offset)
                .format(&Rfc3339)
                .map_err(|e| AuthError::Request(format!("Failed to format expiry: {e}")))
        };

        Ok(CreateTokenRequest {
            uses: self.config.uses,
            expire_time: format(self.config.expire_after)?,
            new_session_expire_time: format(self.config.new_session_expire_after)?,
        })
    }
}

impl Drop for GeminiTokenIssuer {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

#[async_trait]
impl CredentialIssuer for GeminiTokenIssuer {
    async fn issue_token(&self) -> Result<CredentialToken, AuthError> {
        let now = OffsetDateTime::now_utc();
        let body = self.request_body(now)?;

        debug!(
            uses = body.uses,
            expire_time = %body.expire_time,
            "Requesting Gemini ephemeral token"
        );

        let response = self
            .http_client
            .post(self.config.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected(format!("{status}: {error_text}")));
        }

        let parsed: CreateTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        let name = parsed
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AuthError::InvalidResponse("missing token name".to_string()))?;

        let expires_at = parsed
            .expire_time
            .and_then(|raw| OffsetDateTime::parse(&raw, &Rfc3339).ok())
            .or(Some(now + self.config.expire_after));

        debug!("Gemini ephemeral token issued");
        Ok(CredentialToken::new(name, expires_at))
    }
}
