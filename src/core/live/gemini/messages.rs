//! Gemini Live API WebSocket message types.
//!
//! All messages are JSON objects with exactly one top-level key on the client
//! side. Server messages may combine several keys, so every field is optional.
//!
//! # Protocol Overview
//!
//! Client messages (sent to server):
//! - setup - Model, response modality, system instruction, resumption handle
//! - realtimeInput.audio - Base64 PCM blob
//! - realtimeInput.audioStreamEnd - End of the current turn's audio
//!
//! Server messages (received from server):
//! - setupComplete - Setup accepted; the session is ready
//! - serverContent.modelTurn.parts[].inlineData - Base64 response audio
//! - serverContent.interrupted - Response cut short
//! - serverContent.turnComplete - Response finished
//! - sessionResumptionUpdate - New resumption handle
//! - goAway - The server will close the connection soon

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::audio::INPUT_MIME_TYPE;
use crate::core::live::{LiveError, LiveResult, RemoteEvent};

// =============================================================================
// Client Messages
// =============================================================================

/// First message on every connection.
#[derive(Debug, Clone, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    /// Always present so the server issues resumption handles
    pub session_resumption: SessionResumptionConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionResumptionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

impl SetupMessage {
    pub fn new(
        model_resource: String,
        system_instruction: Option<&str>,
        resume_handle: Option<&str>,
    ) -> Self {
        Self {
            setup: Setup {
                model: model_resource,
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                },
                system_instruction: system_instruction.map(|text| Content {
                    parts: vec![TextPart {
                        text: text.to_string(),
                    }],
                }),
                session_resumption: SessionResumptionConfig {
                    handle: resume_handle.map(str::to_string),
                },
            },
        }
    }
}

/// Streaming input message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_stream_end: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub data: String,
    pub mime_type: String,
}

impl RealtimeInputMessage {
    /// PCM16 16kHz mono audio.
    pub fn audio(pcm: &[u8]) -> Self {
        Self {
            realtime_input: RealtimeInput {
                audio: Some(Blob {
                    data: BASE64_STANDARD.encode(pcm),
                    mime_type: INPUT_MIME_TYPE.to_string(),
                }),
                audio_stream_end: None,
            },
        }
    }

    pub fn audio_stream_end() -> Self {
        Self {
            realtime_input: RealtimeInput {
                audio: None,
                audio_stream_end: Some(true),
            },
        }
    }
}

// =============================================================================
// Server Messages
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub session_resumption_update: Option<SessionResumptionUpdate>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub data: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumptionUpdate {
    #[serde(default)]
    pub new_handle: Option<String>,
    #[serde(default)]
    pub resumable: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub fn parse(raw: &[u8]) -> LiveResult<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| LiveError::SerializationError(format!("Invalid server message: {e}")))
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten into relay events, in the order they must be acted on.
    ///
    /// Audio comes before the turn-complete flag carried by the same message.
    /// Handles are only kept when the server marks them resumable.
    pub fn into_events(self) -> LiveResult<Vec<RemoteEvent>> {
        let mut events = Vec::new();

        if let Some(content) = self.server_content {
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(inline) = part.inline_data {
                        let audio = BASE64_STANDARD.decode(inline.data.as_bytes()).map_err(|e| {
                            LiveError::SerializationError(format!("Invalid audio payload: {e}"))
                        })?;
                        if !audio.is_empty() {
                            events.push(RemoteEvent::Audio(Bytes::from(audio)));
                        }
                    }
                }
            }
            if content.interrupted {
                events.push(RemoteEvent::Interrupted);
            }
            if content.turn_complete {
                events.push(RemoteEvent::TurnComplete);
            }
        }

        if let Some(update) = self.session_resumption_update
            && update.resumable
            && let Some(handle) = update.new_handle.filter(|h| !h.is_empty())
        {
            events.push(RemoteEvent::ResumptionUpdate { handle });
        }

        if let Some(go_away) = self.go_away {
            events.push(RemoteEvent::GoAway {
                time_left: go_away.time_left,
            });
        }

        Ok(events)
    }
}
