//! Gemini Live backend.
//!
//! # Session Flow
//!
//! 1. [`GeminiTokenIssuer`] mints an ephemeral token with the server's API key.
//! 2. [`GeminiLiveConnector`] opens the WebSocket with that token, sends
//!    `setup` and waits for `setupComplete`.
//! 3. Audio goes up as base64 PCM16 16kHz `realtimeInput` messages; each turn
//!    ends with `audioStreamEnd`.
//! 4. Response audio (PCM16 24kHz) comes back in `serverContent` until
//!    `turnComplete`.
//!
//! The setup always asks for session resumption, so the server keeps sending
//! handles that let a dropped connection continue where it left off.

mod client;
mod config;
mod messages;
mod token;

pub use client::GeminiLiveConnector;
pub use config::{
    DEFAULT_GEMINI_API_BASE_URL, DEFAULT_GEMINI_API_VERSION, DEFAULT_GEMINI_MODEL,
    DEFAULT_GEMINI_WS_BASE_URL, GeminiLiveConfig, GeminiTokenConfig,
};
pub use messages::{RealtimeInputMessage, ServerMessage, SetupMessage};
pub use token::GeminiTokenIssuer;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::live::{CredentialToken, LiveConnector, LiveError, RemoteEvent};
    use bytes::Bytes;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    async fn next_json<S>(ws: &mut S) -> Value
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                Message::Binary(data) => return serde_json::from_slice(&data).unwrap(),
                _ => continue,
            }
        }
    }

    fn live_config(addr: std::net::SocketAddr) -> GeminiLiveConfig {
        GeminiLiveConfig {
            model: "gemini-test".to_string(),
            ws_base_url: format!("ws://{addr}"),
            setup_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_setup_and_turn() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let setup = next_json(&mut ws).await;
            assert_eq!(setup["setup"]["model"], "models/gemini-test");
            assert_eq!(setup["setup"]["sessionResumption"]["handle"], "resume-me");
            ws.send(Message::Text(r#"{"setupComplete":{}}"#.into()))
                .await
                .unwrap();

            let audio = next_json(&mut ws).await;
            assert_eq!(audio["realtimeInput"]["audio"]["data"], "AAE=");
            let end = next_json(&mut ws).await;
            assert_eq!(end["realtimeInput"]["audioStreamEnd"], true);

            let reply = json!({
                "serverContent": {
                    "modelTurn": { "parts": [{ "inlineData": { "data": "CQk=" } }] },
                    "turnComplete": true
                }
            });
            // Binary-framed JSON must be accepted too.
            ws.send(Message::Binary(reply.to_string().into_bytes().into()))
                .await
                .unwrap();
            ws.close(None).await.ok();
        });

        let connector = GeminiLiveConnector::new(live_config(addr));
        let token = CredentialToken::new("auth_tokens/t", None);
        let mut connection = connector.connect(&token, Some("resume-me")).await.unwrap();

        connection
            .sink
            .send_audio(Bytes::from_static(&[0, 1]))
            .await
            .unwrap();
        connection.sink.end_audio_stream().await.unwrap();

        let first = connection.source.next_event().await.unwrap().unwrap();
        assert_eq!(first, RemoteEvent::Audio(Bytes::from_static(&[9, 9])));
        let second = connection.source.next_event().await.unwrap().unwrap();
        assert_eq!(second, RemoteEvent::TurnComplete);
        assert!(connection.source.next_event().await.is_none());

        connection.sink.close().await.ok();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejected_during_setup() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _setup = next_json(&mut ws).await;
            ws.close(None).await.ok();
        });

        let connector = GeminiLiveConnector::new(live_config(addr));
        let token = CredentialToken::new("auth_tokens/t", None);
        let result = connector.connect(&token, None).await;

        assert!(matches!(result, Err(LiveError::SetupFailed(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = GeminiLiveConnector::new(live_config(addr));
        let token = CredentialToken::new("auth_tokens/t", None);
        let result = connector.connect(&token, None).await;

        assert!(matches!(result, Err(LiveError::ConnectionFailed(_))));
    }
}
