//! Gemini Live WebSocket client.
//!
//! [`GeminiLiveConnector`] opens one `BidiGenerateContentConstrained`
//! connection per call, sends the setup message and waits for
//! `setupComplete` before returning. The write half is shared with the read
//! half so pings can be answered while the relay owns both.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::config::GeminiLiveConfig;
use super::messages::{RealtimeInputMessage, ServerMessage, SetupMessage};
use crate::core::live::{
    CredentialToken, LiveConnection, LiveConnector, LiveError, LiveResult, LiveSink, LiveSource,
    RemoteEvent,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SharedSink = Arc<Mutex<SplitSink<WsStream, Message>>>;

// =============================================================================
// Connector
// =============================================================================

/// Opens token-authenticated Gemini Live connections.
#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    config: GeminiLiveConfig,
}

impl GeminiLiveConnector {
    pub fn new(config: GeminiLiveConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(
        &self,
        token: &CredentialToken,
        resume_handle: Option<&str>,
    ) -> LiveResult<LiveConnection> {
        let url = self.config.ws_url(token.secret())?;
        let setup_timeout = self.config.setup_timeout;

        let (ws_stream, _response) = timeout(setup_timeout, tokio_tungstenite::connect_async(url.as_str()))
            .await
            .map_err(|_| LiveError::Timeout("WebSocket connect".to_string()))?
            .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

        debug!(
            model = %self.config.model,
            resuming = resume_handle.is_some(),
            "Connected to Gemini Live, sending setup"
        );

        let (ws_sink, mut ws_stream) = ws_stream.split();
        let sink: SharedSink = Arc::new(Mutex::new(ws_sink));

        let setup = SetupMessage::new(
            self.config.model_resource(),
            self.config.system_instruction.as_deref(),
            resume_handle,
        );
        send_json(&sink, &setup).await?;

        let pending = timeout(setup_timeout, await_setup_complete(&mut ws_stream, &sink))
            .await
            .map_err(|_| LiveError::Timeout("waiting for setupComplete".to_string()))??;

        info!(
            model = %self.config.model,
            resumed = resume_handle.is_some(),
            "Gemini Live session ready"
        );

        Ok(LiveConnection {
            sink: Box::new(GeminiSink {
                sink: Arc::clone(&sink),
                closed: false,
            }),
            source: Box::new(GeminiSource {
                stream: ws_stream,
                sink,
                pending,
                finished: false,
            }),
        })
    }
}

/// Read until `setupComplete`, keeping any events that arrive alongside it.
async fn await_setup_complete(
    stream: &mut SplitStream<WsStream>,
    sink: &SharedSink,
) -> LiveResult<VecDeque<RemoteEvent>> {
    let mut pending = VecDeque::new();

    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(|e| LiveError::SetupFailed(e.to_string()))?;
        let payload = match frame {
            Message::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            Message::Binary(data) => data,
            Message::Ping(data) => {
                reply_pong(sink, data).await;
                continue;
            }
            Message::Close(close) => {
                let reason = close
                    .map(|c| format!("{} {}", u16::from(c.code), c.reason))
                    .unwrap_or_else(|| "no close frame".to_string());
                return Err(LiveError::SetupFailed(format!(
                    "Connection closed during setup: {reason}"
                )));
            }
            _ => continue,
        };

        let message = ServerMessage::parse(&payload)?;
        let ready = message.is_setup_complete();
        pending.extend(message.into_events()?);
        if ready {
            return Ok(pending);
        }
    }

    Err(LiveError::SetupFailed(
        "Connection ended before setupComplete".to_string(),
    ))
}

async fn send_json<T: serde::Serialize>(sink: &SharedSink, message: &T) -> LiveResult<()> {
    let json =
        serde_json::to_string(message).map_err(|e| LiveError::SerializationError(e.to_string()))?;
    sink.lock()
        .await
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| LiveError::WebSocketError(e.to_string()))
}

async fn reply_pong(sink: &SharedSink, data: Bytes) {
    if let Err(e) = sink.lock().await.send(Message::Pong(data)).await {
        warn!("Failed to send pong: {}", e);
    }
}

// =============================================================================
// Write Half
// =============================================================================

struct GeminiSink {
    sink: SharedSink,
    closed: bool,
}

#[async_trait]
impl LiveSink for GeminiSink {
    async fn send_audio(&mut self, pcm: Bytes) -> LiveResult<()> {
        if self.closed {
            return Err(LiveError::NotConnected);
        }
        send_json(&self.sink, &RealtimeInputMessage::audio(&pcm)).await
    }

    async fn end_audio_stream(&mut self) -> LiveResult<()> {
        if self.closed {
            return Err(LiveError::NotConnected);
        }
        send_json(&self.sink, &RealtimeInputMessage::audio_stream_end()).await
    }

    async fn close(&mut self) -> LiveResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut sink = self.sink.lock().await;
        // The remote may already be gone; a failed close frame is not an error.
        let _ = sink.send(Message::Close(None)).await;
        sink.close()
            .await
            .map_err(|e| LiveError::WebSocketError(e.to_string()))
    }
}

// =============================================================================
// Read Half
// =============================================================================

struct GeminiSource {
    stream: SplitStream<WsStream>,
    sink: SharedSink,
    pending: VecDeque<RemoteEvent>,
    finished: bool,
}

#[async_trait]
impl LiveSource for GeminiSource {
    async fn next_event(&mut self) -> Option<LiveResult<RemoteEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.finished {
                return None;
            }

            let frame = match self.stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(LiveError::WebSocketError(e.to_string())));
                }
                None => {
                    self.finished = true;
                    return None;
                }
            };

            let payload = match frame {
                Message::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
                Message::Binary(data) => data,
                Message::Ping(data) => {
                    reply_pong(&self.sink, data).await;
                    continue;
                }
                Message::Close(close) => {
                    info!(
                        code = close.as_ref().map(|c| u16::from(c.code)),
                        reason = close.as_ref().map(|c| c.reason.to_string()),
                        "Gemini Live closed the connection"
                    );
                    self.finished = true;
                    return None;
                }
                _ => continue,
            };

            match ServerMessage::parse(&payload).and_then(ServerMessage::into_events) {
                Ok(events) => self.pending.extend(events),
                Err(e) => {
                    // One unreadable message does not end the session.
                    warn!("Skipping unreadable Gemini message: {}", e);
                }
            }
        }
    }
}
