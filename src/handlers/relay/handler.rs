//! Client connection handler
//!
//! Owns one browser socket's read side for the lifetime of a session. Audio
//! chunks are buffered per turn, converted once the client sends
//! `END_OF_STREAM`, and handed to the upstream bridge as fixed-size PCM
//! frames. Everything going back to the browser goes through one FIFO queue
//! drained by the writer task.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use axum::extract::ws::Message;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::{
    CONVERSION_FAILED_MESSAGE, ClientInput, READY_MESSAGE, RESUMED_MESSAGE, RelayMessageRoute,
    TURN_COMPLETE_MESSAGE,
};
use crate::core::audio::{AudioConverter, ConversionError};
use crate::core::live::{UpstreamCommand, UpstreamEvent};
use crate::errors::RelayError;

/// Where the session is in its turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting for the remote connection
    Connecting,
    /// A new turn may start
    Ready,
    /// Buffering the current turn's chunks
    Recording,
    /// The turn is being decoded
    Converting,
    /// The turn was sent; waiting for turn-complete
    AwaitingResponse,
    /// A fatal error was reported; no further input is accepted
    Failed,
}

impl SessionPhase {
    fn accepts_audio(self) -> bool {
        matches!(self, Self::Ready | Self::Recording)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Recording => "recording",
            Self::Converting => "converting",
            Self::AwaitingResponse => "awaiting_response",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed the socket
    ClientClosed,
    /// The client socket failed
    ClientError,
    /// No client traffic within the idle timeout
    IdleTimeout,
    /// The bridge reported a fatal error
    Failed,
    /// The bridge or the writer went away
    PeerGone,
}

/// Per-session limits taken from the server configuration.
#[derive(Debug, Clone, Copy)]
pub struct HandlerLimits {
    pub upstream_frame_bytes: usize,
    pub max_turn_bytes: usize,
    pub idle_timeout: Duration,
}

pub struct ClientHandler {
    session_id: String,
    phase: SessionPhase,
    limits: HandlerLimits,
    converter: AudioConverter,
    cancel: CancellationToken,
    client_tx: mpsc::Sender<RelayMessageRoute>,
    commands: mpsc::Sender<UpstreamCommand>,
    /// Compressed audio of the current turn
    buffer: BytesMut,
    /// Set when the current turn outgrew `max_turn_bytes`
    turn_rejected: bool,
    conversion: Option<JoinHandle<Result<Bytes, ConversionError>>>,
    /// Frames waiting for room in the bridge queue
    outbox: VecDeque<UpstreamCommand>,
}

impl ClientHandler {
    pub fn new(
        session_id: impl Into<String>,
        limits: HandlerLimits,
        converter: AudioConverter,
        cancel: CancellationToken,
        client_tx: mpsc::Sender<RelayMessageRoute>,
        commands: mpsc::Sender<UpstreamCommand>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            phase: SessionPhase::Connecting,
            limits,
            converter,
            cancel,
            client_tx,
            commands,
            buffer: BytesMut::new(),
            turn_rejected: false,
            conversion: None,
            outbox: VecDeque::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Serve the session until either side ends it.
    ///
    /// `receiver` is the read half of the client socket.
    pub async fn run<S>(
        mut self,
        mut receiver: S,
        mut events: mpsc::Receiver<UpstreamEvent>,
    ) -> SessionEnd
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        let mut deadline = Instant::now() + self.limits.idle_timeout;

        loop {
            let flushing = !self.outbox.is_empty();
            let converting = self.conversion.is_some();
            let commands = self.commands.clone();

            tokio::select! {
                biased;

                event = events.recv() => {
                    let Some(event) = event else {
                        debug!(session_id = %self.session_id, "Bridge event queue closed");
                        return SessionEnd::PeerGone;
                    };
                    if let Some(end) = self.on_upstream_event(event).await {
                        return end;
                    }
                }

                permit = commands.reserve(), if flushing => {
                    let Ok(permit) = permit else {
                        debug!(session_id = %self.session_id, "Bridge command queue closed");
                        self.outbox.clear();
                        continue;
                    };
                    if let Some(command) = self.outbox.pop_front() {
                        permit.send(command);
                    }
                }

                result = wait_conversion(&mut self.conversion), if converting => {
                    self.conversion = None;
                    if let Some(end) = self.on_conversion_done(result).await {
                        return end;
                    }
                }

                // Not reading the socket while frames wait is the backpressure.
                message = receiver.next(), if !flushing => {
                    deadline = Instant::now() + self.limits.idle_timeout;
                    match message {
                        Some(Ok(message)) => {
                            if let Some(end) = self.on_client_message(message).await {
                                return end;
                            }
                        }
                        Some(Err(e)) => {
                            self.on_fatal_error(RelayError::ClientTransport(e.to_string())).await;
                            return SessionEnd::ClientError;
                        }
                        None => {
                            self.on_client_disconnect();
                            return SessionEnd::ClientClosed;
                        }
                    }
                }

                _ = sleep_until(deadline), if !flushing => {
                    warn!(
                        session_id = %self.session_id,
                        idle_secs = self.limits.idle_timeout.as_secs(),
                        "Closing idle relay session"
                    );
                    return SessionEnd::IdleTimeout;
                }
            }
        }
    }

    async fn on_client_message(&mut self, message: Message) -> Option<SessionEnd> {
        let input = match message {
            Message::Binary(data) => ClientInput::Chunk(data),
            Message::Text(text) => ClientInput::from_text(text.as_str()),
            Message::Close(_) => {
                self.on_client_disconnect();
                return Some(SessionEnd::ClientClosed);
            }
            Message::Ping(_) | Message::Pong(_) => return None,
        };

        match input {
            ClientInput::Chunk(chunk) => self.on_binary_chunk(chunk),
            ClientInput::EndOfTurn => self.on_end_of_turn_marker().await,
            ClientInput::UnknownText(text) => {
                self.protocol_violation(format!("unexpected text message ({} bytes)", text.len()));
            }
        }
        None
    }

    /// Append a compressed chunk to the current turn.
    pub fn on_binary_chunk(&mut self, chunk: Bytes) {
        if !self.phase.accepts_audio() {
            self.protocol_violation(format!(
                "dropping {} byte chunk while {}",
                chunk.len(),
                self.phase
            ));
            return;
        }

        self.phase = SessionPhase::Recording;
        if self.turn_rejected {
            debug!(session_id = %self.session_id, bytes = chunk.len(), "Dropping chunk of oversized turn");
            return;
        }
        if self.buffer.len() + chunk.len() > self.limits.max_turn_bytes {
            self.protocol_violation(format!(
                "turn exceeds {} bytes, discarding it",
                self.limits.max_turn_bytes
            ));
            self.buffer.clear();
            self.turn_rejected = true;
            return;
        }

        self.buffer.extend_from_slice(&chunk);
        debug!(
            session_id = %self.session_id,
            bytes = chunk.len(),
            buffered = self.buffer.len(),
            "Buffered audio chunk"
        );
    }

    /// Close the current turn and start converting it.
    pub async fn on_end_of_turn_marker(&mut self) {
        match self.phase {
            SessionPhase::Recording => {}
            SessionPhase::Ready => {
                self.protocol_violation("end of turn without audio".to_string());
                return;
            }
            _ => {
                self.protocol_violation(format!("end of turn while {}", self.phase));
                return;
            }
        }

        let audio = self.buffer.split().freeze();
        if std::mem::take(&mut self.turn_rejected) {
            self.phase = SessionPhase::Ready;
            self.send_client(RelayMessageRoute::status(CONVERSION_FAILED_MESSAGE))
                .await;
            return;
        }

        info!(
            session_id = %self.session_id,
            bytes = audio.len(),
            "Turn recorded, converting"
        );
        self.phase = SessionPhase::Converting;
        self.conversion = Some(self.converter.spawn(audio, self.cancel.child_token()));
    }

    async fn on_conversion_done(
        &mut self,
        result: Result<Result<Bytes, ConversionError>, tokio::task::JoinError>,
    ) -> Option<SessionEnd> {
        let pcm = match result {
            Ok(Ok(pcm)) => pcm,
            Ok(Err(ConversionError::Cancelled)) => {
                debug!(session_id = %self.session_id, "Conversion cancelled");
                return None;
            }
            Ok(Err(e)) => {
                self.on_conversion_error(RelayError::Conversion(e)).await;
                return None;
            }
            Err(e) => {
                error!(session_id = %self.session_id, "Conversion task failed: {}", e);
                self.on_conversion_error(RelayError::Conversion(ConversionError::Decode(
                    e.to_string(),
                )))
                .await;
                return None;
            }
        };

        let frame_bytes = self.limits.upstream_frame_bytes;
        let mut offset = 0;
        while offset < pcm.len() {
            let end = (offset + frame_bytes).min(pcm.len());
            self.outbox
                .push_back(UpstreamCommand::Audio(pcm.slice(offset..end)));
            offset = end;
        }
        self.outbox.push_back(UpstreamCommand::EndOfTurn);

        info!(
            session_id = %self.session_id,
            bytes = pcm.len(),
            frames = self.outbox.len() - 1,
            "Forwarding turn upstream"
        );
        self.phase = SessionPhase::AwaitingResponse;
        None
    }

    async fn on_conversion_error(&mut self, err: RelayError) {
        warn!(session_id = %self.session_id, "{}", err);
        self.phase = SessionPhase::Ready;
        self.send_client(RelayMessageRoute::status(CONVERSION_FAILED_MESSAGE))
            .await;
    }

    async fn on_upstream_event(&mut self, event: UpstreamEvent) -> Option<SessionEnd> {
        match event {
            UpstreamEvent::Audio(frame) => {
                self.on_remote_audio_frame(frame).await;
                None
            }
            UpstreamEvent::Failed(err) if !err.is_fatal() => {
                warn!(session_id = %self.session_id, "Bridge reported: {}", err);
                None
            }
            UpstreamEvent::Failed(err) => {
                self.on_fatal_error(err).await;
                Some(SessionEnd::Failed)
            }
            other => {
                self.on_remote_control_event(other).await;
                None
            }
        }
    }

    /// Response audio goes to the client unchanged and in arrival order.
    pub async fn on_remote_audio_frame(&mut self, frame: Bytes) {
        debug!(session_id = %self.session_id, bytes = frame.len(), "Relaying response audio");
        self.send_client(RelayMessageRoute::Audio(frame)).await;
    }

    pub async fn on_remote_control_event(&mut self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Ready { resumed: false } => {
                info!(session_id = %self.session_id, "Session ready");
                self.phase = SessionPhase::Ready;
                self.send_client(RelayMessageRoute::status(READY_MESSAGE))
                    .await;
            }
            UpstreamEvent::Ready { resumed: true } => self.on_resumed().await,
            UpstreamEvent::TurnComplete => {
                if self.phase != SessionPhase::AwaitingResponse {
                    debug!(session_id = %self.session_id, phase = %self.phase, "Ignoring stray turn complete");
                    return;
                }
                info!(session_id = %self.session_id, "Turn complete");
                self.phase = SessionPhase::Ready;
                self.send_client(RelayMessageRoute::status(TURN_COMPLETE_MESSAGE))
                    .await;
            }
            UpstreamEvent::Interrupted => {
                info!(session_id = %self.session_id, "Response interrupted by the remote");
            }
            UpstreamEvent::Audio(frame) => self.on_remote_audio_frame(frame).await,
            UpstreamEvent::Failed(err) => self.on_fatal_error(err).await,
        }
    }

    /// The bridge replaced a dropped connection. A response in flight is lost.
    async fn on_resumed(&mut self) {
        match self.phase {
            SessionPhase::AwaitingResponse => {
                // The bridge drops the rest of the cut-off turn up to its end marker.
                self.outbox
                    .retain(|command| matches!(command, UpstreamCommand::EndOfTurn));
                self.phase = SessionPhase::Ready;
                warn!(session_id = %self.session_id, "Turn lost to reconnect");
                self.send_client(RelayMessageRoute::status(RESUMED_MESSAGE))
                    .await;
            }
            SessionPhase::Ready => {
                self.send_client(RelayMessageRoute::status(RESUMED_MESSAGE))
                    .await;
            }
            phase => {
                info!(session_id = %self.session_id, %phase, "Remote session resumed");
            }
        }
    }

    /// Surface a fatal error once, then stop accepting input.
    pub async fn on_fatal_error(&mut self, err: RelayError) {
        self.phase = SessionPhase::Failed;
        self.outbox.clear();
        self.cancel.cancel();

        match err.client_message() {
            Some(message) => {
                error!(session_id = %self.session_id, "Session failed: {}", err);
                self.send_client(RelayMessageRoute::error(message)).await;
            }
            None => {
                warn!(session_id = %self.session_id, "Session ended: {}", err);
            }
        }
    }

    pub fn on_client_disconnect(&mut self) {
        info!(
            session_id = %self.session_id,
            phase = %self.phase,
            "Client disconnected"
        );
        self.cancel.cancel();
    }

    fn protocol_violation(&self, detail: String) {
        let err = RelayError::ProtocolViolation(detail);
        warn!(session_id = %self.session_id, phase = %self.phase, "{}", err);
    }

    async fn send_client(&self, route: RelayMessageRoute) {
        if self.client_tx.send(route).await.is_err() {
            debug!(session_id = %self.session_id, "Client writer gone");
        }
    }
}

/// Await an in-flight conversion; only polled while one exists.
async fn wait_conversion(
    conversion: &mut Option<JoinHandle<Result<Bytes, ConversionError>>>,
) -> Result<Result<Bytes, ConversionError>, tokio::task::JoinError> {
    match conversion {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
