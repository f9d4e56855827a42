//! Upstream bridge: one remote speech-API connection per client session.
//!
//! The bridge runs as its own task. It receives [`UpstreamCommand`]s from the
//! client handler, forwards them to the remote connection and reports back
//! with [`UpstreamEvent`]s. Both directions are bounded `mpsc` queues.
//!
//! ```text
//! Unauthenticated -> Connecting -> Ready -> Streaming -> AwaitingResponse
//!                                    ^                        |
//!                                    +------ turn complete ---+
//! ```
//!
//! Any error moves the bridge to `Failed`. A connection that drops
//! unexpectedly is given one reconnect with the latest resumption handle;
//! the allowance is restored once a turn completes on the new connection.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    AuthError, CredentialIssuer, CredentialToken, LiveConnection, LiveConnector, LiveError, LiveResult,
    RemoteEvent,
};
use crate::errors::RelayError;

/// Work for the bridge, in the order the handler produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamCommand {
    /// One PCM16 16kHz mono frame
    Audio(Bytes),
    /// The current turn's input is complete
    EndOfTurn,
}

/// What the bridge reports to the handler.
#[derive(Debug)]
pub enum UpstreamEvent {
    /// The remote accepted setup and a new turn may start
    Ready { resumed: bool },
    /// Response audio, to be written to the client as-is
    Audio(Bytes),
    /// All audio for the current turn has been delivered
    TurnComplete,
    /// The remote cut its response short
    Interrupted,
    /// The bridge has stopped; the session must be torn down
    Failed(RelayError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Unauthenticated,
    Connecting,
    Ready,
    Streaming,
    AwaitingResponse,
    Failed,
    Closed,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Streaming => "streaming",
            Self::AwaitingResponse => "awaiting_response",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Outcome of one step of the bridge loop.
enum Step {
    Continue,
    Stop,
    Dropped(LiveError),
}

pub struct UpstreamBridge {
    session_id: String,
    issuer: Arc<dyn CredentialIssuer>,
    connector: Arc<dyn LiveConnector>,
    commands: mpsc::Receiver<UpstreamCommand>,
    events: mpsc::Sender<UpstreamEvent>,
    cancel: CancellationToken,
    state: BridgeState,
    resume_handle: Option<String>,
    /// Set by a reconnect, cleared by the next completed turn
    reconnected: bool,
    /// Drop leftover frames of a turn that was cut off by a reconnect
    discard_turn: bool,
}

impl UpstreamBridge {
    pub fn new(
        session_id: impl Into<String>,
        issuer: Arc<dyn CredentialIssuer>,
        connector: Arc<dyn LiveConnector>,
        commands: mpsc::Receiver<UpstreamCommand>,
        events: mpsc::Sender<UpstreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            issuer,
            connector,
            commands,
            events,
            cancel,
            state: BridgeState::Unauthenticated,
            resume_handle: None,
            reconnected: false,
            discard_turn: false,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Drive the session until it closes or fails. Returns the final state.
    pub async fn run(mut self) -> BridgeState {
        let Some(token) = self.authenticate().await else {
            return self.state;
        };

        let Some(mut connection) = self.open(&token).await else {
            return self.state;
        };

        self.state = BridgeState::Ready;
        if !self.emit(UpstreamEvent::Ready { resumed: false }).await {
            self.close(connection).await;
            return self.state;
        }

        loop {
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Stop,
                command = self.commands.recv() => self.on_command(command, &mut connection).await,
                event = connection.source.next_event() => self.on_remote(event).await,
            };

            match step {
                Step::Continue => {}
                Step::Stop => break,
                Step::Dropped(cause) => {
                    connection = match self.recover(&token, connection, cause).await {
                        Some(connection) => connection,
                        None => return self.state,
                    };
                }
            }
        }

        self.close(connection).await;
        self.state
    }

    async fn authenticate(&mut self) -> Option<CredentialToken> {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.state = BridgeState::Closed;
                return None;
            }
            result = self.issuer.issue_token() => result,
        };

        match result {
            Ok(token) => {
                debug!(session_id = %self.session_id, "Ephemeral token issued");
                Some(token)
            }
            Err(e) => {
                self.fail(RelayError::Auth(e)).await;
                None
            }
        }
    }

    /// First connection attempt. A failure here is fatal.
    async fn open(&mut self, token: &CredentialToken) -> Option<LiveConnection> {
        self.state = BridgeState::Connecting;
        match self.connect(token).await? {
            Ok(connection) => Some(connection),
            Err(e) => {
                self.fail(RelayError::RemoteTransport(e)).await;
                None
            }
        }
    }

    /// Connect with the stored handle. `None` means the session was cancelled.
    async fn connect(&mut self, token: &CredentialToken) -> Option<LiveResult<LiveConnection>> {
        let connector = Arc::clone(&self.connector);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.state = BridgeState::Closed;
                None
            }
            result = connector.connect(token, self.resume_handle.as_deref()) => Some(result),
        }
    }

    async fn on_command(
        &mut self,
        command: Option<UpstreamCommand>,
        connection: &mut LiveConnection,
    ) -> Step {
        match command {
            None => {
                debug!(session_id = %self.session_id, "Handler gone, closing bridge");
                Step::Stop
            }
            Some(UpstreamCommand::Audio(pcm)) => {
                if self.discard_turn {
                    debug!(
                        session_id = %self.session_id,
                        bytes = pcm.len(),
                        "Dropping frame of a turn lost to reconnect"
                    );
                    return Step::Continue;
                }
                if self.state == BridgeState::Ready {
                    self.state = BridgeState::Streaming;
                }
                match connection.sink.send_audio(pcm).await {
                    Ok(()) => Step::Continue,
                    Err(e) => Step::Dropped(e),
                }
            }
            Some(UpstreamCommand::EndOfTurn) => {
                if self.discard_turn {
                    self.discard_turn = false;
                    return Step::Continue;
                }
                if self.state == BridgeState::Ready {
                    debug!(session_id = %self.session_id, "End of turn with no audio sent");
                    return Step::Continue;
                }
                match connection.sink.end_audio_stream().await {
                    Ok(()) => {
                        self.state = BridgeState::AwaitingResponse;
                        debug!(session_id = %self.session_id, "Turn input complete");
                        Step::Continue
                    }
                    Err(e) => Step::Dropped(e),
                }
            }
        }
    }

    async fn on_remote(&mut self, event: Option<LiveResult<RemoteEvent>>) -> Step {
        let event = match event {
            Some(Ok(event)) => event,
            Some(Err(e)) => return Step::Dropped(e),
            None => {
                return Step::Dropped(LiveError::ConnectionClosed(
                    "remote closed the connection".to_string(),
                ));
            }
        };

        let forwarded = match event {
            RemoteEvent::Audio(audio) => {
                if !self.turn_in_flight() {
                    warn!(
                        session_id = %self.session_id,
                        bytes = audio.len(),
                        state = %self.state,
                        "Dropping response audio outside a turn"
                    );
                    return Step::Continue;
                }
                UpstreamEvent::Audio(audio)
            }
            RemoteEvent::TurnComplete => {
                if !self.turn_in_flight() {
                    debug!(session_id = %self.session_id, "Ignoring turnComplete outside a turn");
                    return Step::Continue;
                }
                self.state = BridgeState::Ready;
                if std::mem::take(&mut self.reconnected) {
                    debug!(session_id = %self.session_id, "Turn completed after reconnect");
                }
                UpstreamEvent::TurnComplete
            }
            RemoteEvent::Interrupted => UpstreamEvent::Interrupted,
            RemoteEvent::ResumptionUpdate { handle } => {
                debug!(session_id = %self.session_id, "Resumption handle updated");
                self.resume_handle = Some(handle);
                return Step::Continue;
            }
            RemoteEvent::GoAway { time_left } => {
                warn!(
                    session_id = %self.session_id,
                    time_left = time_left.as_deref().unwrap_or("unknown"),
                    "Remote announced it will drop the connection"
                );
                return Step::Continue;
            }
        };

        if self.emit(forwarded).await {
            Step::Continue
        } else {
            Step::Stop
        }
    }

    /// Replace a dropped connection, at most once between completed turns.
    async fn recover(
        &mut self,
        token: &CredentialToken,
        mut dropped: LiveConnection,
        cause: LiveError,
    ) -> Option<LiveConnection> {
        // The remote end is already gone; close only releases our half.
        if let Err(e) = dropped.sink.close().await {
            debug!(session_id = %self.session_id, "Closing dropped connection: {}", e);
        }
        drop(dropped);

        if self.reconnected {
            error!(session_id = %self.session_id, "Remote connection lost again: {}", cause);
            self.fail(RelayError::RemoteTransport(cause)).await;
            return None;
        }
        self.reconnected = true;

        let now = OffsetDateTime::now_utc();
        if token.is_expired_at(now) {
            let expired = token
                .expires_at()
                .map(|t| t.to_string())
                .unwrap_or_default();
            error!(session_id = %self.session_id, "Cannot reconnect, token expired at {}", expired);
            self.fail(RelayError::Auth(AuthError::Expired(expired))).await;
            return None;
        }

        let was_streaming = self.state == BridgeState::Streaming;
        warn!(
            session_id = %self.session_id,
            state = %self.state,
            has_handle = self.resume_handle.is_some(),
            "Remote connection lost, reconnecting: {}",
            cause
        );

        self.state = BridgeState::Connecting;
        let mut connection = match self.connect(token).await? {
            Ok(connection) => connection,
            Err(e) => {
                error!(session_id = %self.session_id, "Reconnect failed: {}", e);
                self.fail(RelayError::RemoteTransport(e)).await;
                return None;
            }
        };

        info!(session_id = %self.session_id, "Remote session resumed");
        // Anything still queued belongs to the turn the drop cut off.
        self.discard_turn = was_streaming || !self.commands.is_empty();
        self.state = BridgeState::Ready;
        if !self.emit(UpstreamEvent::Ready { resumed: true }).await {
            if let Err(e) = connection.sink.close().await {
                debug!(session_id = %self.session_id, "Closing connection: {}", e);
            }
            return None;
        }
        Some(connection)
    }

    fn turn_in_flight(&self) -> bool {
        matches!(
            self.state,
            BridgeState::Streaming | BridgeState::AwaitingResponse
        )
    }

    /// Report to the handler. `false` means the handler is gone.
    async fn emit(&mut self, event: UpstreamEvent) -> bool {
        if self.events.send(event).await.is_err() {
            debug!(session_id = %self.session_id, "Event queue closed");
            self.state = BridgeState::Closed;
            return false;
        }
        true
    }

    async fn fail(&mut self, err: RelayError) {
        error!(session_id = %self.session_id, state = %self.state, "Upstream bridge failed: {}", err);
        self.state = BridgeState::Failed;
        let _ = self.events.send(UpstreamEvent::Failed(err)).await;
    }

    async fn close(&mut self, mut connection: LiveConnection) {
        if let Err(e) = connection.sink.close().await {
            warn!(session_id = %self.session_id, "Error closing remote connection: {}", e);
        }
        if self.state != BridgeState::Failed {
            self.state = BridgeState::Closed;
        }
        info!(session_id = %self.session_id, "Upstream bridge closed");
    }
}
