use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use crate::config::ServerConfig;
use crate::core::audio::AudioConverter;
use crate::core::live::gemini::{
    GeminiLiveConfig, GeminiLiveConnector, GeminiTokenConfig, GeminiTokenIssuer,
};
use crate::core::live::{AuthError, CredentialIssuer, LiveConnector};

/// Why a new WebSocket connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// Process-wide state shared by every relay session.
///
/// Sessions share nothing mutable except the connection gauges kept here.
pub struct AppState {
    pub config: ServerConfig,
    pub issuer: Arc<dyn CredentialIssuer>,
    pub connector: Arc<dyn LiveConnector>,
    pub converter: AudioConverter,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

impl AppState {
    /// Build state backed by Gemini Live.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, AuthError> {
        let issuer = GeminiTokenIssuer::new(
            config.google_api_key.clone(),
            GeminiTokenConfig::from_server_config(&config),
        )?;
        let connector = GeminiLiveConnector::new(GeminiLiveConfig::from_server_config(&config));

        Ok(Self::with_backends(
            config,
            Arc::new(issuer),
            Arc::new(connector),
        ))
    }

    /// Build state around arbitrary backends.
    pub fn with_backends(
        config: ServerConfig,
        issuer: Arc<dyn CredentialIssuer>,
        connector: Arc<dyn LiveConnector>,
    ) -> Arc<Self> {
        let converter =
            AudioConverter::new().with_max_duration(Duration::from_secs(config.max_turn_seconds));
        Arc::new(Self {
            config,
            issuer,
            connector,
            converter,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Reserve a connection slot for `ip`.
    ///
    /// Every successful call must be paired with one [`Self::release_connection`].
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        match self.config.max_websocket_connections {
            Some(max) => {
                self.ws_connections
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                        (current < max).then_some(current + 1)
                    })
                    .map_err(|_| ConnectionLimitError::GlobalLimitReached)?;
            }
            None => {
                self.ws_connections.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut count = self.ip_connections.entry(ip).or_insert(0);
        if *count >= self.config.max_connections_per_ip {
            drop(count);
            self.ws_connections.fetch_sub(1, Ordering::SeqCst);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *count += 1;
        Ok(())
    }

    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            });

        if let Some(mut count) = self.ip_connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
        }
        self.ip_connections.remove_if(&ip, |_, count| *count == 0);
    }

    /// Number of open relay sessions.
    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::SeqCst)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }
}
