//! Shared application state handed to every route.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::config::ServerConfig;
use crate::core::peer::PeerManager;
use crate::core::realtime::{ProviderConnector, SessionConnector};
use crate::errors::{GatewayError, GatewayResult};
use crate::services::{
    PersonaSource, SessionRecorder, persona_source_from_config, recorder_from_config,
};

pub struct AppState {
    pub config: ServerConfig,
    pub peers: PeerManager,
    /// Opens one speech-model session per conversation
    pub connector: Arc<dyn SessionConnector>,
    pub personas: Arc<dyn PersonaSource>,
    pub recorder: Arc<dyn SessionRecorder>,
    started_at: Instant,
}

impl AppState {
    /// Build the state from configuration. Fails when the default provider
    /// has no API key.
    pub fn new(config: ServerConfig) -> GatewayResult<Arc<Self>> {
        let realtime = config
            .realtime_config(config.default_provider)
            .map_err(GatewayError::Config)?;
        let connector: Arc<dyn SessionConnector> =
            Arc::new(ProviderConnector::new(config.default_provider, realtime));
        let personas = persona_source_from_config(&config);
        let recorder = recorder_from_config(&config);

        info!(
            provider = %config.default_provider,
            persona_service = config.persona_service_url.as_deref().unwrap_or("static"),
            record_service = config.session_record_url.as_deref().unwrap_or("log"),
            "application state ready"
        );

        Ok(Self::with_parts(config, connector, personas, recorder))
    }

    /// Build the state from explicit collaborators.
    pub fn with_parts(
        config: ServerConfig,
        connector: Arc<dyn SessionConnector>,
        personas: Arc<dyn PersonaSource>,
        recorder: Arc<dyn SessionRecorder>,
    ) -> Arc<Self> {
        let peers = PeerManager::new(config.peer_config());
        Arc::new(Self {
            config,
            peers,
            connector,
            personas,
            recorder,
            started_at: Instant::now(),
        })
    }

    /// True when `max_peers` peers are live.
    pub fn peer_limit_reached(&self) -> bool {
        self.config
            .max_peers
            .is_some_and(|max| self.peers.len() >= max)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
