//! Configuration module for the rehearsal gateway
//!
//! Configuration comes from .env files, YAML files and environment variables.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use rehearsal_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

mod yaml;

pub use yaml::YamlConfig;

use crate::core::conversation::ConversationConfig;
use crate::core::peer::PeerConfig;
use crate::core::realtime::{RealtimeConfig, RealtimeProvider};

const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";
const DEFAULT_OPUS_BITRATE: u32 = 32000;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Contains all configuration needed to run the gateway:
/// - Server settings (host, port, TLS, peer limit)
/// - Speech-model provider keys and session defaults
/// - WebRTC transport settings
/// - Collaborator endpoints
/// - Conversation loop timing
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Provider API keys
    /// OpenAI API key for the Realtime API
    pub openai_api_key: Option<String>,
    /// Google API key for Gemini Live
    pub gemini_api_key: Option<String>,

    // Speech-model session defaults
    pub default_provider: RealtimeProvider,
    pub realtime_model: Option<String>,
    pub realtime_voice: Option<String>,
    /// Instructions used when no persona is found for a session
    pub default_instructions: Option<String>,

    // WebRTC
    /// STUN/TURN URLs offered to the peer connection
    pub ice_servers: Vec<String>,
    /// Opus `maxaveragebitrate` and encoder bitrate
    pub opus_bitrate: u32,

    // Collaborators
    /// Base URL of the persona service. None uses `default_instructions`.
    pub persona_service_url: Option<String>,
    /// Base URL of the session record service. None logs records.
    pub session_record_url: Option<String>,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,
    /// Maximum live peers
    /// Default: None (unlimited)
    pub max_peers: Option<usize>,

    pub conversation: ConversationConfig,
}

/// Zeroize secrets when the config is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.gemini_api_key {
            key.zeroize();
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid {name} value '{raw}': {e}").into()),
        None => Ok(None),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl ServerConfig {
    /// Load configuration from environment variables, with defaults for
    /// everything unset.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let tls = match (env_string("TLS_CERT_PATH"), env_string("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".into()),
        };

        let default_provider = match env_string("REALTIME_PROVIDER") {
            Some(raw) => raw.parse::<RealtimeProvider>().map_err(|e| e.to_string())?,
            None => RealtimeProvider::OpenAI,
        };

        let mut conversation = ConversationConfig::default();
        if let Some(v) = env_parse("SPEAKING_TIMEOUT_MS")? {
            conversation.speaking_timeout_ms = v;
        }
        if let Some(v) = env_parse("TURN_DEBOUNCE_MS")? {
            conversation.turn_debounce_ms = v;
        }
        if let Some(v) = env_parse("SILENCE_TIMEOUT_MS")? {
            conversation.silence_timeout_ms = v;
        }
        if let Some(v) = env_parse("ENERGY_THRESHOLD")? {
            conversation.energy_threshold = v;
        }

        let config = ServerConfig {
            host: env_string("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_parse("PORT")?.unwrap_or(3001),
            tls,
            openai_api_key: env_string("OPENAI_API_KEY"),
            gemini_api_key: env_string("GEMINI_API_KEY"),
            default_provider,
            realtime_model: env_string("REALTIME_MODEL"),
            realtime_voice: env_string("REALTIME_VOICE"),
            default_instructions: env_string("DEFAULT_INSTRUCTIONS"),
            ice_servers: env_string("ICE_SERVERS")
                .map(|raw| split_list(&raw))
                .unwrap_or_else(|| vec![DEFAULT_ICE_SERVER.to_string()]),
            opus_bitrate: env_parse("OPUS_BITRATE")?.unwrap_or(DEFAULT_OPUS_BITRATE),
            persona_service_url: env_string("PERSONA_SERVICE_URL"),
            session_record_url: env_string("SESSION_RECORD_URL"),
            cors_allowed_origins: env_string("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: env_parse("RATE_LIMIT_REQUESTS_PER_SECOND")?
                .unwrap_or(60),
            rate_limit_burst_size: env_parse("RATE_LIMIT_BURST_SIZE")?.unwrap_or(10),
            max_peers: env_parse("MAX_PEERS")?,
            conversation,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file on top of the environment
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// The merged configuration is validated before it is returned.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // .env is loaded in main.rs at startup
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = Self::from_env()?;
        config.apply_yaml(yaml_config)?;
        config.validate()?;

        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(server) = yaml.server {
            if let Some(host) = server.host {
                self.host = host;
            }
            if let Some(port) = server.port {
                self.port = port;
            }
            if let Some(max_peers) = server.max_peers {
                self.max_peers = Some(max_peers);
            }
            if let Some(tls) = server.tls {
                if tls.enabled == Some(false) {
                    self.tls = None;
                } else {
                    match (tls.cert_path, tls.key_path) {
                        (Some(cert), Some(key)) => {
                            self.tls = Some(TlsConfig {
                                cert_path: PathBuf::from(cert),
                                key_path: PathBuf::from(key),
                            })
                        }
                        (None, None) => {}
                        _ => return Err("server.tls needs both cert_path and key_path".into()),
                    }
                }
            }
        }

        if let Some(realtime) = yaml.realtime {
            if let Some(provider) = realtime.provider {
                self.default_provider = provider
                    .parse::<RealtimeProvider>()
                    .map_err(|e| e.to_string())?;
            }
            if realtime.model.is_some() {
                self.realtime_model = realtime.model;
            }
            if realtime.voice.is_some() {
                self.realtime_voice = realtime.voice;
            }
            if realtime.instructions.is_some() {
                self.default_instructions = realtime.instructions;
            }
        }

        if let Some(providers) = yaml.providers {
            if providers.openai_api_key.is_some() {
                self.openai_api_key = providers.openai_api_key;
            }
            if providers.gemini_api_key.is_some() {
                self.gemini_api_key = providers.gemini_api_key;
            }
        }

        if let Some(webrtc) = yaml.webrtc {
            if let Some(servers) = webrtc.ice_servers {
                self.ice_servers = servers;
            }
            if let Some(bitrate) = webrtc.opus_bitrate {
                self.opus_bitrate = bitrate;
            }
        }

        if let Some(services) = yaml.services {
            if services.persona_url.is_some() {
                self.persona_service_url = services.persona_url;
            }
            if services.record_url.is_some() {
                self.session_record_url = services.record_url;
            }
        }

        if let Some(security) = yaml.security {
            if security.cors_allowed_origins.is_some() {
                self.cors_allowed_origins = security.cors_allowed_origins;
            }
            if let Some(rps) = security.rate_limit_requests_per_second {
                self.rate_limit_requests_per_second = rps;
            }
            if let Some(burst) = security.rate_limit_burst_size {
                self.rate_limit_burst_size = burst;
            }
        }

        if let Some(conversation) = yaml.conversation {
            self.conversation = conversation;
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if !(6000..=510_000).contains(&self.opus_bitrate) {
            return Err(format!(
                "opus_bitrate must be between 6000 and 510000, got {}",
                self.opus_bitrate
            )
            .into());
        }
        if self.ice_servers.is_empty() {
            return Err("at least one ICE server is required".into());
        }
        if self.max_peers == Some(0) {
            return Err("max_peers must be greater than 0".into());
        }
        self.conversation
            .validate()
            .map_err(|e| format!("Invalid conversation config: {e}"))?;
        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Get API key for a specific provider
    pub fn get_api_key(&self, provider: &str) -> Result<String, String> {
        match provider.to_lowercase().as_str() {
            "openai" => self.openai_api_key.as_ref().cloned().ok_or_else(|| {
                "OpenAI API key not configured in server environment".to_string()
            }),
            "gemini" | "google" => self.gemini_api_key.as_ref().cloned().ok_or_else(|| {
                "Gemini API key not configured in server environment".to_string()
            }),
            _ => Err(format!("Unsupported provider: {provider}")),
        }
    }

    /// Session settings for `provider`, without persona instructions.
    pub fn realtime_config(&self, provider: RealtimeProvider) -> Result<RealtimeConfig, String> {
        Ok(RealtimeConfig {
            api_key: self.get_api_key(&provider.to_string())?,
            model: self.realtime_model.clone().unwrap_or_default(),
            voice: self.realtime_voice.clone(),
            instructions: self.default_instructions.clone(),
            connect_timeout_ms: Some(self.conversation.close_timeout_ms.max(10_000)),
            ..Default::default()
        })
    }

    /// Transport settings for new peers.
    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            ice_servers: self.ice_servers.clone(),
            opus_bitrate: self.opus_bitrate,
            gathering_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }
}
