use serde::Deserialize;
use std::path::PathBuf;

use crate::core::conversation::ConversationConfig;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   max_peers: 200
///
/// realtime:
///   provider: "gemini"
///   model: "gemini-2.0-flash-live-001"
///   voice: "Puck"
///   instructions: "You are a patient interviewer."
///
/// providers:
///   openai_api_key: "sk-..."
///   gemini_api_key: "AIza..."
///
/// webrtc:
///   ice_servers:
///     - "stun:stun.l.google.com:19302"
///   opus_bitrate: 32000
///
/// services:
///   persona_url: "https://rehearsal.example.com/api"
///   record_url: "https://rehearsal.example.com/api"
///
/// conversation:
///   silence_timeout_ms: 800
///   turn_debounce_ms: 5000
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub providers: Option<ProvidersYaml>,
    pub webrtc: Option<WebRtcYaml>,
    pub services: Option<ServicesYaml>,
    pub security: Option<SecurityYaml>,
    pub conversation: Option<ConversationConfig>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
    /// Maximum live peers; further signaling upgrades get 503
    pub max_peers: Option<usize>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Speech-model session defaults from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    /// "openai" or "gemini"
    pub provider: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    /// Instructions used when no persona is found for a session
    pub instructions: Option<String>,
}

/// Provider API keys from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersYaml {
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

/// Media transport settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WebRtcYaml {
    pub ice_servers: Option<Vec<String>>,
    pub opus_bitrate: Option<u32>,
}

/// Collaborator endpoints from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServicesYaml {
    /// Base URL serving `GET /sessions/{id}/persona`
    pub persona_url: Option<String>,
    /// Base URL accepting `POST /sessions/{id}/records`
    pub record_url: Option<String>,
}

/// Security configuration from YAML
///
/// # Example YAML structure
/// ```yaml
/// security:
///   cors_allowed_origins: "https://example.com,https://app.example.com"
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
    /// Maximum requests per second per IP address
    pub rate_limit_requests_per_second: Option<u32>,
    /// Maximum burst size for rate limiting
    pub rate_limit_burst_size: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
