//! Collaborators outside the audio core.
//!
//! - [`PersonaSource`]: read-only persona lookup per session
//! - [`SessionRecorder`]: receives one [`SessionRecord`] per finished loop

mod persona;
mod records;

use std::sync::Arc;

pub use persona::{HttpPersonaSource, Persona, PersonaSource, StaticPersonaSource};
pub use records::{HttpSessionRecorder, LogSessionRecorder, SessionRecord, SessionRecorder};

use crate::config::ServerConfig;

/// Persona source for `config`: HTTP when a service URL is set, static
/// default instructions otherwise.
pub fn persona_source_from_config(config: &ServerConfig) -> Arc<dyn PersonaSource> {
    match &config.persona_service_url {
        Some(url) => Arc::new(HttpPersonaSource::new(url.clone())),
        None => Arc::new(StaticPersonaSource::new(config.default_instructions.clone())),
    }
}

/// Recorder for `config`: HTTP when a record URL is set, log otherwise.
pub fn recorder_from_config(config: &ServerConfig) -> Arc<dyn SessionRecorder> {
    match &config.session_record_url {
        Some(url) => Arc::new(HttpSessionRecorder::new(url.clone())),
        None => Arc::new(LogSessionRecorder),
    }
}
