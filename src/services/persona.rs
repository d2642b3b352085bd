use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{GatewayError, GatewayResult};

/// Persona and context a conversation is seeded with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Persona {
    /// Instructions with the context appended.
    pub fn into_instructions(self) -> String {
        match self.context {
            Some(context) if !context.trim().is_empty() => {
                format!("{}\n\n{}", self.instructions, context)
            }
            _ => self.instructions,
        }
    }
}

/// Read-only source of session personas.
#[async_trait]
pub trait PersonaSource: Send + Sync {
    /// `Ok(None)` when the session has no persona.
    async fn fetch_persona(&self, session_id: &str) -> GatewayResult<Option<Persona>>;
}

/// Same instructions for every session.
#[derive(Debug, Clone, Default)]
pub struct StaticPersonaSource {
    instructions: Option<String>,
}

impl StaticPersonaSource {
    pub fn new(instructions: Option<String>) -> Self {
        Self { instructions }
    }
}

#[async_trait]
impl PersonaSource for StaticPersonaSource {
    async fn fetch_persona(&self, _session_id: &str) -> GatewayResult<Option<Persona>> {
        Ok(self.instructions.clone().map(|instructions| Persona {
            instructions,
            context: None,
        }))
    }
}

/// Fetches `GET {base}/sessions/{id}/persona`.
pub struct HttpPersonaSource {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpPersonaSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl PersonaSource for HttpPersonaSource {
    async fn fetch_persona(&self, session_id: &str) -> GatewayResult<Option<Persona>> {
        let url = format!("{}/sessions/{}/persona", self.base_url, session_id);
        debug!(url = %url, "fetching persona");

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| GatewayError::Collaborator(format!("GET {url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Collaborator(format!(
                "GET {url}: HTTP {status} - {error_text}"
            )));
        }

        let persona: Persona = response
            .json()
            .await
            .map_err(|e| GatewayError::Collaborator(format!("Failed to parse persona: {e}")))?;
        Ok(Some(persona))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticPersonaSource::new(Some("Be a tough interviewer.".into()));
        let persona = source.fetch_persona("any").await.unwrap().unwrap();
        assert_eq!(persona.instructions, "Be a tough interviewer.");

        let empty = StaticPersonaSource::default();
        assert!(empty.fetch_persona("any").await.unwrap().is_none());
    }

    #[test]
    fn test_context_is_appended() {
        let persona = Persona {
            instructions: "Play a landlord.".into(),
            context: Some("The tenant is late on rent.".into()),
        };
        assert_eq!(
            persona.into_instructions(),
            "Play a landlord.\n\nThe tenant is late on rent."
        );

        let persona = Persona {
            instructions: "Play a landlord.".into(),
            context: Some("  ".into()),
        };
        assert_eq!(persona.into_instructions(), "Play a landlord.");
    }
}
