use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::core::conversation::{LoopOutcome, TranscriptLine};
use crate::core::realtime::RealtimeProvider;
use crate::errors::{GatewayError, GatewayResult};

/// What is kept of one finished conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub peer_id: String,
    pub session_id: Option<String>,
    pub provider: Option<RealtimeProvider>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub ended_at: OffsetDateTime,
    pub end_reason: String,
    pub transcript: Vec<TranscriptLine>,
}

impl SessionRecord {
    pub fn from_outcome(peer_id: impl Into<String>, session_id: Option<String>, outcome: LoopOutcome) -> Self {
        Self {
            peer_id: peer_id.into(),
            session_id,
            provider: outcome.provider,
            started_at: outcome.started_at,
            ended_at: outcome.ended_at,
            end_reason: outcome.reason.to_string(),
            transcript: outcome.transcript,
        }
    }
}

/// Sink for finished conversations. Called once per loop.
#[async_trait]
pub trait SessionRecorder: Send + Sync {
    async fn append(&self, record: SessionRecord) -> GatewayResult<()>;
}

/// Writes records to the log.
#[derive(Debug, Clone, Default)]
pub struct LogSessionRecorder;

#[async_trait]
impl SessionRecorder for LogSessionRecorder {
    async fn append(&self, record: SessionRecord) -> GatewayResult<()> {
        let duration = record.ended_at - record.started_at;
        info!(
            peer_id = %record.peer_id,
            session_id = record.session_id.as_deref().unwrap_or("-"),
            provider = ?record.provider,
            reason = %record.end_reason,
            lines = record.transcript.len(),
            duration_ms = duration.whole_milliseconds() as i64,
            "conversation recorded"
        );
        for line in &record.transcript {
            debug!(peer_id = %record.peer_id, role = ?line.role, "{}", line.text);
        }
        Ok(())
    }
}

/// Posts records to `POST {base}/sessions/{id}/records`.
///
/// Records without a session id go to the peer id.
pub struct HttpSessionRecorder {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpSessionRecorder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl SessionRecorder for HttpSessionRecorder {
    async fn append(&self, record: SessionRecord) -> GatewayResult<()> {
        let id = record.session_id.as_deref().unwrap_or(&record.peer_id);
        let url = format!("{}/sessions/{}/records", self.base_url, id);
        debug!(url = %url, lines = record.transcript.len(), "posting session record");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&record)
            .send()
            .await
            .map_err(|e| GatewayError::Collaborator(format!("POST {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Collaborator(format!(
                "POST {url}: HTTP {status} - {error_text}"
            )));
        }
        Ok(())
    }
}
