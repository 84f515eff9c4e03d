//! HTTP `AuditSink` — `POST {INSIGHT_ANALYTICS_ENDPOINT}/api/audit/batch`
//! (§4.8). Retry/backoff and the drop-on-final-failure rule live in
//! `AuditBuffer::flush_once`; this transport only needs to report success or
//! a transient failure for one batch.

use async_trait::async_trait;
use oracle_core::error::UpstreamError;
use oracle_core::traits::AuditSink;
use oracle_core::types::AuditEntry;
use std::time::Duration;

const AUDIT_FETCH_TIMEOUT: Duration = Duration::from_millis(5_000);

pub struct HttpAuditSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAuditSink {
    pub fn new(endpoint: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(AUDIT_FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, endpoint: endpoint.trim_end_matches('/').to_string() }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let endpoint = std::env::var("INSIGHT_ANALYTICS_ENDPOINT")
            .map_err(|_| anyhow::anyhow!("INSIGHT_ANALYTICS_ENDPOINT is not set"))?;
        Ok(Self::new(endpoint))
    }
}

#[async_trait]
impl AuditSink for HttpAuditSink {
    async fn persist_batch(&self, entries: &[AuditEntry]) -> Result<(), UpstreamError> {
        let url = format!("{}/api/audit/batch", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(entries)
            .send()
            .await
            .map_err(|e| UpstreamError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            return Err(UpstreamError::Transient(format!("audit endpoint returned {}", response.status())));
        }
        Ok(())
    }
}
