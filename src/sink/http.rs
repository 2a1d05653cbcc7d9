use std::time::Duration;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::monitor::Record;

use super::PersistenceSink;

/// POSTs each record's parameter map as JSON to a fixed endpoint.
///
/// Every call is bounded by the client timeout so a slow endpoint
/// cannot hold the writer for long.
pub struct HttpPersistenceSink {
    client: reqwest::Client,
    url: String,
}

impl HttpPersistenceSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PersistenceSink for HttpPersistenceSink {
    async fn persist(&self, record: &Record) -> Result<(), SinkError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&record.parameters)
            .send()
            .await?;

        let status = resp.status();
        // Drain body for connection reuse.
        let _ = resp.bytes().await;

        if !status.is_success() {
            return Err(SinkError::Status(status));
        }
        tracing::debug!(url = %self.url, "statistics persisted");
        Ok(())
    }
}
