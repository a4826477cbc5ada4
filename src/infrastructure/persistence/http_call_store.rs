//! Call-record store reached over HTTP

use crate::domain::call::record::CallRecord;
use crate::domain::call::repository::CallStore;
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use tracing::{debug, error};

pub struct HttpCallStore {
    http: reqwest::Client,
    url: String,
}

impl HttpCallStore {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl CallStore for HttpCallStore {
    async fn submit(&self, record: &CallRecord) -> Result<()> {
        let response = self
            .http
            .post(&self.url)
            .json(&record.to_payload())
            .send()
            .await
            .map_err(|e| {
                error!("Failed to submit call record: {}", e);
                CallError::Persistence(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Persistence(format!(
                "Store returned {}: {}",
                status, body
            )));
        }

        debug!(user_id = %record.user_id, "Call record stored");
        Ok(())
    }
}
