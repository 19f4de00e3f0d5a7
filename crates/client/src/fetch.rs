// crates/client/src/fetch.rs
//! Trace snapshot fetching.

use async_trait::async_trait;
use tracing::debug;

use runview_core::{decode_snapshot, TraceSnapshot};

use crate::error::FetchError;

/// Read access to the backend's trace store.
#[async_trait]
pub trait TraceFetcher: Send + Sync {
    async fn fetch_trace(&self, trace_id: &str) -> Result<TraceSnapshot, FetchError>;
}

/// HTTP fetcher against the orchestration backend's REST API.
pub struct HttpTraceFetcher {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTraceFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TraceFetcher for HttpTraceFetcher {
    async fn fetch_trace(&self, trace_id: &str) -> Result<TraceSnapshot, FetchError> {
        let url = format!("{}/api/traces/{}", self.base_url, trace_id);
        debug!(%url, "fetching trace snapshot");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                trace_id: trace_id.to_string(),
                source: e,
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                trace_id: trace_id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                trace_id: trace_id.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| FetchError::Request {
            trace_id: trace_id.to_string(),
            source: e,
        })?;
        Ok(decode_snapshot(trace_id, &body)?)
    }
}
