// HTTP client for a backend service that exposes the chat contract as JSON/SSE

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Response, Url};
use serde::Deserialize;
use std::time::Duration;

use crate::error::{BackendError, Result};
use crate::streaming::parse_turn_stream;
use crate::traits::{ChatBackend, TurnStream};
use crate::types::{IngestSummary, ThreadId, ThreadState};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ThreadList {
    #[serde(default)]
    threads: Vec<ThreadId>,
}

/// Backend reached over HTTP
pub struct HttpBackend {
    http_client: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// `timeout` bounds the unary calls; streamed turns run until the backend finishes
    pub fn with_timeout(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())
            .map_err(|e| BackendError::InvalidUrl(format!("{}: {}", base_url.as_ref(), e)))?;

        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(base_url.to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url,
            request_timeout: timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Base URL with extra path segments, each percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status = %status, "Backend request failed");
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn get_state(&self, thread_id: &str) -> Result<ThreadState> {
        let url = self.endpoint(&["threads", thread_id, "state"])?;
        tracing::debug!(thread_id, "Loading thread state");

        let response = self
            .http_client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let body = Self::check_status(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn stream(&self, input: &str, thread_id: &str) -> Result<TurnStream> {
        let url = self.endpoint(&["threads", thread_id, "stream"])?;
        tracing::debug!(thread_id, "Starting streamed turn");

        let response = self
            .http_client
            .post(url)
            .header(ACCEPT, "text/event-stream")
            .json(&serde_json::json!({ "message": input }))
            .send()
            .await?;

        let response = Self::check_status(response).await?;
        Ok(parse_turn_stream(response.bytes_stream()))
    }

    async fn ingest_pdf(
        &self,
        bytes: Vec<u8>,
        thread_id: &str,
        filename: &str,
    ) -> Result<IngestSummary> {
        let mut url = self.endpoint(&["threads", thread_id, "documents"])?;
        url.query_pairs_mut().append_pair("filename", filename);
        tracing::info!(thread_id, filename, size = bytes.len(), "Ingesting PDF");

        let response = self
            .http_client
            .post(url)
            .header(CONTENT_TYPE, "application/pdf")
            .body(bytes)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let body = Self::check_status(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn retrieve_all_threads(&self) -> Result<Vec<ThreadId>> {
        let url = self.endpoint(&["threads"])?;

        let response = self
            .http_client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let body = Self::check_status(response).await?.bytes().await?;
        let list: ThreadList = serde_json::from_slice(&body)?;
        Ok(list.threads)
    }
}
