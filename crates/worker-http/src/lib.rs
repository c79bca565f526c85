//! FaqWorks worker transport adapter.
//!
//! Implements [`domain::WorkerTransport`] over a shared [`reqwest::Client`].
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Only HTTP mechanics live here: method, headers, JSON
//! body, per-request deadline. Status codes are passed through untouched;
//! deciding what a 429 or a 503 means is the orchestrator's business.
//!
//! A request that produces no response at all (connection refused, DNS
//! failure, deadline elapsed) becomes a [`TransportError`], with `timed_out`
//! set when the deadline was the cause.

use async_trait::async_trait;
use domain::{HttpMethod, TransportError, WorkerRequest, WorkerResponse, WorkerTransport};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TransportBuildError {
    #[error("failed to build the HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportBuildError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }

    /// Wraps an already configured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn transport_error(err: &reqwest::Error) -> TransportError {
    TransportError {
        message: err.to_string(),
        timed_out: err.is_timeout(),
    }
}

#[async_trait]
impl WorkerTransport for ReqwestTransport {
    async fn send(&self, request: WorkerRequest) -> Result<WorkerResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        }
        .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(url = %request.url, timed_out = e.is_timeout(), error = %e, "worker request failed");
            transport_error(&e)
        })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| transport_error(&e))?;
        debug!(url = %request.url, status, bytes = body.len(), "worker responded");
        Ok(WorkerResponse { status, body })
    }
}
