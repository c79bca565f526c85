//! The one generic worker client.
//!
//! A [`WorkerClient`] pairs a [`CapabilityStrategy`] with the transport. It
//! performs a single dispatch: POST the prepared body, classify the HTTP
//! outcome, decode JSON, reject bodies carrying `error`, then let the strategy
//! validate the rest. Retrying is the caller's concern.

use domain::{
    reject_reported_error, CapabilityStrategy, HttpMethod, WorkerConfig, WorkerError, WorkerRequest,
    WorkerTransport,
};
use serde_json::Value;
use tracing::debug;

/// Names the target worker on every dispatched request.
pub const WORKER_NAME_HEADER: &str = "x-worker-name";

/// Dispatches one capability's requests to a worker.
pub struct WorkerClient<'a, S> {
    strategy: &'a S,
    transport: &'a dyn WorkerTransport,
    user_agent: &'a str,
}

impl<'a, S: CapabilityStrategy> WorkerClient<'a, S> {
    pub fn new(strategy: &'a S, transport: &'a dyn WorkerTransport, user_agent: &'a str) -> Self {
        Self {
            strategy,
            transport,
            user_agent,
        }
    }

    fn request(&self, config: &WorkerConfig, body: &Value) -> WorkerRequest {
        WorkerRequest {
            method: HttpMethod::Post,
            url: config.endpoint_for(self.strategy.capability()),
            headers: vec![
                ("content-type".to_string(), "application/json".to_string()),
                ("accept".to_string(), "application/json".to_string()),
                ("user-agent".to_string(), self.user_agent.to_string()),
                (WORKER_NAME_HEADER.to_string(), config.name.to_string()),
            ],
            body: Some(body.clone()),
            timeout: config.timeout(),
        }
    }

    /// Sends `body` once and validates the reply.
    pub async fn call(&self, config: &WorkerConfig, body: &Value, attempt: u32) -> Result<S::Output, WorkerError> {
        let worker = config.name.as_str();
        let request = self.request(config, body);
        debug!(worker, attempt, url = %request.url, "sending worker request");

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| WorkerError::Transport {
                worker: worker.to_string(),
                message: e.message,
                timed_out: e.timed_out,
            })?;

        if !response.is_success() {
            return Err(WorkerError::HttpStatus {
                worker: worker.to_string(),
                status: response.status,
                detail: error_detail(&response.body),
            });
        }

        let decoded: Value = serde_json::from_str(&response.body).map_err(|e| WorkerError::InvalidJson {
            worker: worker.to_string(),
            message: e.to_string(),
        })?;

        reject_reported_error(&decoded)
            .and_then(|()| self.strategy.validate(&decoded))
            .map_err(|e| WorkerError::from_response(worker, e))
    }
}

/// Pulls a human-readable message out of an error body, if there is one.
fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let object = value.as_object()?;
    let message = match object.get("error").or_else(|| object.get("message"))? {
        Value::String(s) => s.clone(),
        Value::Object(o) => o.get("message")?.as_str()?.to_string(),
        _ => return None,
    };
    let message = domain::sanitize::text(&message);
    (!message.is_empty()).then_some(message)
}
