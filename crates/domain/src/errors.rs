//! Error taxonomy and retry-policy types for worker invocations.
//!
//! [`WorkerError`] is the single error type an invocation can end with. Callers
//! branch on [`WorkerError::kind`] (for example, to show "try again later" only
//! for admission errors) and the retry driver branches on
//! [`WorkerError::retry_policy`].
//!
//! [`StoreError`] covers the persistence ports and never crosses the invocation
//! boundary.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{RatePeriod, ResponseError, Timestamp};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: connection failures, timeouts, HTTP 5xx and 429.
/// - `NonRetryable` errors: configuration, admission, input and response
///   errors. The remote service either was never called or already answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Error kinds
// ---------------------------------------------------------------------------

/// Coarse classification of a [`WorkerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Worker unknown, disabled, missing its URL, or misconfigured.
    Configuration,
    /// Rate limit exceeded or client IP blocked.
    Admission,
    /// Caller supplied a missing or malformed field.
    InvalidInput,
    /// Connection failure, timeout, or retryable HTTP status.
    Transport,
    /// The worker answered with something unusable.
    Response,
    /// The orchestrator itself failed to construct.
    Unavailable,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Admission => "admission",
            Self::InvalidInput => "invalid_input",
            Self::Transport => "transport",
            Self::Response => "response",
            Self::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Invocation errors
// ---------------------------------------------------------------------------

/// Every way a worker invocation can fail.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkerError {
    /// No configuration exists for the requested worker.
    #[error("Worker '{worker}' is not configured")]
    WorkerNotFound { worker: String },

    /// The worker exists but is switched off.
    #[error("Worker '{worker}' is disabled")]
    WorkerDisabled { worker: String },

    /// The worker is enabled but has no URL to call.
    #[error("Worker '{worker}' has no URL configured")]
    MissingUrl { worker: String },

    /// The worker's configuration is present but unusable.
    #[error("Worker '{worker}' is misconfigured: {message}")]
    InvalidConfig { worker: String, message: String },

    /// The worker's rate window is exhausted.
    #[error("Rate limit exceeded for '{worker}': {limit} per {period}, resets at {reset_at}")]
    RateLimited {
        worker: String,
        limit: u32,
        period: RatePeriod,
        remaining: u32,
        reset_at: Timestamp,
    },

    /// The client address is on the blacklist.
    #[error("Client {ip} is blocked: {reason}")]
    IpBlocked {
        ip: IpAddr,
        reason: String,
        /// `None` for a permanent block.
        expires_at: Option<Timestamp>,
    },

    /// A required input field is missing or malformed.
    #[error("Invalid input for '{field}': {message}")]
    InvalidInput { field: String, message: String },

    /// The request never produced an HTTP response.
    #[error("Transport failure calling '{worker}': {message}")]
    Transport {
        worker: String,
        message: String,
        timed_out: bool,
    },

    /// The worker answered with a non-success status.
    #[error("Worker '{worker}' returned HTTP {status}{}", suffix(.detail))]
    HttpStatus {
        worker: String,
        status: u16,
        detail: Option<String>,
    },

    /// The response body is not JSON.
    #[error("Worker '{worker}' returned a non-JSON body: {message}")]
    InvalidJson { worker: String, message: String },

    /// The response body carries an `error` field.
    #[error("Worker '{worker}' reported an error: {message}")]
    WorkerReported { worker: String, message: String },

    /// The response body is JSON but misses required fields.
    #[error("Worker '{worker}' returned an invalid response: {message}")]
    InvalidResponse { worker: String, message: String },

    /// Every permitted attempt failed with a retryable error.
    #[error("Worker '{worker}' failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        worker: String,
        attempts: u32,
        last: Box<WorkerError>,
    },

    /// The orchestrator is running in its degraded state.
    #[error("Orchestrator unavailable: {}", .reasons.join("; "))]
    Unavailable { reasons: Vec<String> },
}

impl WorkerError {
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Lifts a capability validation failure into the invocation error space.
    pub fn from_response(worker: &str, err: ResponseError) -> Self {
        match err {
            ResponseError::Reported(message) => Self::WorkerReported {
                worker: worker.to_string(),
                message,
            },
            ResponseError::Invalid(message) => Self::InvalidResponse {
                worker: worker.to_string(),
                message,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::WorkerNotFound { .. }
            | Self::WorkerDisabled { .. }
            | Self::MissingUrl { .. }
            | Self::InvalidConfig { .. } => ErrorKind::Configuration,
            Self::RateLimited { .. } | Self::IpBlocked { .. } => ErrorKind::Admission,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Transport { .. } | Self::RetriesExhausted { .. } => ErrorKind::Transport,
            Self::HttpStatus { status, .. } if is_retryable_status(*status) => ErrorKind::Transport,
            Self::HttpStatus { .. }
            | Self::InvalidJson { .. }
            | Self::WorkerReported { .. }
            | Self::InvalidResponse { .. } => ErrorKind::Response,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
        }
    }

    /// Whether the retry driver may re-dispatch after this error.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Transport { .. } => RetryPolicy::Retryable { after: None },
            Self::HttpStatus { status, .. } if is_retryable_status(*status) => {
                RetryPolicy::Retryable { after: None }
            }
            _ => RetryPolicy::NonRetryable,
        }
    }

    /// How long the caller should wait before trying again, when knowable.
    ///
    /// Admission errors derive the hint from the window reset or block expiry.
    pub fn retry_after(&self, now: Timestamp) -> Option<Duration> {
        match self {
            Self::RateLimited { reset_at, .. } => Some(reset_at.duration_since(now)),
            Self::IpBlocked {
                expires_at: Some(expires_at),
                ..
            } => Some(expires_at.duration_since(now)),
            _ => None,
        }
    }
}

/// HTTP 429 and every 5xx status are treated as transient.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

fn suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

/// Failures of the [`crate::ConfigStore`] and [`crate::StateStore`] ports.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("I/O error on '{path}': {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Failed to serialize: {message}")]
    Serialize { message: String },

    #[error("Invalid entry '{key}': {message}")]
    InvalidEntry { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> WorkerError {
        WorkerError::Transport {
            worker: "seo_analyzer".into(),
            message: "connection refused".into(),
            timed_out: false,
        }
    }

    #[test]
    fn transport_and_transient_statuses_are_retryable() {
        assert_eq!(transport().retry_policy(), RetryPolicy::Retryable { after: None });
        for status in [429, 500, 502, 503] {
            let err = WorkerError::HttpStatus {
                worker: "w".into(),
                status,
                detail: None,
            };
            assert!(matches!(err.retry_policy(), RetryPolicy::Retryable { .. }), "{status}");
            assert_eq!(err.kind(), ErrorKind::Transport);
        }
    }

    #[test]
    fn caller_and_config_errors_are_terminal() {
        let terminal = [
            WorkerError::WorkerDisabled { worker: "w".into() },
            WorkerError::MissingUrl { worker: "w".into() },
            WorkerError::invalid_input("topic", "required"),
            WorkerError::RateLimited {
                worker: "w".into(),
                limit: 1,
                period: RatePeriod::Hourly,
                remaining: 0,
                reset_at: Timestamp::from_unix_secs(0),
            },
            WorkerError::HttpStatus {
                worker: "w".into(),
                status: 404,
                detail: None,
            },
            WorkerError::WorkerReported {
                worker: "w".into(),
                message: "quota".into(),
            },
        ];
        for err in terminal {
            assert_eq!(err.retry_policy(), RetryPolicy::NonRetryable, "{err}");
        }
    }

    #[test]
    fn exhausted_retries_are_transport_kind() {
        let err = WorkerError::RetriesExhausted {
            worker: "w".into(),
            attempts: 4,
            last: Box::new(transport()),
        };
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.retry_policy(), RetryPolicy::NonRetryable);
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn rate_limited_hint_counts_down_to_reset() {
        let now = Timestamp::from_unix_secs(1_000);
        let err = WorkerError::RateLimited {
            worker: "w".into(),
            limit: 1,
            period: RatePeriod::Hourly,
            remaining: 0,
            reset_at: Timestamp::from_unix_secs(1_600),
        };
        assert_eq!(err.kind(), ErrorKind::Admission);
        assert_eq!(err.retry_after(now), Some(Duration::from_secs(600)));
    }

    #[test]
    fn response_errors_map_by_origin() {
        let reported = WorkerError::from_response("w", ResponseError::Reported("boom".into()));
        assert!(matches!(reported, WorkerError::WorkerReported { .. }));
        let invalid = WorkerError::from_response("w", ResponseError::Invalid("missing".into()));
        assert_eq!(invalid.kind(), ErrorKind::Response);
    }
}
