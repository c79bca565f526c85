//! Port traits implemented by infrastructure crates.
//!
//! The orchestrator only ever talks to the outside world through these traits:
//! configuration through [`ConfigStore`], persisted state through
//! [`StateStore`], the external workers through [`WorkerTransport`], and time
//! through [`Clock`]. Tests substitute scripted fakes for each.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{PersistedState, StoreError, Timestamp, WorkerConfig, WorkerName};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Persistent home of every worker's configuration.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Returns `None` when the store holds nothing for `name`.
    async fn get_worker_config(&self, name: &WorkerName) -> Result<Option<WorkerConfig>, StoreError>;

    /// Creates or replaces the entry for `name`.
    async fn set_worker_config(&self, name: &WorkerName, config: &WorkerConfig) -> Result<(), StoreError>;

    async fn get_all(&self) -> Result<BTreeMap<WorkerName, WorkerConfig>, StoreError>;
}

// ---------------------------------------------------------------------------
// State persistence
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns `None` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<PersistedState>, StoreError>;

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// HTTP egress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One outbound call to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Hard deadline for the whole exchange.
    pub timeout: Duration,
}

/// A raw HTTP response. The body is undecoded so non-JSON replies can be
/// reported as such.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerResponse {
    pub status: u16,
    pub body: String,
}

impl WorkerResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request produced no HTTP response at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub timed_out: bool,
}

#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn send(&self, request: WorkerRequest) -> Result<WorkerResponse, TransportError>;
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Source of wall-clock time for windows, expiries and analytics buckets.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to. Used to drive windows and expiries
/// deterministically.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now = now.plus(by);
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}
