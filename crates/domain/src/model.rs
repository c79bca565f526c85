//! Records held by the stateful components and their persisted form.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::{ClientHash, ErrorKind, Timestamp};

// ---------------------------------------------------------------------------
// Rate windows
// ---------------------------------------------------------------------------

/// Snapshot of one rate-limit counter.
///
/// `key` is the worker name, optionally followed by `:` and a [`ClientHash`]
/// for per-client windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    pub key: String,
    pub count: u32,
    pub window_start: Timestamp,
    pub window_len_secs: u64,
}

// ---------------------------------------------------------------------------
// Security lists
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Whitelist,
    Blacklist,
}

/// An address on the allow or deny list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEntry {
    pub ip: IpAddr,
    pub kind: EntryKind,
    pub reason: String,
    /// `"admin"`, `"system"`, or whichever operator made the change.
    pub added_by: String,
    pub added_at: Timestamp,
    /// `None` means the entry never expires.
    pub expires_at: Option<Timestamp>,
}

impl SecurityEntry {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Grades how far past its limit a client went.
    pub fn from_ratio(requests_count: u32, limit: u32) -> Self {
        if limit == 0 {
            return Self::Low;
        }
        let ratio = f64::from(requests_count) / f64::from(limit);
        if ratio >= 3.0 {
            Self::Critical
        } else if ratio >= 2.0 {
            Self::High
        } else if ratio >= 1.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Grades a client by how many violations it produced in a period.
    pub fn from_violation_count(count: usize) -> Self {
        match count {
            n if n >= 5 => Self::High,
            n if n >= 3 => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// A denied admission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub worker: String,
    pub ip: IpAddr,
    pub timestamp: Timestamp,
    /// Requests attempted in the window, including the denied one.
    pub requests_count: u32,
    pub limit: u32,
    pub severity: Severity,
}

// ---------------------------------------------------------------------------
// Usage events
// ---------------------------------------------------------------------------

/// One terminal outcome of an invocation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub worker: String,
    pub client: ClientHash,
    pub success: bool,
    pub latency_ms: u64,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

// ---------------------------------------------------------------------------
// Persisted state
// ---------------------------------------------------------------------------

/// Mutable orchestrator state carried between process runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    #[serde(default)]
    pub rate_windows: Vec<RateWindow>,
    #[serde(default)]
    pub security_entries: Vec<SecurityEntry>,
    #[serde(default)]
    pub violations: Vec<Violation>,
    #[serde(default)]
    pub usage_events: Vec<UsageEvent>,
}

impl PersistedState {
    pub const CURRENT_VERSION: u32 = 1;
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            rate_windows: Vec::new(),
            security_entries: Vec::new(),
            violations: Vec::new(),
            usage_events: Vec::new(),
        }
    }
}
