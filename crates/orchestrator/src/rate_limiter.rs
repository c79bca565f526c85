//! Fixed-window rate limiting per worker, optionally per client.
//!
//! Each (worker, scope) pair owns one counter in a [`DashMap`]. Every decision
//! is taken while holding that entry's shard lock, so admission and the
//! reservation it hands out happen as one step: two concurrent callers can
//! never both take the last slot of a window.
//!
//! Admission reserves capacity as a [`Permit`]. The caller later either
//! [`Permit::commit`]s it (the call succeeded and counts against the quota) or
//! lets it go, through [`Permit::release`] or by dropping it, which returns
//! the slot. A caller abandoned mid-call therefore never strands a slot.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use domain::{ClientHash, Clock, RateRule, RateWindow, Timestamp, WorkerName};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Whom a counter is tracked against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateScope {
    /// One counter shared by all clients of the worker.
    Global,
    /// One counter per hashed client address.
    Client(ClientHash),
}

impl RateScope {
    /// Renders the map key for `worker` under this scope.
    pub fn key(&self, worker: &WorkerName) -> String {
        match self {
            Self::Global => worker.to_string(),
            Self::Client(hash) => format!("{worker}:{hash}"),
        }
    }

    /// Splits a rendered key back into worker and scope.
    ///
    /// Returns `None` for anything [`RateScope::key`] could not have produced.
    pub fn parse_key(key: &str) -> Option<(WorkerName, RateScope)> {
        match key.split_once(':') {
            None => {
                let worker = WorkerName::new(key)?;
                (worker.as_str() == key).then_some((worker, Self::Global))
            }
            Some((worker, hash)) => {
                let name = WorkerName::new(worker)?;
                if name.as_str() != worker {
                    return None;
                }
                Some((name, Self::Client(ClientHash::parse(hash)?)))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

type Windows = DashMap<String, WindowState>;

/// A reserved slot. Committing counts it; dropping it uncommitted returns it.
#[must_use = "a permit holds a reserved slot until committed or released"]
pub struct Permit {
    windows: Arc<Windows>,
    key: String,
    window_start: Timestamp,
    settled: bool,
}

impl Permit {
    /// Counts the reserved call against its window.
    ///
    /// A permit from a window that has since rolled over is discarded.
    pub fn commit(mut self) {
        self.settle(true);
    }

    /// Returns the reserved slot without counting it.
    pub fn release(mut self) {
        self.settle(false);
    }

    fn settle(&mut self, counted: bool) {
        if std::mem::replace(&mut self.settled, true) {
            return;
        }
        if let Some(mut state) = self.windows.get_mut(&self.key) {
            if state.window_start == self.window_start {
                state.reserved = state.reserved.saturating_sub(1);
                if counted {
                    state.count = state.count.saturating_add(1);
                }
            }
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.settle(false);
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit")
            .field("key", &self.key)
            .field("window_start", &self.window_start)
            .field("settled", &self.settled)
            .finish()
    }
}

/// Outcome of an admission check.
#[derive(Debug)]
pub struct Admission {
    pub allowed: bool,
    /// `0` when the worker is unlimited.
    pub limit: u32,
    /// Calls counted in the window, including reserved in-flight ones and,
    /// when allowed, this one.
    pub current: u32,
    pub remaining: u32,
    pub reset_at: Timestamp,
    /// Present when a slot was reserved.
    pub permit: Option<Permit>,
}

impl Admission {
    fn denied(limit: u32, current: u32, reset_at: Timestamp) -> Self {
        Self {
            allowed: false,
            limit,
            current,
            remaining: 0,
            reset_at,
            permit: None,
        }
    }
}

/// Current consumption of one counter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Usage {
    pub current: u32,
    pub limit: u32,
    pub remaining: u32,
    /// `current / limit` as a percentage, rounded to two decimals. Zero when
    /// unlimited.
    pub percentage: f64,
    /// End of the live window, if one is open.
    pub reset_at: Option<Timestamp>,
}

/// Failures when loading persisted counters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("invalid rate window key '{0}'")]
    InvalidKey(String),
    #[error("rate window '{0}' has zero length")]
    ZeroLength(String),
}

// ---------------------------------------------------------------------------
// Limiter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct WindowState {
    count: u32,
    reserved: u32,
    window_start: Timestamp,
    window_len: Duration,
}

impl WindowState {
    fn fresh(now: Timestamp, window_len: Duration) -> Self {
        Self {
            count: 0,
            reserved: 0,
            window_start: now,
            window_len,
        }
    }

    /// A window covers its full length; it is over only once more than
    /// `window_len` has passed since it opened.
    fn is_expired(&self, now: Timestamp) -> bool {
        now.duration_since(self.window_start) > self.window_len
    }

    fn reset_at(&self) -> Timestamp {
        self.window_start.plus(self.window_len)
    }
}

/// Fixed-window counters keyed by worker and scope.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    windows: Arc<Windows>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("windows", &self.windows.len())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            windows: Arc::new(DashMap::new()),
        }
    }

    /// Decides whether one more call to `worker` under `scope` fits `rule`,
    /// reserving a slot if it does.
    pub fn admit(&self, worker: &WorkerName, scope: &RateScope, rule: RateRule) -> Admission {
        self.admit_at(scope.key(worker), rule)
    }

    /// Like [`RateLimiter::admit`] for a pre-rendered key. An unparseable key
    /// is denied.
    pub fn admit_key(&self, key: &str, rule: RateRule) -> Admission {
        if RateScope::parse_key(key).is_none() {
            debug!(key, "denying admission for invalid scope key");
            return Admission::denied(rule.limit, 0, self.clock.now());
        }
        self.admit_at(key.to_string(), rule)
    }

    fn admit_at(&self, key: String, rule: RateRule) -> Admission {
        let now = self.clock.now();
        if rule.is_unlimited() {
            return Admission {
                allowed: true,
                limit: 0,
                current: 0,
                remaining: u32::MAX,
                reset_at: now.plus(rule.period.window()),
                permit: None,
            };
        }

        let window_len = rule.period.window();
        let mut entry = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| WindowState::fresh(now, window_len));
        let state = entry.value_mut();
        if state.is_expired(now) {
            *state = WindowState::fresh(now, window_len);
        }

        let used = state.count.saturating_add(state.reserved);
        if used >= rule.limit {
            return Admission::denied(rule.limit, used, state.reset_at());
        }
        state.reserved += 1;
        Admission {
            allowed: true,
            limit: rule.limit,
            current: used + 1,
            remaining: rule.limit - used - 1,
            reset_at: state.reset_at(),
            permit: Some(Permit {
                windows: Arc::clone(&self.windows),
                key,
                window_start: state.window_start,
                settled: false,
            }),
        }
    }

    /// Consumption of one counter without reserving anything. An absent or
    /// expired window reports zero used.
    pub fn usage(&self, worker: &WorkerName, scope: &RateScope, rule: RateRule) -> Usage {
        let now = self.clock.now();
        let live = self
            .windows
            .get(&scope.key(worker))
            .filter(|s| !s.is_expired(now))
            .map(|s| (s.count, s.reset_at()));
        let (current, reset_at) = match live {
            Some((count, reset_at)) => (count, Some(reset_at)),
            None => (0, None),
        };
        let percentage = if rule.is_unlimited() {
            0.0
        } else {
            (f64::from(current) / f64::from(rule.limit) * 10_000.0).round() / 100.0
        };
        Usage {
            current,
            limit: rule.limit,
            remaining: rule.limit.saturating_sub(current),
            percentage,
            reset_at,
        }
    }

    /// Drops the counter for one scope. Resetting an absent counter is a no-op.
    pub fn reset(&self, worker: &WorkerName, scope: &RateScope) -> bool {
        self.windows.remove(&scope.key(worker)).is_some()
    }

    /// Drops every counter belonging to `worker`, global and per-client.
    pub fn reset_worker(&self, worker: &WorkerName) -> usize {
        let before = self.windows.len();
        let prefix = format!("{worker}:");
        self.windows
            .retain(|key, _| key != worker.as_str() && !key.starts_with(&prefix));
        before.saturating_sub(self.windows.len())
    }

    /// Removes counters whose window has ended.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, state| !state.is_expired(now));
        before.saturating_sub(self.windows.len())
    }

    /// Live windows, for persisting. Reserved but uncommitted slots are not
    /// included.
    pub fn snapshot(&self) -> Vec<RateWindow> {
        let now = self.clock.now();
        let mut windows: Vec<RateWindow> = self
            .windows
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| RateWindow {
                key: e.key().clone(),
                count: e.value().count,
                window_start: e.value().window_start,
                window_len_secs: e.value().window_len.as_secs(),
            })
            .collect();
        windows.sort_by(|a, b| a.key.cmp(&b.key));
        windows
    }

    /// Loads persisted counters. Any malformed window rejects the whole set.
    pub fn restore(&self, windows: &[RateWindow]) -> Result<(), RateLimitError> {
        for window in windows {
            if RateScope::parse_key(&window.key).is_none() {
                return Err(RateLimitError::InvalidKey(window.key.clone()));
            }
            if window.window_len_secs == 0 {
                return Err(RateLimitError::ZeroLength(window.key.clone()));
            }
        }
        for window in windows {
            self.windows.insert(
                window.key.clone(),
                WindowState {
                    count: window.count,
                    reserved: 0,
                    window_start: window.window_start,
                    window_len: Duration::from_secs(window.window_len_secs),
                },
            );
        }
        Ok(())
    }

    /// Number of tracked windows, expired ones included.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
