//! Append-only usage analytics bucketed by UTC day.
//!
//! Every terminal outcome of an invocation is appended as one [`UsageEvent`].
//! Reports roll the buckets up on demand; events are never edited.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use domain::{AnalyticsSettings, ClientHash, Clock, UsageEvent};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Failures of the analytics recorder.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalyticsError {
    #[error("invalid analytics settings: {0}")]
    InvalidSettings(String),
    #[error("resetting analytics requires explicit confirmation")]
    ConfirmationRequired,
    #[error("usage event has an empty worker name")]
    InvalidEvent,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Request counts and timing of one worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkerStats {
    pub total_requests: u64,
    pub success_count: u64,
    pub fail_count: u64,
    /// Percentage, one decimal.
    pub success_rate: f64,
    pub average_latency_ms: f64,
}

/// Totals for one calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayStats {
    pub date: NaiveDate,
    pub total_requests: u64,
    pub success_count: u64,
    pub fail_count: u64,
    pub unique_clients: usize,
}

/// Totals per worker and per day over a window of days.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStats {
    pub days: u32,
    pub total_requests: u64,
    pub success_count: u64,
    pub fail_count: u64,
    pub success_rate: f64,
    pub daily_average: f64,
    pub average_latency_ms: f64,
    pub unique_clients: usize,
    pub per_worker: BTreeMap<String, WorkerStats>,
    /// One entry per day in the window, oldest first, including empty days.
    pub daily: Vec<DayStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerUsage {
    pub worker: String,
    pub requests: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayUsage {
    pub date: NaiveDate,
    pub requests: u64,
}

/// Busiest workers and days, highest count first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsagePatterns {
    pub top_workers: Vec<WorkerUsage>,
    pub peak_days: Vec<DayUsage>,
}

#[derive(Default)]
struct Tally {
    total: u64,
    success: u64,
    latency_sum: u64,
}

impl Tally {
    fn add(&mut self, event: &UsageEvent) {
        self.total += 1;
        if event.success {
            self.success += 1;
        }
        self.latency_sum = self.latency_sum.saturating_add(event.latency_ms);
    }

    fn success_rate(&self) -> f64 {
        round_to(percent(self.success, self.total), 1)
    }

    fn average_latency(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            round_to(self.latency_sum as f64 / self.total as f64, 2)
        }
    }

    fn into_worker_stats(self) -> WorkerStats {
        WorkerStats {
            success_rate: self.success_rate(),
            average_latency_ms: self.average_latency(),
            total_requests: self.total,
            success_count: self.success,
            fail_count: self.total - self.success,
        }
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// Usage events bucketed by day, plus a bounded activity log.
pub struct AnalyticsRecorder {
    clock: Arc<dyn Clock>,
    settings: AnalyticsSettings,
    buckets: RwLock<BTreeMap<NaiveDate, Vec<UsageEvent>>>,
}

impl std::fmt::Debug for AnalyticsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsRecorder")
            .field("settings", &self.settings)
            .field("days", &self.buckets.read().len())
            .finish()
    }
}

impl AnalyticsRecorder {
    /// Fails when `settings` do not validate.
    pub fn new(settings: AnalyticsSettings, clock: Arc<dyn Clock>) -> Result<Self, AnalyticsError> {
        settings.validate().map_err(AnalyticsError::InvalidSettings)?;
        Ok(Self {
            clock,
            settings,
            buckets: RwLock::new(BTreeMap::new()),
        })
    }

    /// Appends `event` to its day's bucket and the activity log.
    pub fn record(&self, event: UsageEvent) {
        self.buckets
            .write()
            .entry(event.timestamp.date())
            .or_default()
            .push(event);
    }

    /// Report windows never reach past the retention period.
    fn clamp_days(&self, days: u32) -> u32 {
        days.clamp(1, self.settings.retention_days)
    }

    /// First day of a window of `days` days ending today.
    fn window_start(&self, days: u32) -> (NaiveDate, NaiveDate) {
        let today = self.clock.now().date();
        let start = today
            .checked_sub_days(Days::new(u64::from(self.clamp_days(days) - 1)))
            .unwrap_or(NaiveDate::MIN);
        (start, today)
    }

    /// Aggregates the last `days` days, today included.
    /// `days` is clamped to `1..=retention_days`.
    pub fn daily_stats(&self, days: u32) -> DailyStats {
        let days = self.clamp_days(days);
        let (start, today) = self.window_start(days);
        let buckets = self.buckets.read();

        let mut overall = Tally::default();
        let mut per_worker: BTreeMap<String, Tally> = BTreeMap::new();
        let mut clients: BTreeSet<&ClientHash> = BTreeSet::new();
        let mut daily = Vec::with_capacity(days as usize);

        for date in start.iter_days().take_while(|d| *d <= today) {
            let mut day = Tally::default();
            let mut day_clients: BTreeSet<&ClientHash> = BTreeSet::new();
            for event in buckets.get(&date).map(Vec::as_slice).unwrap_or_default() {
                overall.add(event);
                day.add(event);
                per_worker.entry(event.worker.clone()).or_default().add(event);
                clients.insert(&event.client);
                day_clients.insert(&event.client);
            }
            daily.push(DayStats {
                date,
                total_requests: day.total,
                success_count: day.success,
                fail_count: day.total - day.success,
                unique_clients: day_clients.len(),
            });
        }

        DailyStats {
            days,
            total_requests: overall.total,
            success_count: overall.success,
            fail_count: overall.total - overall.success,
            success_rate: overall.success_rate(),
            daily_average: round_to(overall.total as f64 / f64::from(days), 1),
            average_latency_ms: overall.average_latency(),
            unique_clients: clients.len(),
            per_worker: per_worker
                .into_iter()
                .map(|(worker, tally)| (worker, tally.into_worker_stats()))
                .collect(),
            daily,
        }
    }

    /// Totals for one worker; `days` is clamped like [`AnalyticsRecorder::daily_stats`].
    pub fn worker_stats(&self, worker: &str, days: u32) -> WorkerStats {
        let (start, today) = self.window_start(days);
        let mut tally = Tally::default();
        for (_, events) in self.buckets.read().range(start..=today) {
            events
                .iter()
                .filter(|e| e.worker == worker)
                .for_each(|e| tally.add(e));
        }
        tally.into_worker_stats()
    }

    /// Busiest workers and days of the last `days` days, at most `limit` each.
    pub fn usage_patterns(&self, days: u32, limit: usize) -> UsagePatterns {
        let (start, today) = self.window_start(days);
        let buckets = self.buckets.read();
        let mut by_worker: BTreeMap<&str, u64> = BTreeMap::new();
        let mut peak_days = Vec::new();
        for (date, events) in buckets.range(start..=today) {
            for event in events {
                *by_worker.entry(event.worker.as_str()).or_default() += 1;
            }
            if !events.is_empty() {
                peak_days.push(DayUsage {
                    date: *date,
                    requests: events.len() as u64,
                });
            }
        }

        let mut top_workers: Vec<WorkerUsage> = by_worker
            .into_iter()
            .map(|(worker, requests)| WorkerUsage {
                worker: worker.to_string(),
                requests,
            })
            .collect();
        top_workers.sort_by(|a, b| b.requests.cmp(&a.requests).then(a.worker.cmp(&b.worker)));
        top_workers.truncate(limit);
        peak_days.sort_by(|a, b| b.requests.cmp(&a.requests).then(b.date.cmp(&a.date)));
        peak_days.truncate(limit);

        UsagePatterns {
            top_workers,
            peak_days,
        }
    }

    /// Most recent events first, at most `limit` and never more than the
    /// configured activity log capacity.
    pub fn activity_log(&self, limit: usize) -> Vec<UsageEvent> {
        let limit = limit.min(self.settings.activity_log_capacity);
        let buckets = self.buckets.read();
        let mut events: Vec<&UsageEvent> = Vec::new();
        for bucket in buckets.values().rev() {
            if events.len() >= limit {
                break;
            }
            events.extend(bucket.iter().rev());
        }
        // Stable, so events sharing a timestamp stay newest-recorded first.
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.into_iter().take(limit).cloned().collect()
    }

    /// Drops buckets older than the retention period.
    pub fn cleanup_old(&self) -> usize {
        let (cutoff, _) = self.window_start(self.settings.retention_days);
        let mut buckets = self.buckets.write();
        let kept = buckets.split_off(&cutoff);
        let removed = buckets.values().map(Vec::len).sum();
        *buckets = kept;
        removed
    }

    /// Deletes every event. Refused unless `confirm` is set.
    pub fn reset(&self, confirm: bool) -> Result<usize, AnalyticsError> {
        if !confirm {
            return Err(AnalyticsError::ConfirmationRequired);
        }
        let removed = std::mem::take(&mut *self.buckets.write())
            .values()
            .map(Vec::len)
            .sum();
        info!(removed, "analytics reset");
        Ok(removed)
    }

    /// Every retained event, oldest day first.
    pub fn snapshot(&self) -> Vec<UsageEvent> {
        self.buckets.read().values().flatten().cloned().collect()
    }

    /// Replaces all events with persisted ones.
    pub fn restore(&self, events: &[UsageEvent]) -> Result<(), AnalyticsError> {
        if events.iter().any(|e| e.worker.trim().is_empty()) {
            return Err(AnalyticsError::InvalidEvent);
        }
        let mut buckets: BTreeMap<NaiveDate, Vec<UsageEvent>> = BTreeMap::new();
        for event in events {
            buckets
                .entry(event.timestamp.date())
                .or_default()
                .push(event.clone());
        }
        *self.buckets.write() = buckets;
        Ok(())
    }
}
