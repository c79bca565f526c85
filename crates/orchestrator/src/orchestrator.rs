//! The request orchestrator: the single entry point for worker invocations and
//! the administrative operations around them.
//!
//! Every invocation walks the same sequence:
//!
//! ```text
//! resolve client → security check → config check → rate admission
//!     → build request → dispatch (with retry) → validate
//!     → commit/release the reserved slot → record one usage event
//! ```
//!
//! A blocked client is turned away before the rate limiter is consulted, so it
//! never consumes quota. A reserved slot only counts once the call succeeds.
//!
//! The orchestrator is either ready or unavailable. An unavailable
//! orchestrator (see [`crate::OrchestratorBuilder`]) answers every call with a
//! structured unavailability error instead of failing at dispatch time.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use domain::capability::{
    AnswerStrategy, EnhanceStrategy, ExtractStrategy, QuestionStrategy, SeoStrategy, TopicStrategy,
};
use domain::{
    Capability, CapabilityInput, CapabilityOutput, CapabilityStrategy, ClientContext, ClientHash, Clock,
    ConfigStore, HttpMethod, InvocationId, PersistedState, RatePeriod, RateScopePolicy, SecurityEntry,
    StoreError, Timestamp, UsageEvent, WorkerConfig, WorkerError, WorkerName, WorkerRequest,
    WorkerTransport,
};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::analytics::{AnalyticsError, AnalyticsRecorder, DailyStats, UsagePatterns, WorkerStats};
use crate::client::{WorkerClient, WORKER_NAME_HEADER};
use crate::rate_limiter::{RateLimiter, RateScope, Usage};
use crate::retry::{run_with_retry, RetrySchedule};
use crate::security::{SecurityError, SecurityGuard, ViolationSummary};

const ADMIN: &str = "admin";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of the administrative surface.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrchestratorError {
    #[error("Orchestrator unavailable: {}", .reasons.join("; "))]
    Unavailable { reasons: Vec<String> },

    #[error("Unknown worker '{0}'")]
    UnknownWorker(String),

    #[error("'{0}' is not a valid IP address")]
    InvalidIp(String),

    #[error("{0} is not blocked")]
    NotBlocked(IpAddr),

    #[error("{0} is not whitelisted")]
    NotWhitelisted(IpAddr),

    #[error(transparent)]
    InvalidConfig(WorkerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("This operation requires explicit confirmation")]
    ConfirmationRequired,
}

impl From<SecurityError> for OrchestratorError {
    fn from(err: SecurityError) -> Self {
        match err {
            SecurityError::NotBlocked(ip) => Self::NotBlocked(ip),
            SecurityError::NotWhitelisted(ip) => Self::NotWhitelisted(ip),
            SecurityError::InvalidSettings(message) => Self::Unavailable {
                reasons: vec![message],
            },
            SecurityError::InvalidEntry(ip) => Self::InvalidIp(ip.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Configuration and live usage of one worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub worker: String,
    pub enabled: bool,
    pub url: String,
    pub rate_limit: u32,
    pub rate_limit_period: RatePeriod,
    pub rate_scope: RateScopePolicy,
    /// Consumption of the worker's global counter.
    pub usage: Usage,
}

/// Every worker's status plus recent security activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub workers: Vec<WorkerStatus>,
    /// Violations recorded in the last 24 hours.
    pub violations_24h: usize,
    /// Distinct addresses behind those violations.
    pub distinct_ips_24h: usize,
    /// Live blocks.
    pub blocked_ips: usize,
}

/// Result of calling a worker's health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub worker: String,
    pub url: String,
    pub reachable: bool,
    /// HTTP status, when a response arrived.
    pub status: Option<u16>,
    /// Round trip in milliseconds.
    pub latency_ms: u64,
    pub message: String,
}

/// What one maintenance pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub rate_windows_evicted: usize,
    pub blocks_expired: usize,
    pub violations_pruned: usize,
    pub usage_events_pruned: usize,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub(crate) type WorkerMap = BTreeMap<WorkerName, WorkerConfig>;

/// The live components of a ready orchestrator.
pub(crate) struct Core {
    pub(crate) config_store: Arc<dyn ConfigStore>,
    pub(crate) transport: Arc<dyn WorkerTransport>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) user_agent: String,
    pub(crate) workers: RwLock<Arc<WorkerMap>>,
    pub(crate) rate_limiter: RateLimiter,
    pub(crate) security: SecurityGuard,
    pub(crate) analytics: AnalyticsRecorder,
}

pub(crate) enum State {
    Ready(Box<Core>),
    Unavailable(Vec<String>),
}

/// Routes capability calls to workers behind rate limits and the security guard.
///
/// Built by [`OrchestratorBuilder`](crate::OrchestratorBuilder). A build that
/// fails leaves the orchestrator unavailable: every operation then returns
/// [`OrchestratorError::Unavailable`].
pub struct Orchestrator {
    state: State,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.state {
            State::Ready(core) => f
                .debug_struct("Orchestrator")
                .field("workers", &core.workers.read().len())
                .field("rate_limiter", &core.rate_limiter)
                .finish(),
            State::Unavailable(reasons) => f
                .debug_struct("Orchestrator")
                .field("unavailable", reasons)
                .finish(),
        }
    }
}

/// Stored configuration laid over the defaults of every built-in worker.
pub(crate) async fn load_workers(store: &dyn ConfigStore) -> Result<WorkerMap, StoreError> {
    let mut workers: WorkerMap = Capability::ALL
        .into_iter()
        .map(WorkerName::from)
        .map(|name| (name.clone(), WorkerConfig::defaults(name)))
        .collect();
    workers.extend(store.get_all().await?);
    Ok(workers)
}

fn parse_ip(raw: &str) -> Result<IpAddr, OrchestratorError> {
    raw.trim()
        .parse()
        .map_err(|_| OrchestratorError::InvalidIp(raw.to_string()))
}

impl Orchestrator {
    pub(crate) fn from_state(state: State) -> Self {
        Self { state }
    }

    /// Whether construction succeeded.
    pub fn is_available(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// Why the orchestrator is unavailable. Empty when it is ready.
    pub fn unavailable_reasons(&self) -> &[String] {
        match &self.state {
            State::Ready(_) => &[],
            State::Unavailable(reasons) => reasons,
        }
    }

    fn core(&self) -> Result<&Core, OrchestratorError> {
        match &self.state {
            State::Ready(core) => Ok(&**core),
            State::Unavailable(reasons) => Err(OrchestratorError::Unavailable {
                reasons: reasons.clone(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Invocation
    // -----------------------------------------------------------------------

    /// Runs one capability call on behalf of `client`.
    pub async fn invoke(
        &self,
        input: CapabilityInput,
        client: &ClientContext,
    ) -> Result<CapabilityOutput, WorkerError> {
        let core = match &self.state {
            State::Ready(core) => core,
            State::Unavailable(reasons) => {
                return Err(WorkerError::Unavailable {
                    reasons: reasons.clone(),
                })
            }
        };

        let capability = input.capability();
        let worker = WorkerName::from(capability);
        let span = info_span!(
            "invoke",
            invocation = %InvocationId::new_random(),
            capability = %capability,
            worker = %worker,
        );

        async move {
            match input {
                CapabilityInput::QuestionGenerator(req) => core
                    .run(&QuestionStrategy, &worker, &req, client)
                    .await
                    .map(CapabilityOutput::QuestionGenerator),
                CapabilityInput::AnswerGenerator(req) => core
                    .run(&AnswerStrategy, &worker, &req, client)
                    .await
                    .map(CapabilityOutput::AnswerGenerator),
                CapabilityInput::FaqEnhancer(req) => core
                    .run(&EnhanceStrategy, &worker, &req, client)
                    .await
                    .map(CapabilityOutput::FaqEnhancer),
                CapabilityInput::SeoAnalyzer(req) => core
                    .run(&SeoStrategy, &worker, &req, client)
                    .await
                    .map(CapabilityOutput::SeoAnalyzer),
                CapabilityInput::FaqExtractor(req) => core
                    .run(&ExtractStrategy, &worker, &req, client)
                    .await
                    .map(CapabilityOutput::FaqExtractor),
                CapabilityInput::TopicGenerator(req) => core
                    .run(&TopicStrategy, &worker, &req, client)
                    .await
                    .map(CapabilityOutput::TopicGenerator),
            }
        }
        .instrument(span)
        .await
    }

    // -----------------------------------------------------------------------
    // Workers
    // -----------------------------------------------------------------------

    /// Configuration and global usage of every worker, with violation and
    /// block counts for the last 24 hours.
    pub fn worker_status(&self) -> Result<StatusReport, OrchestratorError> {
        let core = self.core()?;
        let workers = core.workers.read().clone();
        let statuses = workers
            .values()
            .map(|config| WorkerStatus {
                worker: config.name.to_string(),
                enabled: config.enabled,
                url: config.url.clone(),
                rate_limit: config.rate_limit,
                rate_limit_period: config.rate_limit_period,
                rate_scope: config.rate_scope,
                usage: core
                    .rate_limiter
                    .usage(&config.name, &RateScope::Global, config.rate_rule()),
            })
            .collect();
        let (violations_24h, distinct_ips_24h) = core.security.recent_violation_stats(24);
        Ok(StatusReport {
            workers: statuses,
            violations_24h,
            distinct_ips_24h,
            blocked_ips: core.security.list_blocked().len(),
        })
    }

    /// Resolved configuration of `worker`.
    pub fn worker_config(&self, worker: &str) -> Result<WorkerConfig, OrchestratorError> {
        let core = self.core()?;
        core.lookup(worker)
    }

    /// Clears every rate counter of `worker`. Clearing already-empty counters
    /// succeeds.
    pub fn reset_rate_limit(&self, worker: &str) -> Result<usize, OrchestratorError> {
        let core = self.core()?;
        let config = core.lookup(worker)?;
        let cleared = core.rate_limiter.reset_worker(&config.name);
        info!(worker = %config.name, cleared, "rate limit reset");
        Ok(cleared)
    }

    /// Re-reads every worker configuration and swaps the map in one step. On
    /// failure the previous map stays in place.
    pub async fn reload_config(&self) -> Result<usize, OrchestratorError> {
        let core = self.core()?;
        let workers = load_workers(core.config_store.as_ref()).await?;
        let count = workers.len();
        *core.workers.write() = Arc::new(workers);
        info!(workers = count, "worker configuration reloaded");
        Ok(count)
    }

    /// Validates and stores `config`, then reloads.
    pub async fn update_worker_config(&self, config: WorkerConfig) -> Result<(), OrchestratorError> {
        let core = self.core()?;
        config.validate().map_err(OrchestratorError::InvalidConfig)?;
        core.config_store
            .set_worker_config(&config.name, &config)
            .await?;
        info!(worker = %config.name, "worker configuration updated");
        self.reload_config().await.map(|_| ())
    }

    /// Calls `GET <url>/health` without touching rate limits.
    pub async fn test_worker(&self, worker: &str) -> Result<HealthReport, OrchestratorError> {
        let core = self.core()?;
        let config = core.lookup(worker)?;
        let mut report = HealthReport {
            worker: config.name.to_string(),
            url: String::new(),
            reachable: false,
            status: None,
            latency_ms: 0,
            message: String::new(),
        };
        if config.url.trim().is_empty() {
            report.message = "no URL configured".to_string();
            return Ok(report);
        }

        report.url = config.health_url();
        let request = WorkerRequest {
            method: HttpMethod::Get,
            url: report.url.clone(),
            headers: vec![
                ("accept".to_string(), "application/json".to_string()),
                ("user-agent".to_string(), core.user_agent.clone()),
                (WORKER_NAME_HEADER.to_string(), config.name.to_string()),
            ],
            body: None,
            timeout: config.timeout(),
        };
        let started = Instant::now();
        let outcome = core.transport.send(request).await;
        report.latency_ms = elapsed_ms(started);
        match outcome {
            Ok(response) => {
                report.reachable = response.is_success();
                report.status = Some(response.status);
                report.message = if report.reachable {
                    "worker is healthy".to_string()
                } else {
                    format!("worker answered HTTP {}", response.status)
                };
            }
            Err(err) => report.message = err.message,
        }
        info!(worker = %config.name, reachable = report.reachable, latency_ms = report.latency_ms, "worker health checked");
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Security
    // -----------------------------------------------------------------------

    /// Blocks `ip` for `duration_hours`; zero blocks permanently.
    pub fn block_ip(&self, ip: &str, reason: &str, duration_hours: u32) -> Result<SecurityEntry, OrchestratorError> {
        let core = self.core()?;
        Ok(core.security.block(parse_ip(ip)?, reason, duration_hours, ADMIN))
    }

    /// Lifts the block on `ip`.
    pub fn unblock_ip(&self, ip: &str) -> Result<SecurityEntry, OrchestratorError> {
        let core = self.core()?;
        Ok(core.security.unblock(&parse_ip(ip)?)?)
    }

    /// Live blocks, newest first. Expired entries are left out.
    pub fn list_blocked(&self) -> Result<Vec<SecurityEntry>, OrchestratorError> {
        Ok(self.core()?.security.list_blocked())
    }

    /// Whitelists `ip`. Its calls then bypass rate limiting.
    pub fn allow_ip(&self, ip: &str, reason: &str) -> Result<SecurityEntry, OrchestratorError> {
        let core = self.core()?;
        Ok(core.security.allow(parse_ip(ip)?, reason, ADMIN))
    }

    /// Removes `ip` from the whitelist.
    pub fn disallow_ip(&self, ip: &str) -> Result<SecurityEntry, OrchestratorError> {
        let core = self.core()?;
        Ok(core.security.disallow(&parse_ip(ip)?)?)
    }

    /// Whitelist entries, newest first.
    pub fn list_allowed(&self) -> Result<Vec<SecurityEntry>, OrchestratorError> {
        Ok(self.core()?.security.list_allowed())
    }

    /// Violations of the last `period_hours`, grouped by address.
    pub fn violations(&self, period_hours: u32) -> Result<Vec<ViolationSummary>, OrchestratorError> {
        Ok(self.core()?.security.violations_summary(period_hours))
    }

    // -----------------------------------------------------------------------
    // Analytics
    // -----------------------------------------------------------------------

    /// Usage over the last `days` days, clamped to the retention period.
    pub fn analytics(&self, days: u32) -> Result<DailyStats, OrchestratorError> {
        Ok(self.core()?.analytics.daily_stats(days))
    }

    /// Usage of one worker over the last `days` days.
    pub fn worker_analytics(&self, worker: &str, days: u32) -> Result<WorkerStats, OrchestratorError> {
        let core = self.core()?;
        let config = core.lookup(worker)?;
        Ok(core.analytics.worker_stats(config.name.as_str(), days))
    }

    /// Busiest workers and days of the last `days` days.
    pub fn usage_patterns(&self, days: u32, limit: usize) -> Result<UsagePatterns, OrchestratorError> {
        Ok(self.core()?.analytics.usage_patterns(days, limit))
    }

    /// The newest `limit` usage events, newest first.
    pub fn activity(&self, limit: usize) -> Result<Vec<UsageEvent>, OrchestratorError> {
        Ok(self.core()?.analytics.activity_log(limit))
    }

    /// Deletes all usage events. Refused unless `confirm` is set.
    pub fn reset_analytics(&self, confirm: bool) -> Result<usize, OrchestratorError> {
        self.core()?
            .analytics
            .reset(confirm)
            .map_err(|e| match e {
                AnalyticsError::ConfirmationRequired => OrchestratorError::ConfirmationRequired,
                other => OrchestratorError::Unavailable {
                    reasons: vec![other.to_string()],
                },
            })
    }

    // -----------------------------------------------------------------------
    // Housekeeping
    // -----------------------------------------------------------------------

    /// Drops everything that has outlived its window, expiry or retention.
    pub fn run_maintenance(&self) -> Result<MaintenanceReport, OrchestratorError> {
        let core = self.core()?;
        let report = MaintenanceReport {
            rate_windows_evicted: core.rate_limiter.evict_expired(),
            blocks_expired: core.security.cleanup_expired_blocks(),
            violations_pruned: core.security.prune_violations(),
            usage_events_pruned: core.analytics.cleanup_old(),
        };
        info!(?report, "maintenance complete");
        Ok(report)
    }

    /// Snapshot of all mutable state, for persisting between runs.
    pub fn export_state(&self) -> Result<PersistedState, OrchestratorError> {
        let core = self.core()?;
        let (security_entries, violations) = core.security.snapshot();
        Ok(PersistedState {
            version: PersistedState::CURRENT_VERSION,
            rate_windows: core.rate_limiter.snapshot(),
            security_entries,
            violations,
            usage_events: core.analytics.snapshot(),
        })
    }

    /// Current time from the orchestrator's clock; `None` when unavailable.
    pub fn now(&self) -> Option<Timestamp> {
        self.core().ok().map(|core| core.clock.now())
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Invocation pipeline
// ---------------------------------------------------------------------------

impl Core {
    fn lookup(&self, worker: &str) -> Result<WorkerConfig, OrchestratorError> {
        WorkerName::new(worker)
            .and_then(|name| self.workers.read().get(&name).cloned())
            .ok_or_else(|| OrchestratorError::UnknownWorker(worker.to_string()))
    }

    async fn run<S: CapabilityStrategy>(
        &self,
        strategy: &S,
        worker: &WorkerName,
        input: &S::Input,
        client: &ClientContext,
    ) -> Result<S::Output, WorkerError> {
        let started = Instant::now();
        let ip = self.security.resolve_client_ip(client);
        let client_hash = ClientHash::of(&ip);

        let result = self
            .admit_and_dispatch(strategy, worker, input, ip, &client_hash)
            .await;

        let latency_ms = elapsed_ms(started);
        self.analytics.record(UsageEvent {
            worker: worker.to_string(),
            client: client_hash,
            success: result.is_ok(),
            latency_ms,
            timestamp: self.clock.now(),
            error_kind: result.as_ref().err().map(WorkerError::kind),
        });
        match &result {
            Ok(_) => info!(latency_ms, "invocation succeeded"),
            Err(err) => warn!(latency_ms, kind = %err.kind(), error = %err, "invocation failed"),
        }
        result
    }

    async fn admit_and_dispatch<S: CapabilityStrategy>(
        &self,
        strategy: &S,
        worker: &WorkerName,
        input: &S::Input,
        ip: IpAddr,
        client_hash: &ClientHash,
    ) -> Result<S::Output, WorkerError> {
        if let Some(entry) = self.security.blocked_entry(&ip) {
            warn!(%ip, reason = %entry.reason, "blocked client denied");
            return Err(WorkerError::IpBlocked {
                ip,
                reason: entry.reason,
                expires_at: entry.expires_at,
            });
        }

        let config = self
            .workers
            .read()
            .get(worker)
            .cloned()
            .ok_or_else(|| WorkerError::WorkerNotFound {
                worker: worker.to_string(),
            })?;
        config.ensure_dispatchable()?;

        let permit = if self.security.is_whitelisted(&ip) {
            debug!(%ip, "whitelisted client bypasses rate limiting");
            None
        } else {
            let scope = match config.rate_scope {
                RateScopePolicy::Global => RateScope::Global,
                RateScopePolicy::PerClient => RateScope::Client(client_hash.clone()),
            };
            let admission = self.rate_limiter.admit(worker, &scope, config.rate_rule());
            if !admission.allowed {
                let outcome = self.security.record_violation(
                    worker.as_str(),
                    ip,
                    admission.current.saturating_add(1),
                    admission.limit,
                );
                warn!(
                    %ip,
                    limit = admission.limit,
                    current = admission.current,
                    reset_at = %admission.reset_at,
                    auto_blocked = outcome.auto_blocked,
                    "rate limit exceeded"
                );
                return Err(WorkerError::RateLimited {
                    worker: worker.to_string(),
                    limit: admission.limit,
                    period: config.rate_limit_period,
                    remaining: 0,
                    reset_at: admission.reset_at,
                });
            }
            admission.permit
        };

        // Every early return from here drops `permit`, which returns the slot.
        let body = strategy.build_request(input, self.clock.now())?;

        let client = WorkerClient::new(strategy, self.transport.as_ref(), &self.user_agent);
        let result = {
            let client = &client;
            let config = &config;
            let body = &body;
            run_with_retry(
                RetrySchedule::from_config(config),
                worker.as_str(),
                move |attempt| client.call(config, body, attempt),
            )
            .await
        };

        if let Some(permit) = permit {
            if result.is_ok() {
                permit.commit();
            } else {
                permit.release();
            }
        }
        result
    }
}
