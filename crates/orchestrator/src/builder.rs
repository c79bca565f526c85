//! Construction of an [`Orchestrator`], tolerating component failures.
//!
//! Every mandatory component is built as a `Result`. If any of them fails (or
//! the persisted state cannot be restored, or the worker configuration cannot
//! be read) the builder still returns an orchestrator, in its unavailable
//! state, carrying the collected reasons.

use std::sync::Arc;

use domain::{
    AnalyticsSettings, Clock, ConfigStore, HttpSettings, PersistedState, SecuritySettings, StoreError,
    SystemClock, WorkerTransport,
};
use parking_lot::RwLock;
use tracing::{error, info};

use crate::analytics::AnalyticsRecorder;
use crate::orchestrator::{load_workers, Core, Orchestrator, State};
use crate::rate_limiter::RateLimiter;
use crate::security::SecurityGuard;

/// Collects the collaborators and settings of an [`Orchestrator`].
pub struct OrchestratorBuilder {
    config_store: Arc<dyn ConfigStore>,
    transport: Arc<dyn WorkerTransport>,
    clock: Arc<dyn Clock>,
    security: SecuritySettings,
    analytics: AnalyticsSettings,
    user_agent: String,
    state: Option<PersistedState>,
    state_error: Option<StoreError>,
}

impl OrchestratorBuilder {
    pub fn new(config_store: Arc<dyn ConfigStore>, transport: Arc<dyn WorkerTransport>) -> Self {
        Self {
            config_store,
            transport,
            clock: Arc::new(SystemClock),
            security: SecuritySettings::default(),
            analytics: AnalyticsSettings::default(),
            user_agent: HttpSettings::default().user_agent,
            state: None,
            state_error: None,
        }
    }

    /// Replaces the system clock. Tests pass a manual one.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn security_settings(mut self, settings: SecuritySettings) -> Self {
        self.security = settings;
        self
    }

    pub fn analytics_settings(mut self, settings: AnalyticsSettings) -> Self {
        self.analytics = settings;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// State saved by a previous run, restored into the components on build.
    pub fn restore_state(mut self, state: PersistedState) -> Self {
        self.state = Some(state);
        self
    }

    /// Records that saved state exists but could not be read. The built
    /// orchestrator is unavailable rather than silently starting empty.
    pub fn state_unreadable(mut self, err: StoreError) -> Self {
        self.state_error = Some(err);
        self
    }

    /// Builds every component. Never fails; see the module docs.
    pub async fn build(self) -> Orchestrator {
        let mut reasons = Vec::new();
        if let Some(err) = &self.state_error {
            reasons.push(format!("persisted state: {err}"));
        }

        let rate_limiter = RateLimiter::new(self.clock.clone());
        let security = SecurityGuard::new(self.security, self.clock.clone())
            .map_err(|e| reasons.push(format!("security guard: {e}")))
            .ok();
        let analytics = AnalyticsRecorder::new(self.analytics, self.clock.clone())
            .map_err(|e| reasons.push(format!("analytics recorder: {e}")))
            .ok();

        if let Some(state) = &self.state {
            if state.version != PersistedState::CURRENT_VERSION {
                reasons.push(format!(
                    "persisted state version {} is not supported (expected {})",
                    state.version,
                    PersistedState::CURRENT_VERSION
                ));
            } else {
                if let Err(e) = rate_limiter.restore(&state.rate_windows) {
                    reasons.push(format!("rate limiter: {e}"));
                }
                if let Some(security) = &security {
                    if let Err(e) = security.restore(&state.security_entries, &state.violations) {
                        reasons.push(format!("security guard: {e}"));
                    }
                }
                if let Some(analytics) = &analytics {
                    if let Err(e) = analytics.restore(&state.usage_events) {
                        reasons.push(format!("analytics recorder: {e}"));
                    }
                }
            }
        }

        let workers = load_workers(self.config_store.as_ref())
            .await
            .map_err(|e| reasons.push(format!("worker configuration: {e}")))
            .ok();

        match (security, analytics, workers) {
            (Some(security), Some(analytics), Some(workers)) if reasons.is_empty() => {
                info!(workers = workers.len(), "orchestrator ready");
                Orchestrator::from_state(State::Ready(Box::new(Core {
                    config_store: self.config_store,
                    transport: self.transport,
                    clock: self.clock,
                    user_agent: self.user_agent,
                    workers: RwLock::new(Arc::new(workers)),
                    rate_limiter,
                    security,
                    analytics,
                })))
            }
            _ => {
                error!(reasons = ?reasons, "orchestrator starting in degraded mode");
                Orchestrator::from_state(State::Unavailable(reasons))
            }
        }
    }
}
