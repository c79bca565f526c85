//! Typed worker and component settings.
//!
//! [`WorkerConfig`] is the fully-resolved configuration of one worker. It is
//! produced from a partial [`WorkerSettings`] (as read from the settings file or
//! any other [`crate::ConfigStore`] backing) by filling every missing key with
//! the defaults of the worker's capability.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Capability, RatePeriod, RateScopePolicy, WorkerError, WorkerName};

/// Generic defaults for workers that are not one of the built-in capabilities.
const FALLBACK_RATE_LIMIT: u32 = 50;
const FALLBACK_TIMEOUT_SECS: u64 = 30;
const FALLBACK_MAX_RETRIES: u32 = 3;
const FALLBACK_RETRY_DELAY_SECS: u64 = 2;

// ---------------------------------------------------------------------------
// Rate rule
// ---------------------------------------------------------------------------

/// The admission rule applied to one worker: `limit` calls per `period`.
///
/// A `limit` of zero means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRule {
    pub limit: u32,
    pub period: RatePeriod,
}

impl RateRule {
    pub fn is_unlimited(self) -> bool {
        self.limit == 0
    }
}

// ---------------------------------------------------------------------------
// Worker configuration
// ---------------------------------------------------------------------------

/// Resolved configuration of one external worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub name: WorkerName,
    /// Base URL; the capability's endpoint path is appended on dispatch.
    pub url: String,
    pub enabled: bool,
    /// Calls admitted per window. `0` disables rate limiting.
    pub rate_limit: u32,
    pub rate_limit_period: RatePeriod,
    pub rate_scope: RateScopePolicy,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl WorkerConfig {
    /// Defaults for `name`: the capability table for the six built-in
    /// workers, generic values otherwise. The URL is always empty.
    pub fn defaults(name: WorkerName) -> Self {
        let (rate_limit, period, timeout_secs, max_retries, retry_delay_secs) =
            match Capability::from_worker_name(&name) {
                Some(Capability::QuestionGenerator) => (100, RatePeriod::Hourly, 30, 3, 2),
                Some(Capability::AnswerGenerator) => (50, RatePeriod::Hourly, 30, 3, 2),
                Some(Capability::FaqEnhancer) => (25, RatePeriod::Daily, 30, 3, 2),
                Some(Capability::SeoAnalyzer) => (75, RatePeriod::Hourly, 30, 3, 2),
                Some(Capability::FaqExtractor) => (100, RatePeriod::Daily, 60, 3, 3),
                Some(Capability::TopicGenerator) => (10, RatePeriod::Hourly, 45, 3, 3),
                None => (
                    FALLBACK_RATE_LIMIT,
                    RatePeriod::Hourly,
                    FALLBACK_TIMEOUT_SECS,
                    FALLBACK_MAX_RETRIES,
                    FALLBACK_RETRY_DELAY_SECS,
                ),
            };
        Self {
            name,
            url: String::new(),
            enabled: true,
            rate_limit,
            rate_limit_period: period,
            rate_scope: RateScopePolicy::Global,
            timeout_secs,
            max_retries,
            retry_delay_secs,
        }
    }

    /// Overlays `settings` on the defaults for `name`.
    pub fn from_settings(name: WorkerName, settings: &WorkerSettings) -> Self {
        let defaults = Self::defaults(name);
        Self {
            url: settings
                .url
                .as_deref()
                .map(|u| u.trim().to_string())
                .unwrap_or(defaults.url),
            enabled: settings.enabled.unwrap_or(defaults.enabled),
            rate_limit: settings.rate_limit.unwrap_or(defaults.rate_limit),
            rate_limit_period: settings
                .rate_limit_period
                .unwrap_or(defaults.rate_limit_period),
            rate_scope: settings.rate_scope.unwrap_or(defaults.rate_scope),
            timeout_secs: settings.timeout_secs.unwrap_or(defaults.timeout_secs),
            max_retries: settings.max_retries.unwrap_or(defaults.max_retries),
            retry_delay_secs: settings
                .retry_delay_secs
                .unwrap_or(defaults.retry_delay_secs),
            name: defaults.name,
        }
    }

    /// The fully-populated settings form, suitable for writing back to a store.
    pub fn to_settings(&self) -> WorkerSettings {
        WorkerSettings {
            url: Some(self.url.clone()),
            enabled: Some(self.enabled),
            rate_limit: Some(self.rate_limit),
            rate_limit_period: Some(self.rate_limit_period),
            rate_scope: Some(self.rate_scope),
            timeout_secs: Some(self.timeout_secs),
            max_retries: Some(self.max_retries),
            retry_delay_secs: Some(self.retry_delay_secs),
        }
    }

    pub fn rate_rule(&self) -> RateRule {
        RateRule {
            limit: self.rate_limit,
            period: self.rate_limit_period,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Checks that the worker may be called at all.
    ///
    /// Order matters: a disabled worker reports `WorkerDisabled` even when its
    /// URL is also missing.
    pub fn ensure_dispatchable(&self) -> Result<(), WorkerError> {
        let worker = self.name.to_string();
        if !self.enabled {
            return Err(WorkerError::WorkerDisabled { worker });
        }
        if self.url.trim().is_empty() {
            return Err(WorkerError::MissingUrl { worker });
        }
        self.validate()
    }

    /// Structural validation independent of the enabled flag.
    pub fn validate(&self) -> Result<(), WorkerError> {
        let invalid = |message: String| WorkerError::InvalidConfig {
            worker: self.name.to_string(),
            message,
        };
        if !self.url.trim().is_empty() {
            let parsed = url::Url::parse(self.url.trim())
                .map_err(|e| invalid(format!("url '{}' is not valid: {e}", self.url)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(invalid(format!(
                    "url scheme '{}' is not http or https",
                    parsed.scheme()
                )));
            }
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Full URL for dispatching `capability` to this worker.
    pub fn endpoint_for(&self, capability: Capability) -> String {
        format!("{}{}", self.base_url(), capability.endpoint_path())
    }

    /// URL of the worker's health endpoint.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url())
    }

    fn base_url(&self) -> &str {
        self.url.trim().trim_end_matches('/')
    }
}

/// Partial worker settings as stored. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_period: Option<RatePeriod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_scope: Option<RateScopePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Component settings
// ---------------------------------------------------------------------------

/// Thresholds for violation tracking and automatic blocking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Violations from one IP within an hour that raise an alert.
    pub violation_alert_threshold: u32,
    /// Violations from one IP within an hour that trigger an automatic block.
    pub auto_block_threshold: u32,
    pub auto_block_hours: u32,
    pub violation_retention_days: u32,
    pub max_violations: usize,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            violation_alert_threshold: 3,
            auto_block_threshold: 5,
            auto_block_hours: 24,
            violation_retention_days: 30,
            max_violations: 1_000,
        }
    }
}

impl SecuritySettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.auto_block_threshold == 0 {
            return Err("auto_block_threshold must be at least 1".into());
        }
        if self.violation_alert_threshold == 0 {
            return Err("violation_alert_threshold must be at least 1".into());
        }
        if self.max_violations == 0 {
            return Err("max_violations must be at least 1".into());
        }
        if self.violation_retention_days == 0 {
            return Err("violation_retention_days must be at least 1".into());
        }
        Ok(())
    }
}

/// Retention for usage events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsSettings {
    /// Days of usage events kept. Must lie within `1..=365`.
    pub retention_days: u32,
    /// Upper bound on entries returned by the activity log.
    pub activity_log_capacity: usize,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            retention_days: 90,
            activity_log_capacity: 1_000,
        }
    }
}

impl AnalyticsSettings {
    pub const MAX_RETENTION_DAYS: u32 = 365;

    pub fn validate(&self) -> Result<(), String> {
        if !(1..=Self::MAX_RETENTION_DAYS).contains(&self.retention_days) {
            return Err(format!(
                "retention_days must lie within 1..={}, got {}",
                Self::MAX_RETENTION_DAYS,
                self.retention_days
            ));
        }
        if self.activity_log_capacity == 0 {
            return Err("activity_log_capacity must be at least 1".into());
        }
        Ok(())
    }
}

/// Outbound HTTP settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: concat!("faqworks/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// The whole settings document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub workers: BTreeMap<String, WorkerSettings>,
    pub security: SecuritySettings,
    pub analytics: AnalyticsSettings,
    pub http: HttpSettings,
}
