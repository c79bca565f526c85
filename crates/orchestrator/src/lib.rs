//! Request orchestration for the FaqWorks workers.
//!
//! This crate owns all shared mutable state of the system and the façade that
//! sequences it around each worker call.
//!
//! ## Architectural Layer
//!
//! **Application services.** Depends on `domain` for types and ports; knows
//! nothing about HTTP clients, files, or the command line.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`rate_limiter`] | Fixed-window counters with atomic reserve/commit |
//! | [`security`] | Client IP resolution, blacklist/whitelist, violation log |
//! | [`analytics`] | Usage events bucketed by day and their reports |
//! | [`retry`] | Linear-backoff retry driver |
//! | [`client`] | The generic single-dispatch `WorkerClient` |
//! | [`orchestrator`] | The `Orchestrator` façade and admin operations |
//! | [`builder`] | Bootstrap with degraded construction |

pub mod analytics;
pub mod builder;
pub mod client;
pub mod orchestrator;
pub mod rate_limiter;
pub mod retry;
pub mod security;

pub use analytics::{
    AnalyticsError, AnalyticsRecorder, DailyStats, DayStats, DayUsage, UsagePatterns, WorkerStats,
    WorkerUsage,
};
pub use builder::OrchestratorBuilder;
pub use client::{WorkerClient, WORKER_NAME_HEADER};
pub use orchestrator::{
    HealthReport, MaintenanceReport, Orchestrator, OrchestratorError, StatusReport, WorkerStatus,
};
pub use rate_limiter::{Admission, Permit, RateLimitError, RateLimiter, RateScope, Usage};
pub use retry::{run_with_retry, RetrySchedule};
pub use security::{
    SecurityError, SecurityGuard, ViolationOutcome, ViolationSummary, CLIENT_IP_HEADERS, MAX_BLOCK_HOURS,
};
