//! Worker orchestration domain for FaqWorks.
//!
//! This crate contains every domain concept used when calling the external FAQ
//! workers: identifiers, value types, the persisted data model, the error
//! taxonomy, resolved worker configuration, and the six capability strategies
//! that build requests and validate replies. Infrastructure crates implement the
//! port traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | `WorkerName`, `ClientHash`, `InvocationId` |
//! | [`types`] | `RatePeriod`, `Score`, `Confidence`, `ClientContext`, `Timestamp` |
//! | [`errors`] | `WorkerError`, `ErrorKind`, `RetryPolicy`, `StoreError` |
//! | [`config`] | `WorkerConfig`, component settings |
//! | [`model`] | Rate windows, security entries, violations, usage events |
//! | [`ports`] | `ConfigStore`, `StateStore`, `WorkerTransport`, `Clock` |
//! | [`capability`] | Per-capability request building and response validation |
//! | [`sanitize`] | Text and URL sanitization |

pub mod capability;
pub mod config;
pub mod errors;
pub mod identifiers;
pub mod model;
pub mod ports;
pub mod sanitize;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use capability::{
    reject_reported_error, Capability, CapabilityInput, CapabilityOutput, CapabilityStrategy,
    ResponseError,
};
pub use config::{
    AnalyticsSettings, HttpSettings, RateRule, SecuritySettings, Settings, WorkerConfig,
    WorkerSettings,
};
pub use errors::{is_retryable_status, ErrorKind, RetryPolicy, StoreError, WorkerError};
pub use identifiers::{ClientHash, InvocationId, WorkerName};
pub use model::{
    EntryKind, PersistedState, RateWindow, SecurityEntry, Severity, UsageEvent, Violation,
};
pub use ports::{
    Clock, ConfigStore, HttpMethod, ManualClock, StateStore, SystemClock, TransportError, WorkerRequest,
    WorkerResponse, WorkerTransport,
};
pub use types::{ClientContext, Confidence, RatePeriod, RateScopePolicy, Score, Timestamp};
