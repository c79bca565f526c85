//! Value types shared across the worker domain.
//!
//! Bounded scores carry their range in the type: constructing a [`Score`] or a
//! [`Confidence`] clamps the raw value, so a validated response can never hold
//! an out-of-range number.

use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Rate window configuration
// ---------------------------------------------------------------------------

/// Length of a worker's rate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatePeriod {
    Hourly,
    Daily,
}

impl RatePeriod {
    /// Fixed window length: one hour or one day.
    pub fn window(self) -> Duration {
        match self {
            Self::Hourly => Duration::from_secs(3_600),
            Self::Daily => Duration::from_secs(86_400),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
        }
    }
}

impl std::fmt::Display for RatePeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RatePeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" | "hour" => Ok(Self::Hourly),
            "daily" | "day" => Ok(Self::Daily),
            other => Err(format!("unknown rate period '{other}'")),
        }
    }
}

/// Whether a worker's quota is shared by all clients or tracked per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateScopePolicy {
    #[default]
    Global,
    PerClient,
}

impl std::fmt::Display for RateScopePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::PerClient => f.write_str("per_client"),
        }
    }
}

// ---------------------------------------------------------------------------
// Bounded scores
// ---------------------------------------------------------------------------

/// An integer score in `0..=100`.
///
/// Worker responses are untrusted, so construction clamps rather than
/// rejects: `Score::clamped(150)` is `100`, `Score::clamped(-3)` is `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(u8);

impl Score {
    pub const MAX: u8 = 100;

    pub fn clamped(raw: i64) -> Self {
        Self(raw.clamp(0, i64::from(Self::MAX)) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

/// A confidence value in `[0.0, 1.0]`. Non-finite inputs clamp to `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    pub fn clamped(raw: f64) -> Self {
        if raw.is_finite() {
            Self(raw.clamp(0.0, 1.0))
        } else {
            Self(0.0)
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Inbound request context
// ---------------------------------------------------------------------------

/// What the inbound surface knows about the caller of an invocation.
///
/// Header names are matched case-insensitively. The orchestrator resolves the
/// effective client address from these headers, falling back to `peer_addr`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub peer_addr: Option<IpAddr>,
    pub headers: Vec<(String, String)>,
}

impl ClientContext {
    pub fn from_peer(peer_addr: IpAddr) -> Self {
        Self {
            peer_addr: Some(peer_addr),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of the named header, if any.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Always stored as UTC; display and conversion helpers should convert
/// explicitly if local time is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Creates a [`Timestamp`] from whole seconds since the Unix epoch.
    ///
    /// Out-of-range values saturate to the epoch.
    pub fn from_unix_secs(secs: i64) -> Self {
        Self(Utc.timestamp_opt(secs, 0).single().unwrap_or_default())
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    pub fn unix_secs(self) -> i64 {
        self.0.timestamp()
    }

    /// The UTC calendar day this timestamp falls on.
    pub fn date(self) -> NaiveDate {
        self.0.date_naive()
    }

    /// This timestamp shifted forward by `by`. Saturates on overflow.
    pub fn plus(self, by: Duration) -> Self {
        chrono::Duration::from_std(by)
            .ok()
            .and_then(|d| self.0.checked_add_signed(d))
            .map(Self)
            .unwrap_or(Self(DateTime::<Utc>::MAX_UTC))
    }

    /// This timestamp shifted backward by `by`. Saturates on overflow.
    pub fn minus(self, by: Duration) -> Self {
        chrono::Duration::from_std(by)
            .ok()
            .and_then(|d| self.0.checked_sub_signed(d))
            .map(Self)
            .unwrap_or(Self(DateTime::<Utc>::MIN_UTC))
    }

    /// Elapsed time from `earlier` to `self`, or zero if `earlier` is later.
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        (self.0 - earlier.0).to_std().unwrap_or(Duration::ZERO)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_clamps_into_range() {
        assert_eq!(Score::clamped(150).value(), 100);
        assert_eq!(Score::clamped(-3).value(), 0);
        assert_eq!(Score::clamped(42).value(), 42);
    }

    #[test]
    fn confidence_clamps_and_rejects_nan() {
        assert_eq!(Confidence::clamped(1.7).value(), 1.0);
        assert_eq!(Confidence::clamped(-0.2).value(), 0.0);
        assert_eq!(Confidence::clamped(f64::NAN).value(), 0.0);
        assert_eq!(Confidence::clamped(0.25).value(), 0.25);
    }

    #[test]
    fn rate_period_windows() {
        assert_eq!(RatePeriod::Hourly.window(), Duration::from_secs(3600));
        assert_eq!(RatePeriod::Daily.window(), Duration::from_secs(86400));
        assert_eq!("Daily".parse::<RatePeriod>(), Ok(RatePeriod::Daily));
        assert!("weekly".parse::<RatePeriod>().is_err());
    }

    #[test]
    fn shifts_saturate_at_the_representable_range() {
        let t = Timestamp::from_unix_secs(1_700_000_000);
        let far = Duration::from_secs(u64::from(u32::MAX) * 3_600);
        assert_eq!(t.plus(far).as_datetime(), DateTime::<Utc>::MAX_UTC);
        assert_eq!(t.minus(far).as_datetime(), DateTime::<Utc>::MIN_UTC);
        assert_eq!(t.plus(Duration::from_secs(60)).unix_secs(), 1_700_000_060);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let ctx = ClientContext::default().with_header("X-Forwarded-For", "198.51.100.4");
        assert_eq!(ctx.header("x-forwarded-for"), Some("198.51.100.4"));
        assert_eq!(ctx.header("cf-connecting-ip"), None);
    }

    #[test]
    fn timestamp_arithmetic() {
        let t = Timestamp::from_unix_secs(1_700_000_000);
        let later = t.plus(Duration::from_secs(90));
        assert_eq!(later.unix_secs(), 1_700_000_090);
        assert_eq!(later.duration_since(t), Duration::from_secs(90));
        assert_eq!(t.duration_since(later), Duration::ZERO);
        assert_eq!(later.minus(Duration::from_secs(90)), t);
    }
}
