//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example, a
//! [`WorkerName`] with a [`ClientHash`] even though both are strings under the
//! hood.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::Capability;

// ---------------------------------------------------------------------------
// Worker names
// ---------------------------------------------------------------------------

/// Identifies an external worker by its configured key (e.g. `"seo_analyzer"`).
///
/// Names are normalised on construction: surrounding whitespace is trimmed,
/// ASCII letters are lower-cased and `-` becomes `_`, so `"SEO-Analyzer"` and
/// `"seo_analyzer"` address the same worker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkerName(String);

impl WorkerName {
    /// Creates a normalised worker name.
    ///
    /// Returns `None` if the value is empty after trimming or contains
    /// characters other than ASCII alphanumerics, `_` and `-`.
    pub fn new(value: impl AsRef<str>) -> Option<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return None;
        }
        let mut normalised = String::with_capacity(trimmed.len());
        for c in trimmed.chars() {
            match c {
                'a'..='z' | '0'..='9' | '_' => normalised.push(c),
                'A'..='Z' => normalised.push(c.to_ascii_lowercase()),
                '-' => normalised.push('_'),
                _ => return None,
            }
        }
        Some(Self(normalised))
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Capability> for WorkerName {
    fn from(capability: Capability) -> Self {
        Self(capability.worker_name().to_string())
    }
}

impl TryFrom<String> for WorkerName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value).ok_or_else(|| format!("invalid worker name '{value}'"))
    }
}

impl From<WorkerName> for String {
    fn from(name: WorkerName) -> Self {
        name.0
    }
}

impl std::fmt::Display for WorkerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Client identity
// ---------------------------------------------------------------------------

/// SHA-256 digest of a client IP address, hex encoded.
///
/// Usage events and per-client rate windows never store the raw address; they
/// are keyed by this hash instead.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientHash(String);

impl ClientHash {
    const HEX_LEN: usize = 64;

    /// Hashes a client address.
    pub fn of(ip: &IpAddr) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(ip.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Parses a previously rendered hash.
    ///
    /// Returns `None` unless `value` is exactly 64 lower-case hex digits.
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == Self::HEX_LEN
            && value
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        valid.then(|| Self(value.to_string()))
    }

    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ClientHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| "client hash must be 64 lower-case hex digits".to_string())
    }
}

impl From<ClientHash> for String {
    fn from(hash: ClientHash) -> Self {
        hash.0
    }
}

impl std::fmt::Display for ClientHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single orchestrated worker invocation.
///
/// Generated fresh for every call to the orchestrator and attached to its
/// tracing span so retries, admission decisions and the analytics record of
/// one call can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(Uuid);

impl InvocationId {
    /// Generates a new random invocation identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_names_are_normalised() {
        let name = WorkerName::new("  SEO-Analyzer ").unwrap();
        assert_eq!(name.as_str(), "seo_analyzer");
        assert_eq!(name, WorkerName::new("seo_analyzer").unwrap());
    }

    #[test]
    fn worker_names_reject_empty_and_foreign_characters() {
        assert!(WorkerName::new("   ").is_none());
        assert!(WorkerName::new("seo analyzer").is_none());
        assert!(WorkerName::new("seo/analyzer").is_none());
    }

    #[test]
    fn client_hash_is_stable_and_parseable() {
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        let first = ClientHash::of(&ip);
        let second = ClientHash::of(&ip);
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 64);
        assert_eq!(ClientHash::parse(first.as_str()), Some(first));
    }

    #[test]
    fn client_hash_parse_rejects_malformed_digests() {
        assert!(ClientHash::parse("abc").is_none());
        assert!(ClientHash::parse(&"G".repeat(64)).is_none());
        assert!(ClientHash::parse(&"A".repeat(64)).is_none());
    }
}
