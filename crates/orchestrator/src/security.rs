//! Client address resolution, allow/deny lists and violation tracking.
//!
//! The blacklist is consulted before any rate-limit bookkeeping so a blocked
//! client never consumes quota. Blocks may carry an expiry; expired entries are
//! dropped lazily on lookup and eagerly by [`SecurityGuard::cleanup_expired_blocks`].
//!
//! Every denied admission is recorded as a [`Violation`]. Repeated violations
//! from one address within an hour first raise an alert (a `warn` event) and
//! then block the address automatically.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use domain::{
    ClientContext, Clock, EntryKind, SecurityEntry, SecuritySettings, Severity, Timestamp,
    Violation,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// Proxy headers consulted for the client address, in priority order.
pub const CLIENT_IP_HEADERS: [&str; 6] = [
    "cf-connecting-ip",
    "x-forwarded-for",
    "x-forwarded",
    "x-cluster-client-ip",
    "forwarded-for",
    "forwarded",
];

const HOUR: Duration = Duration::from_secs(3_600);
const DAY: Duration = Duration::from_secs(86_400);
/// Blocks longer than a century are stored as permanent.
pub const MAX_BLOCK_HOURS: u32 = 100 * 365 * 24;

/// Failures of the block and whitelist operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecurityError {
    #[error("invalid security settings: {0}")]
    InvalidSettings(String),
    #[error("{0} is not blocked")]
    NotBlocked(IpAddr),
    #[error("{0} is not whitelisted")]
    NotWhitelisted(IpAddr),
    #[error("persisted entry for {0} is not a blacklist or whitelist entry")]
    InvalidEntry(IpAddr),
}

/// What recording a violation led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationOutcome {
    pub violation: Violation,
    /// Violations from the same address within the last hour, this one included.
    pub recent_count: usize,
    pub alert: bool,
    pub auto_blocked: bool,
}

/// Violations of one address over a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViolationSummary {
    pub ip: IpAddr,
    pub count: usize,
    pub workers: Vec<String>,
    pub last_violation: Timestamp,
    pub severity: Severity,
    pub blocked: bool,
}

/// Block list, whitelist and violation log, keyed by client address.
pub struct SecurityGuard {
    clock: Arc<dyn Clock>,
    settings: SecuritySettings,
    blacklist: RwLock<HashMap<IpAddr, SecurityEntry>>,
    whitelist: RwLock<HashMap<IpAddr, SecurityEntry>>,
    violations: Mutex<VecDeque<Violation>>,
}

impl std::fmt::Debug for SecurityGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityGuard")
            .field("settings", &self.settings)
            .field("blacklist", &self.blacklist.read().len())
            .field("whitelist", &self.whitelist.read().len())
            .field("violations", &self.violations.lock().len())
            .finish()
    }
}

impl SecurityGuard {
    /// Fails when `settings` do not validate.
    pub fn new(settings: SecuritySettings, clock: Arc<dyn Clock>) -> Result<Self, SecurityError> {
        settings.validate().map_err(SecurityError::InvalidSettings)?;
        Ok(Self {
            clock,
            settings,
            blacklist: RwLock::new(HashMap::new()),
            whitelist: RwLock::new(HashMap::new()),
            violations: Mutex::new(VecDeque::new()),
        })
    }

    pub fn settings(&self) -> &SecuritySettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Client address
    // -----------------------------------------------------------------------

    /// The effective client address of a request.
    ///
    /// The first proxy header whose leading entry parses as a usable address
    /// wins; otherwise the peer address; otherwise loopback.
    pub fn resolve_client_ip(&self, ctx: &ClientContext) -> IpAddr {
        CLIENT_IP_HEADERS
            .iter()
            .filter_map(|name| {
                let value = ctx.header(name)?;
                let first = value.split(',').next()?;
                if *name == "forwarded" {
                    forwarded_for(first)
                } else {
                    parse_address(first)
                }
            })
            .find(|ip| is_usable(*ip))
            .or(ctx.peer_addr)
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    // -----------------------------------------------------------------------
    // Blacklist
    // -----------------------------------------------------------------------

    /// The live block on `ip`, if any. An expired block is removed here.
    pub fn blocked_entry(&self, ip: &IpAddr) -> Option<SecurityEntry> {
        let now = self.clock.now();
        let entry = self.blacklist.read().get(ip).cloned()?;
        if !entry.is_expired(now) {
            return Some(entry);
        }
        let mut blacklist = self.blacklist.write();
        if blacklist.get(ip).is_some_and(|e| e.is_expired(now)) {
            blacklist.remove(ip);
            info!(%ip, "block expired");
        }
        None
    }

    /// Whether `ip` has a live block.
    pub fn is_blocked(&self, ip: &IpAddr) -> bool {
        self.blocked_entry(ip).is_some()
    }

    /// Blocks `ip` for `duration_hours`, or permanently when that is zero.
    /// Re-blocking replaces the previous entry.
    pub fn block(&self, ip: IpAddr, reason: &str, duration_hours: u32, added_by: &str) -> SecurityEntry {
        let now = self.clock.now();
        let expires_at = (1..=MAX_BLOCK_HOURS)
            .contains(&duration_hours)
            .then(|| now.plus(HOUR * duration_hours));
        let entry = SecurityEntry {
            ip,
            kind: EntryKind::Blacklist,
            reason: reason.to_string(),
            added_by: added_by.to_string(),
            added_at: now,
            expires_at,
        };
        self.blacklist.write().insert(ip, entry.clone());
        warn!(%ip, reason, duration_hours, added_by, "client blocked");
        entry
    }

    /// Removes the block on `ip`, live or expired.
    pub fn unblock(&self, ip: &IpAddr) -> Result<SecurityEntry, SecurityError> {
        let removed = self
            .blacklist
            .write()
            .remove(ip)
            .ok_or(SecurityError::NotBlocked(*ip))?;
        info!(%ip, "client unblocked");
        Ok(removed)
    }

    /// Live blocks, newest first.
    pub fn list_blocked(&self) -> Vec<SecurityEntry> {
        let now = self.clock.now();
        let mut entries: Vec<SecurityEntry> = self
            .blacklist
            .read()
            .values()
            .filter(|e| !e.is_expired(now))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.added_at.cmp(&a.added_at).then(a.ip.cmp(&b.ip)));
        entries
    }

    /// Removes expired blocks and returns how many went.
    pub fn cleanup_expired_blocks(&self) -> usize {
        let now = self.clock.now();
        let mut blacklist = self.blacklist.write();
        let before = blacklist.len();
        blacklist.retain(|_, e| !e.is_expired(now));
        before - blacklist.len()
    }

    // -----------------------------------------------------------------------
    // Whitelist
    // -----------------------------------------------------------------------

    /// Whitelists `ip`, replacing any previous whitelist entry.
    pub fn allow(&self, ip: IpAddr, reason: &str, added_by: &str) -> SecurityEntry {
        let entry = SecurityEntry {
            ip,
            kind: EntryKind::Whitelist,
            reason: reason.to_string(),
            added_by: added_by.to_string(),
            added_at: self.clock.now(),
            expires_at: None,
        };
        self.whitelist.write().insert(ip, entry.clone());
        info!(%ip, reason, "client whitelisted");
        entry
    }

    /// Removes `ip` from the whitelist.
    pub fn disallow(&self, ip: &IpAddr) -> Result<SecurityEntry, SecurityError> {
        let removed = self
            .whitelist
            .write()
            .remove(ip)
            .ok_or(SecurityError::NotWhitelisted(*ip))?;
        info!(%ip, "client removed from whitelist");
        Ok(removed)
    }

    pub fn is_whitelisted(&self, ip: &IpAddr) -> bool {
        self.whitelist.read().contains_key(ip)
    }

    /// Whitelist entries, newest first.
    pub fn list_allowed(&self) -> Vec<SecurityEntry> {
        let mut entries: Vec<SecurityEntry> = self.whitelist.read().values().cloned().collect();
        entries.sort_by(|a, b| a.ip.cmp(&b.ip));
        entries
    }

    // -----------------------------------------------------------------------
    // Violations
    // -----------------------------------------------------------------------

    /// Appends a violation and applies the alert and auto-block thresholds.
    pub fn record_violation(
        &self,
        worker: &str,
        ip: IpAddr,
        requests_count: u32,
        limit: u32,
    ) -> ViolationOutcome {
        let now = self.clock.now();
        let violation = Violation {
            worker: worker.to_string(),
            ip,
            timestamp: now,
            requests_count,
            limit,
            severity: Severity::from_ratio(requests_count, limit),
        };

        let recent_count = {
            let mut violations = self.violations.lock();
            violations.push_back(violation.clone());
            while violations.len() > self.settings.max_violations {
                violations.pop_front();
            }
            let since = now.minus(HOUR);
            violations
                .iter()
                .filter(|v| v.ip == ip && v.timestamp >= since)
                .count()
        };

        warn!(
            worker,
            %ip,
            requests_count,
            limit,
            severity = ?violation.severity,
            "rate limit violation"
        );

        let alert = recent_count >= self.settings.violation_alert_threshold as usize;
        if alert {
            warn!(%ip, recent_count, "security alert: repeated rate limit violations");
        }

        let auto_blocked = recent_count >= self.settings.auto_block_threshold as usize
            && !self.is_blocked(&ip);
        if auto_blocked {
            self.block(
                ip,
                "Automatic block: repeated rate limit violations",
                self.settings.auto_block_hours,
                "system",
            );
        }

        ViolationOutcome {
            violation,
            recent_count,
            alert,
            auto_blocked,
        }
    }

    /// Removes violations older than `older_than_days`.
    pub fn cleanup_violations(&self, older_than_days: u32) -> usize {
        let cutoff = self.clock.now().minus(DAY * older_than_days);
        let mut violations = self.violations.lock();
        let before = violations.len();
        violations.retain(|v| v.timestamp >= cutoff);
        before - violations.len()
    }

    /// Applies the configured violation retention.
    pub fn prune_violations(&self) -> usize {
        self.cleanup_violations(self.settings.violation_retention_days)
    }

    /// Violations of the last `period_hours`, grouped by address, busiest first.
    pub fn violations_summary(&self, period_hours: u32) -> Vec<ViolationSummary> {
        let since = self.clock.now().minus(HOUR * period_hours);
        let mut grouped: BTreeMap<IpAddr, (usize, BTreeSet<String>, Timestamp)> = BTreeMap::new();
        for v in self.violations.lock().iter().filter(|v| v.timestamp >= since) {
            let group = grouped
                .entry(v.ip)
                .or_insert_with(|| (0, BTreeSet::new(), v.timestamp));
            group.0 += 1;
            group.1.insert(v.worker.clone());
            group.2 = group.2.max(v.timestamp);
        }

        let mut summary: Vec<ViolationSummary> = grouped
            .into_iter()
            .map(|(ip, (count, workers, last_violation))| ViolationSummary {
                ip,
                count,
                workers: workers.into_iter().collect(),
                last_violation,
                severity: Severity::from_violation_count(count),
                blocked: self.is_blocked(&ip),
            })
            .collect();
        summary.sort_by(|a, b| b.count.cmp(&a.count).then(a.ip.cmp(&b.ip)));
        summary
    }

    /// Violation count and distinct addresses over the last `period_hours`.
    pub fn recent_violation_stats(&self, period_hours: u32) -> (usize, usize) {
        let since = self.clock.now().minus(HOUR * period_hours);
        let violations = self.violations.lock();
        let recent: Vec<&Violation> = violations.iter().filter(|v| v.timestamp >= since).collect();
        let distinct: BTreeSet<IpAddr> = recent.iter().map(|v| v.ip).collect();
        (recent.len(), distinct.len())
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Live blocks, whitelist entries and the violation log, for persisting.
    pub fn snapshot(&self) -> (Vec<SecurityEntry>, Vec<Violation>) {
        let mut entries = self.list_blocked();
        entries.extend(self.list_allowed());
        let violations = self.violations.lock().iter().cloned().collect();
        (entries, violations)
    }

    /// Replaces all entries and violations with persisted ones. Expired blocks
    /// are dropped and the log is trimmed to `max_violations`. A whitelist
    /// entry with an expiry rejects the whole set and leaves the guard as it was.
    pub fn restore(
        &self,
        entries: &[SecurityEntry],
        violations: &[Violation],
    ) -> Result<(), SecurityError> {
        let now = self.clock.now();
        let mut blacklist = HashMap::new();
        let mut whitelist = HashMap::new();
        for entry in entries {
            match entry.kind {
                EntryKind::Blacklist if !entry.is_expired(now) => {
                    blacklist.insert(entry.ip, entry.clone());
                }
                EntryKind::Blacklist => {}
                EntryKind::Whitelist => {
                    if entry.expires_at.is_some() {
                        return Err(SecurityError::InvalidEntry(entry.ip));
                    }
                    whitelist.insert(entry.ip, entry.clone());
                }
            }
        }

        let mut log: Vec<Violation> = violations.to_vec();
        log.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let overflow = log.len().saturating_sub(self.settings.max_violations);
        let log: VecDeque<Violation> = log.into_iter().skip(overflow).collect();

        *self.blacklist.write() = blacklist;
        *self.whitelist.write() = whitelist;
        *self.violations.lock() = log;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Header parsing
// ---------------------------------------------------------------------------

/// Parses `198.51.100.7`, `198.51.100.7:8080`, `2001:db8::1`, `[2001:db8::1]:443`,
/// optionally quoted.
fn parse_address(raw: &str) -> Option<IpAddr> {
    let token = raw.trim().trim_matches('"');
    if let Ok(ip) = token.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Some(rest) = token.strip_prefix('[') {
        let end = rest.find(']')?;
        return rest[..end].parse().ok();
    }
    token.parse::<SocketAddr>().ok().map(|s| s.ip())
}

/// Extracts the `for=` parameter of one `Forwarded` element.
fn forwarded_for(element: &str) -> Option<IpAddr> {
    element.split(';').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("for")
            .then(|| parse_address(value))
            .flatten()
    })
}

fn is_usable(ip: IpAddr) -> bool {
    !ip.is_unspecified() && !ip.is_multicast()
}
