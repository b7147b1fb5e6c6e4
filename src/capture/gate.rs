// src/capture/gate.rs
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;

use super::types::Fingerprint;

pub const DEFAULT_DEDUP_WINDOW_MS: i64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    InProgress,
    RecentlyProcessed { elapsed_ms: i64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::InProgress => f.write_str("in progress"),
            Rejection::RecentlyProcessed { elapsed_ms } => {
                write!(f, "recently processed, elapsed={elapsed_ms}ms")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Reject(Rejection),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allow)
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            Admission::Allow => None,
            Admission::Reject(r) => Some(r.to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct DedupState {
    active: HashSet<Fingerprint>,
    recent: HashMap<Fingerprint, DateTime<Utc>>,
}

impl DedupState {
    fn evict_expired(&mut self, now: DateTime<Utc>, window: ChronoDuration) {
        self.recent
            .retain(|_, seen| now.signed_duration_since(*seen) < window);
    }

    fn check(&self, fp: &Fingerprint, now: DateTime<Utc>) -> Admission {
        if self.active.contains(fp) {
            return Admission::Reject(Rejection::InProgress);
        }
        if let Some(seen) = self.recent.get(fp) {
            let elapsed_ms = now.signed_duration_since(*seen).num_milliseconds();
            return Admission::Reject(Rejection::RecentlyProcessed { elapsed_ms });
        }
        Admission::Allow
    }
}

/// In-flight + recently-seen gate.
///
/// - A fingerprint that is active is refused.
/// - A fingerprint seen less than `window` ago is refused.
/// - Expired entries are purged on every admission check (no background timer).
///
/// All state changes happen inside one lock, so `try_begin` is an atomic
/// check-then-mark.
#[derive(Debug)]
pub struct FingerprintGate {
    window: ChronoDuration,
    state: Mutex<DedupState>,
}

impl Default for FingerprintGate {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW_MS)
    }
}

impl FingerprintGate {
    /// `window_ms` < 0 is treated as 0 (no recency window).
    pub fn new(window_ms: i64) -> Self {
        Self {
            window: ChronoDuration::milliseconds(window_ms.max(0)),
            state: Mutex::new(DedupState::default()),
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window.num_milliseconds()
    }

    /// Check admission at `now`. Purges expired entries, does not mark anything.
    pub fn admit(&self, fp: &Fingerprint, now: DateTime<Utc>) -> Admission {
        let mut st = self.state.lock();
        st.evict_expired(now, self.window);
        st.check(fp, now)
    }

    pub fn record_seen(&self, fp: &Fingerprint, at: DateTime<Utc>) {
        self.state.lock().recent.insert(fp.clone(), at);
    }

    pub fn begin_active(&self, fp: &Fingerprint) {
        self.state.lock().active.insert(fp.clone());
    }

    pub fn end_active(&self, fp: &Fingerprint) {
        self.state.lock().active.remove(fp);
    }

    /// Admit and mark active in one step. The returned guard clears the
    /// active marker when dropped, on every exit path.
    pub fn try_begin(
        &self,
        fp: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<ActiveGuard<'_>, Rejection> {
        let mut st = self.state.lock();
        st.evict_expired(now, self.window);
        match st.check(fp, now) {
            Admission::Allow => {
                st.active.insert(fp.clone());
                Ok(ActiveGuard {
                    gate: self,
                    fp: fp.clone(),
                })
            }
            Admission::Reject(r) => Err(r),
        }
    }

    pub fn is_active(&self, fp: &Fingerprint) -> bool {
        self.state.lock().active.contains(fp)
    }

    pub fn is_recent(&self, fp: &Fingerprint) -> bool {
        self.state.lock().recent.contains_key(fp)
    }

    pub fn recent_len(&self) -> usize {
        self.state.lock().recent.len()
    }
}

/// Scoped active marker returned by [`FingerprintGate::try_begin`].
#[derive(Debug)]
pub struct ActiveGuard<'a> {
    gate: &'a FingerprintGate,
    fp: Fingerprint,
}

impl ActiveGuard<'_> {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fp
    }

    /// Remember the fingerprint as processed; it stays active until the guard drops.
    pub fn mark_seen(&self, at: DateTime<Utc>) {
        self.gate.record_seen(&self.fp, at);
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.gate.end_active(&self.fp);
    }
}
