//! Multi-window rate limiting.
//!
//! Answers "may this key perform this action now?" and records the event in
//! the same atomic step. Three nested rolling windows (minute/hour/day) are
//! checked; an action is admitted only when all of them are under their
//! ceiling. Ceilings are supplied by the caller on every check, so a
//! hot-reloaded policy takes effect on the next call without any counter
//! reset.

use std::collections::VecDeque;
use std::hash::Hash;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::policy::{ActionKind, WindowCeilings};

/// The three nested quota windows, tightest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowKind {
    Minute,
    Hour,
    Day,
}

impl WindowKind {
    const ALL: [WindowKind; 3] = [WindowKind::Minute, WindowKind::Hour, WindowKind::Day];

    fn length(self) -> chrono::Duration {
        match self {
            WindowKind::Minute => chrono::Duration::minutes(1),
            WindowKind::Hour => chrono::Duration::hours(1),
            WindowKind::Day => chrono::Duration::days(1),
        }
    }

    fn ceiling(self, ceilings: &WindowCeilings) -> u32 {
        match self {
            WindowKind::Minute => ceilings.per_minute,
            WindowKind::Hour => ceilings.per_hour,
            WindowKind::Day => ceilings.per_day,
        }
    }
}

/// Result of a quota check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    /// Admitted; carries the recorded event count in the trailing day.
    Allowed(u32),
    /// Rejected. `retry_after` is the time until the oldest event in the
    /// tightest exceeded window leaves that window; zero means "try again
    /// soon".
    Limited { retry_after: Duration },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed(_))
    }
}

/// Sliding-window event tracker keyed by an identity and an action kind.
///
/// The identity type is generic so one instance can be keyed by user id and a
/// second, independent instance by network origin. Per-key event logs live in
/// a sharded map; a check-and-consume holds exactly one shard guard for the
/// duration of the step, which serializes concurrent calls on the same key
/// and makes admission linearizable per key.
#[derive(Debug)]
pub struct QuotaTracker<K: Eq + Hash> {
    events: DashMap<(K, ActionKind), VecDeque<DateTime<Utc>>>,
}

impl<K: Eq + Hash + Clone> QuotaTracker<K> {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
        }
    }

    /// Check all windows and, if admitted, record the event at `now`.
    /// Check-and-record is one atomic step: there is no interleaving in
    /// which two callers both observe "under ceiling" for the last slot.
    ///
    /// Events older than the day window are dropped lazily on each access.
    pub fn check_and_consume(
        &self,
        key: K,
        action: ActionKind,
        ceilings: &WindowCeilings,
        now: DateTime<Utc>,
    ) -> QuotaDecision {
        let mut entry = self.events.entry((key, action)).or_default();
        let log = entry.value_mut();

        let day_floor = now - WindowKind::Day.length();
        while log.front().is_some_and(|t| *t <= day_floor) {
            log.pop_front();
        }

        for window in WindowKind::ALL {
            let floor = now - window.length();
            // The log is time-ordered, so events inside the window form a
            // suffix.
            let count = log.iter().rev().take_while(|t| **t > floor).count() as u32;
            if count >= window.ceiling(ceilings) {
                // A zero ceiling means the action is not permitted at all;
                // there is no event to wait out, so the hint degrades to 0.
                let retry_after = log
                    .iter()
                    .find(|t| **t > floor)
                    .map(|t| (*t + window.length() - now).to_std().unwrap_or_default())
                    .unwrap_or_default();
                return QuotaDecision::Limited { retry_after };
            }
        }

        log.push_back(now);
        QuotaDecision::Allowed(log.len() as u32)
    }

    /// Administrative reset for one action, or all actions of a key.
    pub fn reset(&self, key: &K, action: Option<ActionKind>) {
        match action {
            Some(action) => {
                self.events.remove(&(key.clone(), action));
            }
            None => {
                self.events.retain(|(k, _), _| k != key);
            }
        }
    }

    /// Drop events older than the day window across all keys and evict keys
    /// that become empty. Locks one shard at a time, never the whole map.
    /// Returns the number of dropped events.
    pub fn compact(&self, now: DateTime<Utc>) -> usize {
        let floor = now - WindowKind::Day.length();
        let mut removed = 0;
        self.events.retain(|_, log| {
            let before = log.len();
            while log.front().is_some_and(|t| *t <= floor) {
                log.pop_front();
            }
            removed += before - log.len();
            !log.is_empty()
        });
        removed
    }

    /// Number of tracked (key, action) pairs.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for QuotaTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}
