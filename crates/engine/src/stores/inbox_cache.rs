//! Inbox poll cache.
//!
//! Remembers the last successful poll result per email for a short TTL so
//! repeated inbox checks do not hammer the remote provider. The cache is
//! passive: it never calls the provider itself, it is consulted and
//! populated by the session manager.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::models::{EmailId, MessageSummary};

/// Snapshot of the most recent successful poll of one mailbox.
/// Derived state only, never persisted.
#[derive(Debug, Clone)]
pub struct CachedInboxSnapshot {
    pub messages: Vec<MessageSummary>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Bounded, TTL-based snapshot cache with oldest-fetch-first eviction.
///
/// Overwrites are unconditional (the provider is authoritative for the full
/// message list each time, so there are no merge semantics). When the entry
/// count exceeds the configured capacity, the least-recently-fetched tranche
/// is evicted so hot mailboxes stay resident.
#[derive(Debug)]
pub struct InboxPollCache {
    entries: DashMap<EmailId, CachedInboxSnapshot>,
    capacity: usize,
    ttl: chrono::Duration,
}

impl InboxPollCache {
    pub fn new(capacity: usize, ttl: chrono::Duration) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity),
            capacity,
            ttl,
        }
    }

    /// Returns the snapshot only while it is fresh. An expired entry is
    /// removed on the way out.
    pub fn get(&self, email_id: EmailId, now: DateTime<Utc>) -> Option<CachedInboxSnapshot> {
        let fresh = match self.entries.get(&email_id) {
            Some(entry) if now < entry.expires_at => Some(entry.value().clone()),
            Some(_) => None,
            None => return None,
        };
        if fresh.is_none() {
            self.entries.remove(&email_id);
        }
        fresh
    }

    /// Stores a new snapshot, unconditionally replacing any prior one for
    /// the same email (last writer wins).
    pub fn put(&self, email_id: EmailId, messages: Vec<MessageSummary>, now: DateTime<Utc>) {
        self.evict_if_full(now);
        self.entries.insert(
            email_id,
            CachedInboxSnapshot {
                messages,
                fetched_at: now,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Drops the snapshot for a deactivated email so a dead resource can
    /// never be served from cache. Returns whether an entry existed.
    pub fn invalidate(&self, email_id: EmailId) -> bool {
        self.entries.remove(&email_id).is_some()
    }

    /// Removes expired entries across all shards, one shard lock at a time.
    /// Returns the number of dropped entries.
    pub fn compact(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, snap| now < snap.expires_at);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_if_full(&self, now: DateTime<Utc>) {
        if self.entries.len() < self.capacity {
            return;
        }

        // Expired entries go first; only then sacrifice live ones.
        self.entries.retain(|_, snap| now < snap.expires_at);
        if self.entries.len() < self.capacity {
            return;
        }

        let mut by_fetch: Vec<(EmailId, DateTime<Utc>)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().fetched_at))
            .collect();
        by_fetch.sort_by_key(|(_, fetched_at)| *fetched_at);

        let evict = (self.capacity / 10).max(1);
        for (email_id, _) in by_fetch.into_iter().take(evict) {
            self.entries.remove(&email_id);
        }
    }
}
