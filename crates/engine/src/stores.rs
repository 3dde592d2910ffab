//! In-memory shared state.
//!
//! This module contains the only mutable shared state in the engine: the
//! multi-window quota tracker and the inbox poll cache. Both are backed by
//! sharded concurrent maps, so unrelated keys never contend on a single
//! global lock, and neither performs I/O while a shard lock is held.
//!
//! ## Stores
//!
//! - **quota** - Rolling minute/hour/day admission counters per (key, action)
//! - **inbox_cache** - TTL'd snapshots of the last successful inbox poll
//!
//! Durable state lives behind the `ResourceStore` capability in `repos`.

mod inbox_cache;
mod quota;

pub use inbox_cache::{CachedInboxSnapshot, InboxPollCache};
pub use quota::{QuotaDecision, QuotaTracker};
