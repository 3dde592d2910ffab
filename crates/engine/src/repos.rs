//! Durable persistence capability.
//!
//! The engine consumes persistence through the [`ResourceStore`] trait; the
//! backing engine is an external concern. Two implementations ship here:
//!
//! - **postgres** - production backend (sqlx, row-level atomicity)
//! - **memory** - lock-protected maps, used by concurrency tests and
//!   lightweight embedders
//!
//! The store owns no business logic. It does guarantee that email insertion
//! is atomic and uniqueness-checked among active records, and that the expiry
//! sweep never loses a concurrent update.

mod memory;
mod postgres;

pub use memory::MemoryResourceStore;
pub use postgres::PgResourceStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{EmailId, EphemeralEmail, User, UserId};

/// Key/value persistence for users, ephemeral email records, and counters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Insert or fully replace a user record.
    async fn upsert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Refresh `last_active_at` without touching anything else.
    async fn touch_user(&self, id: UserId, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Insert a new email record and bump the owner's `email_count` in one
    /// atomic step. Fails with [`StoreError::DuplicateAddress`] when the
    /// address collides with an existing **active** record.
    async fn insert_email(&self, email: &EphemeralEmail) -> Result<(), StoreError>;

    async fn get_email(&self, id: EmailId) -> Result<Option<EphemeralEmail>, StoreError>;

    /// Latest record carrying the address, active or not.
    async fn get_email_by_address(
        &self,
        address: &str,
    ) -> Result<Option<EphemeralEmail>, StoreError>;

    /// Active emails for a user, ordered `created_at` descending then `id`
    /// descending.
    async fn list_active_emails(&self, owner: UserId) -> Result<Vec<EphemeralEmail>, StoreError>;

    /// First entry of [`ResourceStore::list_active_emails`]; the tie-break is
    /// part of the contract, not incidental ordering.
    async fn get_most_recent_active_email(
        &self,
        owner: UserId,
    ) -> Result<Option<EphemeralEmail>, StoreError>;

    async fn count_active_emails(&self, owner: UserId) -> Result<usize, StoreError>;

    /// Record the result of a successful upstream poll.
    async fn update_message_count(
        &self,
        id: EmailId,
        count: i64,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Explicit deactivation (user deletion). Idempotent: returns `true`
    /// only when the record transitioned active -> inactive in this call, in
    /// which case the owner's `email_count` is decremented. Deactivating an
    /// already-inactive record is a no-op success.
    async fn deactivate_email(&self, id: EmailId) -> Result<bool, StoreError>;

    /// Deactivate up to `batch` active emails whose `expires_at <= now`,
    /// returning the affected ids (oldest deadline first). Does not change
    /// any `email_count`. Safe to call concurrently with reads and writes.
    async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        batch: u32,
    ) -> Result<Vec<EmailId>, StoreError>;
}
