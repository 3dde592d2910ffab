use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Opaque numeric user identity supplied by the calling chat layer.
pub type UserId = i64;

/// Identifier for an ephemeral email record.
///
/// Derived from the creation instant and the owner so that ids are roughly
/// time-ordered and collision-free without a round trip to the store:
///
/// ```text
/// | 41 bits: ms since 2024-01-01 | 12 bits: owner (low) | 10 bits: sequence |
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct EmailId(pub i64);

/// Custom epoch: 2024-01-01 00:00:00 UTC, in milliseconds since the Unix epoch.
const EPOCH_MS: i64 = 1_704_067_200_000;

const OWNER_BITS: u32 = 12;
const SEQUENCE_BITS: u32 = 10;
const OWNER_MASK: u64 = (1 << OWNER_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Process-wide sequence counter; wraps within the 10-bit field.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl EmailId {
    /// Generates an id for an email owned by `owner` created at `created_at`.
    ///
    /// Two emails created by the same owner in the same millisecond are still
    /// distinguished by the sequence field.
    pub fn generate(owner: UserId, created_at: DateTime<Utc>) -> Self {
        let ts = (created_at.timestamp_millis() - EPOCH_MS).max(0) as u64;
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) & SEQUENCE_MASK;
        let owner_bits = (owner as u64) & OWNER_MASK;
        Self(((ts << (OWNER_BITS + SEQUENCE_BITS)) | (owner_bits << SEQUENCE_BITS) | seq) as i64)
    }
}

impl std::fmt::Display for EmailId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-user role, controls quota ceilings and capacity limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Standard,
    Privileged,
    Admin,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Counter of created ephemeral emails. Incremented on every create,
    /// decremented only on explicit deletion, never on expiry.
    pub email_count: i64,
}

impl User {
    /// Default record created on first contact.
    pub fn first_contact(id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            role: Role::Standard,
            created_at: now,
            last_active_at: now,
            email_count: 0,
        }
    }
}

/// A disposable email identity owned by exactly one user.
///
/// Transitions `active = true -> false` exactly once (expiry sweep or explicit
/// deletion) and is never reactivated. The record survives deactivation for
/// audit.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EphemeralEmail {
    pub id: EmailId,
    pub owner_id: UserId,
    pub address: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    /// Last message count observed from an actual upstream fetch.
    pub message_count: i64,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl EphemeralEmail {
    pub fn new(
        owner_id: UserId,
        address: String,
        created_at: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            id: EmailId::generate(owner_id, created_at),
            owner_id,
            address,
            created_at,
            expires_at: created_at + ttl,
            active: true,
            message_count: 0,
            last_checked_at: None,
        }
    }

    /// An email is expired once past its deadline, even if the sweep has not
    /// flipped the `active` flag yet.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.active || now >= self.expires_at
    }
}

/// Summary of one remote message, as listed by the mailbox provider.
/// Order within a snapshot is the provider's response order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: i64,
    pub from: String,
    pub subject: String,
    pub received_at: Option<DateTime<Utc>>,
}

/// Full message content, fetched on demand and never cached (bodies are
/// immutable once delivered).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub id: i64,
    pub from: String,
    pub subject: String,
    pub received_at: Option<DateTime<Utc>>,
    pub text: String,
    pub html: Option<String>,
}

/// Per-user usage summary served to the chat layer's stats screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStats {
    pub user: User,
    pub active_emails: usize,
    pub most_recent: Option<EphemeralEmail>,
}
