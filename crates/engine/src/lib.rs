//! Ephemeral email session engine.
//!
//! Issues short-lived, disposable email identities to chat users, serves
//! inbox checks through a short-TTL poll cache, and enforces multi-window
//! usage quotas across many concurrent callers. The chat surface, admin UI,
//! and persistence engine are external collaborators: callers arrive
//! pre-identified by an opaque numeric user id, persistence is consumed
//! through the [`ResourceStore`] capability, and the remote mailbox API
//! through [`EmailProvider`].
//!
//! [`SessionManager`] is the facade; everything else supports it.

pub mod config;
pub mod error;
pub mod maintenance;
pub mod models;
pub mod policy;
pub mod repos;
pub mod services;
pub mod stores;
#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use error::{ProviderError, SessionError, StoreError};
pub use models::{
    EmailId, EphemeralEmail, MessageBody, MessageSummary, Role, User, UserId, UserStats,
};
pub use policy::{
    ActionKind, ModePolicy, OperatingMode, PolicyHandle, RoleLimits, WindowCeilings,
};
pub use repos::{MemoryResourceStore, PgResourceStore, ResourceStore};
pub use services::{EmailProvider, HttpEmailProvider, SessionManager};
pub use stores::{CachedInboxSnapshot, InboxPollCache, QuotaDecision, QuotaTracker};
