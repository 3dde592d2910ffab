//! Error taxonomy for the session engine.
//!
//! Each layer returns its own typed error; `SessionManager` is the only place
//! that translates store/provider failures into caller-facing kinds. The
//! calling chat layer maps each kind to a localized message, so every variant
//! here must be matchable without string inspection.

use std::time::Duration;

use thiserror::Error;

/// Failures from the durable resource store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The address collides with an existing active email record. Always
    /// retried a bounded number of times inside `create_email`, never
    /// surfaced to callers.
    #[error("address already in use by an active email")]
    DuplicateAddress,

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

/// Failures from the remote mailbox provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status}")]
    Status { status: u16 },

    #[error("provider response malformed: {0}")]
    Malformed(String),

    /// The caller-supplied deadline elapsed before the provider responded.
    #[error("provider timed out")]
    Timeout,
}

/// Caller-facing error kinds for all `SessionManager` operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Too many actions in the current window. Expected and frequent; the
    /// caller should retry after the hint (0 means "try again soon").
    #[error("rate limited, retry in {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The user already holds the maximum number of active emails for their
    /// role. Recoverable by deleting an existing email.
    #[error("active email quota exceeded (max {max})")]
    QuotaExceeded { max: usize },

    /// Provider and local address generation both failed repeatedly.
    #[error("no email address could be allocated")]
    ResourceExhausted,

    /// The remote provider failed or timed out. Never swallowed into an
    /// empty-success result.
    #[error("mailbox provider unavailable")]
    UpstreamUnavailable {
        #[source]
        source: ProviderError,
    },

    #[error("email not found")]
    NotFound,

    #[error("email belongs to another user")]
    Forbidden,

    #[error("email has expired")]
    Expired,

    /// Internal store fault surfaced unchanged. Never carries
    /// [`StoreError::DuplicateAddress`], which is consumed by the create
    /// retry loop.
    #[error("storage failure")]
    Store(#[from] StoreError),
}
