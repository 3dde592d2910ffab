//! Session manager: the orchestration facade over the store, the quota
//! trackers, the poll cache, and the remote provider.
//!
//! All caller-facing operations live here, and this is the only layer that
//! translates store/provider failures into the caller-facing error kinds.
//!
//! Ordering contract: `create_email` checks the rate limit before the
//! active-email capacity, so a caller always sees `RateLimited` first when
//! both would reject.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{ProviderError, SessionError, StoreError};
use crate::models::{
    EmailId, EphemeralEmail, MessageBody, MessageSummary, Role, User, UserId, UserStats,
};
use crate::policy::{ActionKind, ModePolicy, PolicyHandle};
use crate::repos::ResourceStore;
use crate::services::provider::EmailProvider;
use crate::stores::{InboxPollCache, QuotaDecision, QuotaTracker};

pub struct SessionManager {
    store: Arc<dyn ResourceStore>,
    provider: Arc<dyn EmailProvider>,
    /// Primary admission gate, keyed by user id.
    user_quota: QuotaTracker<UserId>,
    /// Secondary gate keyed by network origin, with halved ceilings. Both
    /// gates must admit; the origin is checked first so a user event is only
    /// recorded once the origin gate has let the call through.
    origin_quota: QuotaTracker<String>,
    cache: InboxPollCache,
    policy: PolicyHandle,
    config: Config,
    /// Serializes capacity-check-then-insert per user so concurrent creates
    /// cannot overshoot `max_emails_per_user`. One lock per user, unrelated
    /// users never contend.
    create_locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        provider: Arc<dyn EmailProvider>,
        policy: ModePolicy,
        config: Config,
    ) -> Self {
        let cache = InboxPollCache::new(config.cache_capacity, config.cache_ttl());
        Self {
            store,
            provider,
            user_quota: QuotaTracker::new(),
            origin_quota: QuotaTracker::new(),
            cache,
            policy: PolicyHandle::new(policy),
            config,
            create_locks: DashMap::new(),
        }
    }

    /// Handle for administrative reads and hot reloads.
    pub fn policy(&self) -> &PolicyHandle {
        &self.policy
    }

    pub async fn create_email(
        &self,
        user_id: UserId,
        origin: Option<&str>,
    ) -> Result<EphemeralEmail, SessionError> {
        self.create_email_at(user_id, origin, Utc::now()).await
    }

    pub async fn create_email_at(
        &self,
        user_id: UserId,
        origin: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<EphemeralEmail, SessionError> {
        let user = self.load_or_create_user(user_id, now).await?;
        let policy = self.policy.load();

        // Rate limit first: it is the cheaper, more frequent rejection and
        // must not be masked by a capacity failure (and vice versa).
        self.admit(user_id, user.role, origin, ActionKind::CreateEmail, &policy, now)?;

        let lock = self.create_lock(user_id);
        let _guard = lock.lock().await;

        let max = policy.limits(user.role).max_emails_per_user;
        let active = self.store.count_active_emails(user_id).await?;
        if active >= max {
            tracing::info!(user_id, active, max, "active email capacity reached");
            return Err(SessionError::QuotaExceeded { max });
        }

        for attempt in 0..self.config.create_attempts {
            let address = if attempt == 0 {
                match self.with_deadline(self.provider.generate_address()).await {
                    Ok(address) => address,
                    Err(err) => {
                        tracing::debug!(
                            user_id,
                            error = %err,
                            "provider address generation failed, synthesizing locally"
                        );
                        self.synthesize_address()
                    }
                }
            } else {
                self.synthesize_address()
            };

            let email = EphemeralEmail::new(user_id, address, now, self.config.email_ttl());
            match self.store.insert_email(&email).await {
                Ok(()) => {
                    tracing::info!(
                        user_id,
                        email_id = %email.id,
                        address = %email.address,
                        expires_at = %email.expires_at,
                        "ephemeral email created"
                    );
                    return Ok(email);
                }
                Err(StoreError::DuplicateAddress) => {
                    tracing::debug!(user_id, attempt, "address collision, regenerating");
                }
                Err(err) => {
                    tracing::error!(user_id, error = %err, "email insert failed");
                    return Err(err.into());
                }
            }
        }

        tracing::warn!(
            user_id,
            attempts = self.config.create_attempts,
            "address generation exhausted"
        );
        Err(SessionError::ResourceExhausted)
    }

    pub async fn check_inbox(
        &self,
        email_id: EmailId,
        requester_id: UserId,
        origin: Option<&str>,
    ) -> Result<Vec<MessageSummary>, SessionError> {
        self.check_inbox_at(email_id, requester_id, origin, Utc::now())
            .await
    }

    pub async fn check_inbox_at(
        &self,
        email_id: EmailId,
        requester_id: UserId,
        origin: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<MessageSummary>, SessionError> {
        let email = self.authorized_email(email_id, requester_id, now).await?;

        // Cache hits are free: no quota is consumed for the engine's own
        // caching decision, and the persisted record is not touched.
        if let Some(snapshot) = self.cache.get(email_id, now) {
            tracing::debug!(email_id = %email_id, "inbox served from cache");
            return Ok(snapshot.messages);
        }

        let role = self.requester_role(requester_id).await?;
        let policy = self.policy.load();
        self.admit(requester_id, role, origin, ActionKind::CheckInbox, &policy, now)?;

        // Quota stays consumed even when the fetch below fails or times
        // out; otherwise a slow provider would let retries bypass the
        // rate limit.
        let messages = self
            .with_deadline(self.provider.fetch_messages(&email.address))
            .await
            .map_err(|source| {
                tracing::warn!(email_id = %email_id, error = %source, "upstream poll failed");
                SessionError::UpstreamUnavailable { source }
            })?;

        self.cache.put(email_id, messages.clone(), now);
        self.store
            .update_message_count(email_id, messages.len() as i64, now)
            .await?;
        tracing::info!(email_id = %email_id, count = messages.len(), "inbox polled");
        Ok(messages)
    }

    pub async fn read_message(
        &self,
        email_id: EmailId,
        message_id: i64,
        requester_id: UserId,
    ) -> Result<MessageBody, SessionError> {
        self.read_message_at(email_id, message_id, requester_id, Utc::now())
            .await
    }

    /// Direct pass-through: bodies are immutable once delivered, so there is
    /// nothing to cache and nothing to meter.
    pub async fn read_message_at(
        &self,
        email_id: EmailId,
        message_id: i64,
        requester_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<MessageBody, SessionError> {
        let email = self.authorized_email(email_id, requester_id, now).await?;

        self.with_deadline(self.provider.fetch_message_body(&email.address, message_id))
            .await
            .map_err(|source| {
                tracing::warn!(email_id = %email_id, message_id, error = %source, "message fetch failed");
                SessionError::UpstreamUnavailable { source }
            })
    }

    /// Idempotent: deleting an already-deleted email succeeds as a no-op.
    pub async fn delete_email(
        &self,
        email_id: EmailId,
        requester_id: UserId,
    ) -> Result<(), SessionError> {
        let email = self
            .store
            .get_email(email_id)
            .await?
            .ok_or(SessionError::NotFound)?;
        if email.owner_id != requester_id {
            return Err(SessionError::Forbidden);
        }

        let transitioned = self.store.deactivate_email(email_id).await?;
        self.cache.invalidate(email_id);
        if transitioned {
            tracing::info!(email_id = %email_id, user_id = requester_id, "email deleted");
        }
        Ok(())
    }

    pub async fn list_active_emails(
        &self,
        user_id: UserId,
    ) -> Result<Vec<EphemeralEmail>, SessionError> {
        Ok(self.store.list_active_emails(user_id).await?)
    }

    pub async fn most_recent_active_email(
        &self,
        user_id: UserId,
    ) -> Result<Option<EphemeralEmail>, SessionError> {
        Ok(self.store.get_most_recent_active_email(user_id).await?)
    }

    pub async fn user_stats(&self, user_id: UserId) -> Result<UserStats, SessionError> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(SessionError::NotFound)?;
        let active_emails = self.store.count_active_emails(user_id).await?;
        let most_recent = self.store.get_most_recent_active_email(user_id).await?;
        Ok(UserStats {
            user,
            active_emails,
            most_recent,
        })
    }

    /// Periodic maintenance entry point; also callable manually by the
    /// admin layer. Sweeps in bounded batches and drops the poll cache
    /// entry of every email that transitioned, so a dead resource can
    /// never be served from cache.
    pub async fn expire_sweep(&self, now: DateTime<Utc>) -> Result<u64, SessionError> {
        let batch = self.config.sweep_batch;
        let mut total = 0u64;
        loop {
            let ids = self.store.sweep_expired(now, batch).await?;
            if ids.is_empty() {
                break;
            }
            total += ids.len() as u64;
            for id in &ids {
                self.cache.invalidate(*id);
            }
            if ids.len() < batch as usize {
                break;
            }
        }
        if total > 0 {
            tracing::info!(count = total, "expired emails swept");
        }
        Ok(total)
    }

    /// Drop stale quota events, expired cache entries, and idle creation
    /// locks. Returns (quota events dropped, cache entries dropped).
    pub fn compact(&self, now: DateTime<Utc>) -> (usize, usize) {
        let events = self.user_quota.compact(now) + self.origin_quota.compact(now);
        let entries = self.cache.compact(now);
        self.create_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        (events, entries)
    }

    /// Administrative quota reset for one user.
    pub fn reset_quota(&self, user_id: UserId, action: Option<ActionKind>) {
        self.user_quota.reset(&user_id, action);
        tracing::info!(user_id, "quota reset");
    }

    async fn load_or_create_user(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<User, SessionError> {
        match self.store.get_user(user_id).await? {
            Some(user) => {
                self.store.touch_user(user_id, now).await?;
                Ok(user)
            }
            None => {
                let user = User::first_contact(user_id, now);
                self.store.upsert_user(&user).await?;
                tracing::info!(user_id, "user created on first contact");
                Ok(user)
            }
        }
    }

    async fn authorized_email(
        &self,
        email_id: EmailId,
        requester_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<EphemeralEmail, SessionError> {
        let email = self
            .store
            .get_email(email_id)
            .await?
            .ok_or(SessionError::NotFound)?;
        if email.owner_id != requester_id {
            return Err(SessionError::Forbidden);
        }
        // Past-deadline emails are expired immediately, not only after the
        // sweep has flipped the flag.
        if email.is_expired(now) {
            return Err(SessionError::Expired);
        }
        Ok(email)
    }

    async fn requester_role(&self, requester_id: UserId) -> Result<Role, SessionError> {
        Ok(self
            .store
            .get_user(requester_id)
            .await?
            .map(|u| u.role)
            .unwrap_or(Role::Standard))
    }

    fn admit(
        &self,
        user_id: UserId,
        role: Role,
        origin: Option<&str>,
        action: ActionKind,
        policy: &ModePolicy,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let ceilings = policy.limits(role).ceilings(action);

        if let Some(origin) = origin {
            let origin_ceilings = ceilings.for_origin();
            let decision = self.origin_quota.check_and_consume(
                origin.to_string(),
                action,
                &origin_ceilings,
                now,
            );
            if let QuotaDecision::Limited { retry_after } = decision {
                tracing::debug!(origin, action = action.as_str(), "origin rate limited");
                return Err(SessionError::RateLimited { retry_after });
            }
        }

        match self
            .user_quota
            .check_and_consume(user_id, action, ceilings, now)
        {
            QuotaDecision::Allowed(_) => Ok(()),
            QuotaDecision::Limited { retry_after } => {
                tracing::debug!(user_id, action = action.as_str(), "rate limited");
                Err(SessionError::RateLimited { retry_after })
            }
        }
    }

    fn create_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        self.create_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn with_deadline<T>(
        &self,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        match tokio::time::timeout(self.config.provider_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        }
    }

    fn synthesize_address(&self) -> String {
        use rand::Rng;
        const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::rng();
        let local: String = (0..8)
            .map(|_| CHARS[rng.random_range(0..CHARS.len())] as char)
            .collect();
        let domain = &self.config.fallback_domains[rng.random_range(0..self.config.fallback_domains.len())];
        format!("{local}@{domain}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::policy::WindowCeilings;
    use crate::repos::MemoryResourceStore;
    use crate::services::provider::MockEmailProvider;
    use crate::test_utils::{at, messages, test_config, wide_policy};

    fn failing_provider() -> MockEmailProvider {
        let mut provider = MockEmailProvider::new();
        provider
            .expect_generate_address()
            .returning(|| Err(ProviderError::Status { status: 500 }));
        provider
    }

    fn session(provider: MockEmailProvider, policy: ModePolicy) -> SessionManager {
        SessionManager::new(
            Arc::new(MemoryResourceStore::new()),
            Arc::new(provider),
            policy,
            test_config(),
        )
    }

    #[tokio::test]
    async fn create_email_creates_user_on_first_contact() {
        let mut provider = MockEmailProvider::new();
        provider
            .expect_generate_address()
            .returning(|| Ok("fresh1@1secmail.com".to_string()));
        let session = session(provider, wide_policy());

        let email = session.create_email_at(7, None, at(0)).await.unwrap();

        assert_eq!(email.owner_id, 7);
        assert_eq!(email.address, "fresh1@1secmail.com");
        assert!(email.active);

        let stats = session.user_stats(7).await.unwrap();
        assert_eq!(stats.user.email_count, 1);
        assert_eq!(stats.active_emails, 1);
        assert_eq!(stats.most_recent.unwrap().id, email.id);
    }

    #[tokio::test]
    async fn create_email_falls_back_to_synthesized_address_on_provider_failure() {
        let session = session(failing_provider(), wide_policy());

        let email = session.create_email_at(1, None, at(0)).await.unwrap();

        let domain = email.address.split('@').nth(1).unwrap();
        assert!(test_config().fallback_domains.iter().any(|d| d == domain));
        let local = email.address.split('@').next().unwrap();
        assert_eq!(local.len(), 8);
    }

    #[tokio::test]
    async fn rate_limit_is_reported_before_capacity() {
        // Capacity 1, rate ceiling 2/min: the second call must fail on
        // capacity, the third on the rate limit.
        let mut policy = wide_policy();
        policy.standard.max_emails_per_user = 1;
        policy.standard.create_email = WindowCeilings::new(2, 100, 1_000);
        let session = session(failing_provider(), policy);

        session.create_email_at(1, None, at(0)).await.unwrap();

        let second = session.create_email_at(1, None, at(1)).await.unwrap_err();
        assert!(matches!(second, SessionError::QuotaExceeded { max: 1 }));

        let third = session.create_email_at(1, None, at(2)).await.unwrap_err();
        assert!(matches!(third, SessionError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn capacity_frees_up_after_deletion() {
        let mut policy = wide_policy();
        policy.standard.max_emails_per_user = 3;
        let session = session(failing_provider(), policy);

        let mut created = Vec::new();
        for i in 0..3 {
            created.push(session.create_email_at(1, None, at(i)).await.unwrap());
        }

        let overflow = session.create_email_at(1, None, at(3)).await.unwrap_err();
        assert!(matches!(overflow, SessionError::QuotaExceeded { max: 3 }));

        session.delete_email(created[0].id, 1).await.unwrap();
        session.create_email_at(1, None, at(4)).await.unwrap();
    }

    #[tokio::test]
    async fn two_per_minute_rate_limit_scenario() {
        let mut policy = wide_policy();
        policy.standard.create_email = WindowCeilings::new(2, 100, 1_000);
        let session = session(failing_provider(), policy);

        session.create_email_at(1, None, at(0)).await.unwrap();
        session.create_email_at(1, None, at(0)).await.unwrap();

        match session.create_email_at(1, None, at(1)).await.unwrap_err() {
            SessionError::RateLimited { retry_after } => {
                assert!(retry_after > std::time::Duration::ZERO);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_addresses_exhaust_into_resource_exhausted() {
        use crate::repos::MockResourceStore;

        let mut store = MockResourceStore::new();
        store.expect_get_user().returning(|id| {
            Ok(Some(User::first_contact(id, at(0))))
        });
        store.expect_touch_user().returning(|_, _| Ok(()));
        store.expect_count_active_emails().returning(|_| Ok(0));
        store
            .expect_insert_email()
            .times(3)
            .returning(|_| Err(StoreError::DuplicateAddress));

        let session = SessionManager::new(
            Arc::new(store),
            Arc::new(failing_provider()),
            wide_policy(),
            test_config(),
        );

        let err = session.create_email_at(1, None, at(0)).await.unwrap_err();
        assert!(matches!(err, SessionError::ResourceExhausted));
    }

    #[tokio::test]
    async fn concurrent_creates_never_exceed_capacity() {
        let mut policy = wide_policy();
        policy.standard.max_emails_per_user = 3;
        let session = Arc::new(session(failing_provider(), policy));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let session = Arc::clone(&session);
                tokio::spawn(async move { session.create_email_at(1, None, at(0)).await })
            })
            .collect();

        let mut ok = 0;
        let mut over_capacity = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(SessionError::QuotaExceeded { max: 3 }) => over_capacity += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(ok, 3);
        assert_eq!(over_capacity, 3);
        assert_eq!(session.list_active_emails(1).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn check_inbox_rejects_unknown_foreign_and_expired_emails() {
        let mut provider = failing_provider();
        provider
            .expect_fetch_messages()
            .returning(|_| Ok(messages(1)));
        let session = session(provider, wide_policy());

        let missing = session
            .check_inbox_at(EmailId(999), 1, None, at(0))
            .await
            .unwrap_err();
        assert!(matches!(missing, SessionError::NotFound));

        let email = session.create_email_at(1, None, at(0)).await.unwrap();

        let foreign = session
            .check_inbox_at(email.id, 2, None, at(1))
            .await
            .unwrap_err();
        assert!(matches!(foreign, SessionError::Forbidden));

        // TTL is one hour in the test config; one second past the deadline
        // is Expired even though no sweep has run.
        let expired = session
            .check_inbox_at(email.id, 1, None, at(3_601))
            .await
            .unwrap_err();
        assert!(matches!(expired, SessionError::Expired));
    }

    #[tokio::test]
    async fn cache_hit_skips_provider_and_quota_cache_miss_consumes_again() {
        let mut provider = failing_provider();
        // Exactly two upstream fetches: t=0 (cold) and t=40 (expired cache).
        provider
            .expect_fetch_messages()
            .times(2)
            .returning(|_| Ok(messages(2)));

        // Two inbox checks per minute. If the t=10 cache hit consumed
        // quota, the t=40 fetch would be the third event in the window
        // and would be rejected; its success proves hits are free.
        let mut policy = wide_policy();
        policy.standard.check_inbox = WindowCeilings::new(2, 100, 1_000);
        let session = session(provider, policy);

        let email = session.create_email_at(1, None, at(0)).await.unwrap();

        let cold = session
            .check_inbox_at(email.id, 1, None, at(0))
            .await
            .unwrap();
        assert_eq!(cold.len(), 2);

        let cached = session
            .check_inbox_at(email.id, 1, None, at(10))
            .await
            .unwrap();
        assert_eq!(cached, cold);

        // Cache TTL is 30s, so t=40 misses and consumes quota again.
        let miss = session
            .check_inbox_at(email.id, 1, None, at(40))
            .await
            .unwrap();
        assert_eq!(miss.len(), 2);
    }

    #[tokio::test]
    async fn cache_hit_does_not_touch_persisted_record() {
        let mut provider = failing_provider();
        provider
            .expect_fetch_messages()
            .times(1)
            .returning(|_| Ok(messages(3)));
        let session = session(provider, wide_policy());

        let email = session.create_email_at(1, None, at(0)).await.unwrap();
        session
            .check_inbox_at(email.id, 1, None, at(0))
            .await
            .unwrap();
        session
            .check_inbox_at(email.id, 1, None, at(10))
            .await
            .unwrap();

        let listed = session.list_active_emails(1).await.unwrap();
        assert_eq!(listed[0].message_count, 3);
        // Still the fetch instant, not the cache-hit instant.
        assert_eq!(listed[0].last_checked_at, Some(at(0)));
    }

    #[tokio::test]
    async fn upstream_failure_surfaces_and_is_not_cached() {
        let mut provider = failing_provider();
        provider
            .expect_fetch_messages()
            .times(2)
            .returning(|_| Err(ProviderError::Status { status: 503 }));
        let session = session(provider, wide_policy());

        let email = session.create_email_at(1, None, at(0)).await.unwrap();

        let first = session
            .check_inbox_at(email.id, 1, None, at(0))
            .await
            .unwrap_err();
        assert!(matches!(first, SessionError::UpstreamUnavailable { .. }));

        // The failure was not cached as an empty inbox: the second call
        // reaches the provider again (enforced by times(2)).
        let second = session
            .check_inbox_at(email.id, 1, None, at(1))
            .await
            .unwrap_err();
        assert!(matches!(second, SessionError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn read_message_passes_through_uncached() {
        let mut provider = failing_provider();
        provider
            .expect_fetch_message_body()
            .times(2)
            .returning(|_, id| {
                Ok(MessageBody {
                    id,
                    from: "a@example.com".to_string(),
                    subject: "hello".to_string(),
                    received_at: None,
                    text: "body".to_string(),
                    html: None,
                })
            });
        let session = session(provider, wide_policy());

        let email = session.create_email_at(1, None, at(0)).await.unwrap();

        let body = session
            .read_message_at(email.id, 42, 1, at(1))
            .await
            .unwrap();
        assert_eq!(body.id, 42);

        // No caching for bodies: a second read hits the provider again.
        session
            .read_message_at(email.id, 42, 1, at(2))
            .await
            .unwrap();

        let foreign = session
            .read_message_at(email.id, 42, 2, at(3))
            .await
            .unwrap_err();
        assert!(matches!(foreign, SessionError::Forbidden));
    }

    #[tokio::test]
    async fn delete_email_is_idempotent_and_kills_the_cache_entry() {
        let mut provider = failing_provider();
        provider
            .expect_fetch_messages()
            .returning(|_| Ok(messages(1)));
        let session = session(provider, wide_policy());

        let email = session.create_email_at(1, None, at(0)).await.unwrap();
        session
            .check_inbox_at(email.id, 1, None, at(0))
            .await
            .unwrap();

        session.delete_email(email.id, 1).await.unwrap();
        // Second delete: same observable effect, still success.
        session.delete_email(email.id, 1).await.unwrap();

        // The cached snapshot must not resurrect a dead email.
        let after = session
            .check_inbox_at(email.id, 1, None, at(5))
            .await
            .unwrap_err();
        assert!(matches!(after, SessionError::Expired));

        let foreign = session.delete_email(email.id, 2).await.unwrap_err();
        assert!(matches!(foreign, SessionError::Forbidden));
    }

    #[tokio::test]
    async fn expire_sweep_deactivates_and_invalidates_in_batches() {
        let mut provider = failing_provider();
        provider
            .expect_fetch_messages()
            .returning(|_| Ok(messages(1)));
        let session = session(provider, wide_policy());

        // Three emails with a 1h TTL; sweep batch is 2 in the test config,
        // so the sweep needs two store round trips.
        let mut emails = Vec::new();
        for i in 0..3 {
            emails.push(session.create_email_at(1, None, at(i)).await.unwrap());
        }
        session
            .check_inbox_at(emails[0].id, 1, None, at(10))
            .await
            .unwrap();

        let swept = session.expire_sweep(at(4_000)).await.unwrap();
        assert_eq!(swept, 3);

        for email in &emails {
            let err = session
                .check_inbox_at(email.id, 1, None, at(4_001))
                .await
                .unwrap_err();
            assert!(matches!(err, SessionError::Expired));
        }

        // Nothing left to sweep.
        assert_eq!(session.expire_sweep(at(4_002)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn origin_gate_is_checked_before_user_gate() {
        let mut policy = wide_policy();
        // Origin ceilings are the halved user ceilings: 1/min here.
        policy.standard.create_email = WindowCeilings::new(2, 100, 1_000);
        let session = session(failing_provider(), policy);

        session
            .create_email_at(1, Some("10.0.0.1"), at(0))
            .await
            .unwrap();

        // Different user, same origin: the origin gate (1/min) rejects.
        let err = session
            .create_email_at(2, Some("10.0.0.1"), at(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::RateLimited { .. }));

        // The same second user without the shared origin is admitted: no
        // user-gate event was recorded by the rejected call.
        session.create_email_at(2, None, at(2)).await.unwrap();
    }

    #[tokio::test]
    async fn reloaded_policy_applies_on_next_call() {
        let session = session(failing_provider(), wide_policy());

        session.create_email_at(1, None, at(0)).await.unwrap();

        let mut tightened = wide_policy();
        tightened.standard.create_email = WindowCeilings::new(1, 100, 1_000);
        session.policy().reload(tightened);

        // One event is already recorded in the minute window; under the
        // reloaded 1/min ceiling the next call is rejected.
        let err = session.create_email_at(1, None, at(1)).await.unwrap_err();
        assert!(matches!(err, SessionError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn compact_drops_stale_state() {
        let session = session(failing_provider(), wide_policy());

        session.create_email_at(1, None, at(0)).await.unwrap();
        let (events, _) = session.compact(at(90_000));
        assert_eq!(events, 1);
    }
}
