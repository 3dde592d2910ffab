//! In-memory implementation of the resource store.
//!
//! Same contract as the Postgres backend, backed by lock-protected maps.
//! Used by the engine's concurrency tests and by embedders that do not need
//! durability.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::ResourceStore;
use crate::error::StoreError;
use crate::models::{EmailId, EphemeralEmail, User, UserId};

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<UserId, User>,
    emails: BTreeMap<EmailId, EphemeralEmail>,
}

#[derive(Debug, Default)]
pub struct MemoryResourceStore {
    inner: Mutex<Inner>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a panicking test; the data is still
        // consistent enough to continue.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active_sorted(inner: &Inner, owner: UserId) -> Vec<EphemeralEmail> {
        let mut emails: Vec<EphemeralEmail> = inner
            .emails
            .values()
            .filter(|e| e.owner_id == owner && e.active)
            .cloned()
            .collect();
        emails.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        emails
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        self.lock().users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn touch_user(&self, id: UserId, now: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(user) = self.lock().users.get_mut(&id) {
            user.last_active_at = now;
        }
        Ok(())
    }

    async fn insert_email(&self, email: &EphemeralEmail) -> Result<(), StoreError> {
        let mut inner = self.lock();

        let duplicate = inner
            .emails
            .values()
            .any(|e| e.active && e.address == email.address);
        if duplicate {
            return Err(StoreError::DuplicateAddress);
        }

        inner.emails.insert(email.id, email.clone());
        if let Some(user) = inner.users.get_mut(&email.owner_id) {
            user.email_count += 1;
            user.last_active_at = email.created_at;
        }
        Ok(())
    }

    async fn get_email(&self, id: EmailId) -> Result<Option<EphemeralEmail>, StoreError> {
        Ok(self.lock().emails.get(&id).cloned())
    }

    async fn get_email_by_address(
        &self,
        address: &str,
    ) -> Result<Option<EphemeralEmail>, StoreError> {
        let inner = self.lock();
        let mut matches: Vec<&EphemeralEmail> = inner
            .emails
            .values()
            .filter(|e| e.address == address)
            .collect();
        matches.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(matches.first().map(|e| (*e).clone()))
    }

    async fn list_active_emails(&self, owner: UserId) -> Result<Vec<EphemeralEmail>, StoreError> {
        Ok(Self::active_sorted(&self.lock(), owner))
    }

    async fn get_most_recent_active_email(
        &self,
        owner: UserId,
    ) -> Result<Option<EphemeralEmail>, StoreError> {
        Ok(Self::active_sorted(&self.lock(), owner).into_iter().next())
    }

    async fn count_active_emails(&self, owner: UserId) -> Result<usize, StoreError> {
        Ok(self
            .lock()
            .emails
            .values()
            .filter(|e| e.owner_id == owner && e.active)
            .count())
    }

    async fn update_message_count(
        &self,
        id: EmailId,
        count: i64,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(email) = self.lock().emails.get_mut(&id) {
            email.message_count = count;
            email.last_checked_at = Some(checked_at);
        }
        Ok(())
    }

    async fn deactivate_email(&self, id: EmailId) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let owner = match inner.emails.get_mut(&id) {
            Some(email) if email.active => {
                email.active = false;
                Some(email.owner_id)
            }
            _ => None,
        };
        if let Some(owner) = owner {
            if let Some(user) = inner.users.get_mut(&owner) {
                user.email_count = (user.email_count - 1).max(0);
            }
        }
        Ok(owner.is_some())
    }

    async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        batch: u32,
    ) -> Result<Vec<EmailId>, StoreError> {
        let mut inner = self.lock();

        let mut due: Vec<(DateTime<Utc>, EmailId)> = inner
            .emails
            .values()
            .filter(|e| e.active && e.expires_at <= now)
            .map(|e| (e.expires_at, e.id))
            .collect();
        due.sort();
        due.truncate(batch as usize);

        let ids: Vec<EmailId> = due.into_iter().map(|(_, id)| id).collect();
        for id in &ids {
            if let Some(email) = inner.emails.get_mut(id) {
                email.active = false;
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        use chrono::TimeZone;
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    async fn store_with_user(id: UserId) -> MemoryResourceStore {
        let store = MemoryResourceStore::new();
        store
            .upsert_user(&User::first_contact(id, at(0)))
            .await
            .unwrap();
        store
    }

    fn email(owner: UserId, address: &str, created: DateTime<Utc>) -> EphemeralEmail {
        EphemeralEmail::new(owner, address.into(), created, chrono::Duration::hours(24))
    }

    #[tokio::test]
    async fn insert_bumps_email_count_and_enforces_active_uniqueness() {
        let store = store_with_user(1).await;

        store.insert_email(&email(1, "a@1secmail.com", at(0))).await.unwrap();
        assert_eq!(store.get_user(1).await.unwrap().unwrap().email_count, 1);

        let err = store
            .insert_email(&email(1, "a@1secmail.com", at(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateAddress));
    }

    #[tokio::test]
    async fn deactivated_address_can_be_reused() {
        let store = store_with_user(1).await;
        let first = email(1, "a@1secmail.com", at(0));

        store.insert_email(&first).await.unwrap();
        assert!(store.deactivate_email(first.id).await.unwrap());

        store.insert_email(&email(1, "a@1secmail.com", at(1))).await.unwrap();
    }

    #[tokio::test]
    async fn deactivate_is_idempotent_and_decrements_once() {
        let store = store_with_user(1).await;
        let record = email(1, "a@1secmail.com", at(0));
        store.insert_email(&record).await.unwrap();

        assert!(store.deactivate_email(record.id).await.unwrap());
        assert!(!store.deactivate_email(record.id).await.unwrap());
        assert_eq!(store.get_user(1).await.unwrap().unwrap().email_count, 0);
    }

    #[tokio::test]
    async fn listing_orders_newest_first_with_id_tiebreak() {
        let store = store_with_user(1).await;
        let older = email(1, "a@1secmail.com", at(0));
        let tie_a = email(1, "b@1secmail.com", at(10));
        let tie_b = email(1, "c@1secmail.com", at(10));
        for e in [&older, &tie_a, &tie_b] {
            store.insert_email(e).await.unwrap();
        }

        let listed = store.list_active_emails(1).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[2].id, older.id);
        // Equal created_at resolves by id descending.
        let winner = tie_a.id.max(tie_b.id);
        assert_eq!(listed[0].id, winner);

        let most_recent = store.get_most_recent_active_email(1).await.unwrap().unwrap();
        assert_eq!(most_recent.id, winner);
    }

    #[tokio::test]
    async fn sweep_deactivates_due_emails_in_batches_without_touching_counts() {
        let store = store_with_user(1).await;
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut e = email(1, &format!("e{i}@1secmail.com"), at(i));
            e.expires_at = at(100 + i);
            store.insert_email(&e).await.unwrap();
            ids.push(e.id);
        }

        let first = store.sweep_expired(at(200), 2).await.unwrap();
        assert_eq!(first.len(), 2);
        // Oldest deadlines first.
        assert_eq!(first, ids[..2].to_vec());

        let second = store.sweep_expired(at(200), 2).await.unwrap();
        assert_eq!(second, vec![ids[2]]);

        assert_eq!(store.count_active_emails(1).await.unwrap(), 0);
        // Expiry never decrements the creation counter.
        assert_eq!(store.get_user(1).await.unwrap().unwrap().email_count, 3);
    }

    #[tokio::test]
    async fn update_message_count_records_observation() {
        let store = store_with_user(1).await;
        let record = email(1, "a@1secmail.com", at(0));
        store.insert_email(&record).await.unwrap();

        store.update_message_count(record.id, 4, at(50)).await.unwrap();

        let fetched = store.get_email(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.message_count, 4);
        assert_eq!(fetched.last_checked_at, Some(at(50)));
    }
}
