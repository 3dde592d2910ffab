//! PostgreSQL implementation of the resource store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use super::ResourceStore;
use crate::error::StoreError;
use crate::models::{EmailId, EphemeralEmail, User, UserId};

/// Postgres unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgResourceStore {
    pool: PgPool,
}

impl PgResourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a bounded pool and run pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(25)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))?;
        Ok(())
    }

    fn map_insert_error(err: sqlx::Error) -> StoreError {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
                return StoreError::DuplicateAddress;
            }
        }
        StoreError::Database(err)
    }
}

#[async_trait]
impl ResourceStore for PgResourceStore {
    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, role, created_at, last_active_at, email_count)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET role = EXCLUDED.role,
                last_active_at = EXCLUDED.last_active_at,
                email_count = EXCLUDED.email_count
            "#,
        )
        .bind(user.id)
        .bind(user.role)
        .bind(user.created_at)
        .bind(user.last_active_at)
        .bind(user.email_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, role, created_at, last_active_at, email_count FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn touch_user(&self, id: UserId, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET last_active_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_email(&self, email: &EphemeralEmail) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // The partial unique index on active addresses turns a duplicate
        // into a unique violation here, keeping check-and-insert atomic.
        sqlx::query(
            r#"
            INSERT INTO emails
                (id, owner_id, address, created_at, expires_at, active,
                 message_count, last_checked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(email.id)
        .bind(email.owner_id)
        .bind(&email.address)
        .bind(email.created_at)
        .bind(email.expires_at)
        .bind(email.active)
        .bind(email.message_count)
        .bind(email.last_checked_at)
        .execute(&mut *tx)
        .await
        .map_err(Self::map_insert_error)?;

        sqlx::query(
            "UPDATE users SET email_count = email_count + 1, last_active_at = $2 WHERE id = $1",
        )
        .bind(email.owner_id)
        .bind(email.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_email(&self, id: EmailId) -> Result<Option<EphemeralEmail>, StoreError> {
        let email = sqlx::query_as::<_, EphemeralEmail>(
            r#"
            SELECT id, owner_id, address, created_at, expires_at, active,
                   message_count, last_checked_at
            FROM emails WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(email)
    }

    async fn get_email_by_address(
        &self,
        address: &str,
    ) -> Result<Option<EphemeralEmail>, StoreError> {
        let email = sqlx::query_as::<_, EphemeralEmail>(
            r#"
            SELECT id, owner_id, address, created_at, expires_at, active,
                   message_count, last_checked_at
            FROM emails WHERE address = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(email)
    }

    async fn list_active_emails(&self, owner: UserId) -> Result<Vec<EphemeralEmail>, StoreError> {
        let emails = sqlx::query_as::<_, EphemeralEmail>(
            r#"
            SELECT id, owner_id, address, created_at, expires_at, active,
                   message_count, last_checked_at
            FROM emails WHERE owner_id = $1 AND active
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(emails)
    }

    async fn get_most_recent_active_email(
        &self,
        owner: UserId,
    ) -> Result<Option<EphemeralEmail>, StoreError> {
        let email = sqlx::query_as::<_, EphemeralEmail>(
            r#"
            SELECT id, owner_id, address, created_at, expires_at, active,
                   message_count, last_checked_at
            FROM emails WHERE owner_id = $1 AND active
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;
        Ok(email)
    }

    async fn count_active_emails(&self, owner: UserId) -> Result<usize, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM emails WHERE owner_id = $1 AND active")
                .bind(owner)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    async fn update_message_count(
        &self,
        id: EmailId,
        count: i64,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE emails SET message_count = $2, last_checked_at = $3 WHERE id = $1")
            .bind(id)
            .bind(count)
            .bind(checked_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn deactivate_email(&self, id: EmailId) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        // `AND active` makes the transition observable exactly once, no
        // matter how many concurrent deletes race on the same id.
        let row = sqlx::query(
            "UPDATE emails SET active = FALSE WHERE id = $1 AND active RETURNING owner_id",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let transitioned = match row {
            Some(row) => {
                let owner_id: UserId = row.try_get("owner_id")?;
                sqlx::query(
                    "UPDATE users SET email_count = GREATEST(email_count - 1, 0) WHERE id = $1",
                )
                .bind(owner_id)
                .execute(&mut *tx)
                .await?;
                true
            }
            None => false,
        };

        tx.commit().await?;
        Ok(transitioned)
    }

    async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        batch: u32,
    ) -> Result<Vec<EmailId>, StoreError> {
        // SKIP LOCKED lets concurrent sweeps and row updates proceed without
        // blocking each other; a skipped row is picked up by the next batch.
        let ids: Vec<EmailId> = sqlx::query_scalar(
            r#"
            UPDATE emails SET active = FALSE
            WHERE id IN (
                SELECT id FROM emails
                WHERE active AND expires_at <= $1
                ORDER BY expires_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id
            "#,
        )
        .bind(now)
        .bind(batch as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
