//! Bounce and unsubscribe lists
//!
//! A `NULL` tenant marks a global entry. Lookups for a tenant see both the
//! global entries and that tenant's own; lookups without a tenant see only
//! the global ones.

use crate::db::{db_error, DatabasePool};
use crate::models::{BounceRecord, CreateUnsubscribe, NewBounce, Unsubscribe};
use async_trait::async_trait;
use mailramp_common::types::TenantId;
use mailramp_common::Result;
use uuid::Uuid;

#[async_trait]
pub trait SuppressionRepository: Send + Sync {
    /// Insert or merge a bounce. The stored kind never weakens; soft counts
    /// restart when the first bounce predates `window_start`.
    async fn upsert_bounce(&self, bounce: NewBounce) -> Result<BounceRecord>;

    async fn find_bounces(&self, email: &str, tenant_id: Option<TenantId>)
        -> Result<Vec<BounceRecord>>;

    /// Returns the entry and whether it was newly created
    async fn upsert_unsubscribe(&self, input: CreateUnsubscribe) -> Result<(Unsubscribe, bool)>;

    async fn find_unsubscribes(
        &self,
        email: &str,
        tenant_id: Option<TenantId>,
    ) -> Result<Vec<Unsubscribe>>;

    /// Remove the tenant's own entry. Complaint entries are never removed.
    async fn delete_unsubscribe(&self, email: &str, tenant_id: TenantId) -> Result<bool>;

    /// Tenant and global bounce records, newest first
    async fn list_bounces(
        &self,
        tenant_id: TenantId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BounceRecord>>;

    async fn list_unsubscribes(
        &self,
        tenant_id: TenantId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Unsubscribe>>;
}

pub struct DbSuppressionRepository {
    pool: DatabasePool,
}

impl DbSuppressionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SuppressionRepository for DbSuppressionRepository {
    async fn upsert_bounce(&self, bounce: NewBounce) -> Result<BounceRecord> {
        sqlx::query_as::<_, BounceRecord>(
            r#"
            INSERT INTO bounces
                (id, tenant_id, email, kind, reason, source, bounce_count, first_bounced_at, last_bounced_at)
            VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $7)
            ON CONFLICT ON CONSTRAINT bounces_scope_email DO UPDATE SET
                kind = CASE
                    WHEN bounces.kind = 'complaint' OR EXCLUDED.kind = 'complaint' THEN 'complaint'
                    WHEN bounces.kind = 'hard' OR EXCLUDED.kind = 'hard' THEN 'hard'
                    ELSE 'soft'
                END,
                reason = COALESCE(EXCLUDED.reason, bounces.reason),
                source = COALESCE(EXCLUDED.source, bounces.source),
                bounce_count = CASE
                    WHEN bounces.first_bounced_at < $8 THEN 1
                    ELSE bounces.bounce_count + 1
                END,
                first_bounced_at = CASE
                    WHEN bounces.first_bounced_at < $8 THEN EXCLUDED.first_bounced_at
                    ELSE bounces.first_bounced_at
                END,
                last_bounced_at = EXCLUDED.last_bounced_at
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(bounce.tenant_id)
        .bind(&bounce.email)
        .bind(bounce.kind.as_str())
        .bind(&bounce.reason)
        .bind(&bounce.source)
        .bind(bounce.occurred_at)
        .bind(bounce.window_start)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn find_bounces(
        &self,
        email: &str,
        tenant_id: Option<TenantId>,
    ) -> Result<Vec<BounceRecord>> {
        sqlx::query_as::<_, BounceRecord>(
            r#"
            SELECT * FROM bounces
            WHERE email = $1 AND (tenant_id IS NULL OR tenant_id = $2)
            "#,
        )
        .bind(email)
        .bind(tenant_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn upsert_unsubscribe(&self, input: CreateUnsubscribe) -> Result<(Unsubscribe, bool)> {
        let created = sqlx::query_as::<_, Unsubscribe>(
            r#"
            INSERT INTO unsubscribes (id, tenant_id, email, source, campaign_id, reason, unsubscribed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT ON CONSTRAINT unsubscribes_scope_email DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.tenant_id)
        .bind(&input.email)
        .bind(input.source.as_str())
        .bind(input.campaign_id)
        .bind(&input.reason)
        .bind(input.unsubscribed_at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        if let Some(entry) = created {
            return Ok((entry, true));
        }

        let existing = sqlx::query_as::<_, Unsubscribe>(
            "SELECT * FROM unsubscribes WHERE email = $1 AND tenant_id IS NOT DISTINCT FROM $2",
        )
        .bind(&input.email)
        .bind(input.tenant_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok((existing, false))
    }

    async fn find_unsubscribes(
        &self,
        email: &str,
        tenant_id: Option<TenantId>,
    ) -> Result<Vec<Unsubscribe>> {
        sqlx::query_as::<_, Unsubscribe>(
            r#"
            SELECT * FROM unsubscribes
            WHERE email = $1 AND (tenant_id IS NULL OR tenant_id = $2)
            "#,
        )
        .bind(email)
        .bind(tenant_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn delete_unsubscribe(&self, email: &str, tenant_id: TenantId) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM unsubscribes WHERE email = $1 AND tenant_id = $2 AND source <> 'complaint'",
        )
        .bind(email)
        .bind(tenant_id)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_bounces(
        &self,
        tenant_id: TenantId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BounceRecord>> {
        sqlx::query_as::<_, BounceRecord>(
            r#"
            SELECT * FROM bounces
            WHERE tenant_id IS NULL OR tenant_id = $1
            ORDER BY last_bounced_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn list_unsubscribes(
        &self,
        tenant_id: TenantId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Unsubscribe>> {
        sqlx::query_as::<_, Unsubscribe>(
            r#"
            SELECT * FROM unsubscribes
            WHERE tenant_id IS NULL OR tenant_id = $1
            ORDER BY unsubscribed_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }
}
