//! Campaign repository

use crate::db::{db_error, DatabasePool};
use crate::models::{Campaign, CampaignStatus, CreateCampaign, UpdateCampaign};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailramp_common::types::{CampaignId, TenantId};
use mailramp_common::Result;
use uuid::Uuid;

/// Campaign repository trait
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Create a new campaign in draft status
    async fn create(&self, input: CreateCampaign, now: DateTime<Utc>) -> Result<Campaign>;

    /// Get a campaign by ID
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;

    /// Get a campaign by ID and tenant
    async fn get_for_tenant(&self, tenant_id: TenantId, id: CampaignId)
        -> Result<Option<Campaign>>;

    /// List campaigns for a tenant, newest first
    async fn list_for_tenant(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>>;

    /// Apply an update while the campaign is draft or scheduled
    async fn update(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
        input: UpdateCampaign,
        now: DateTime<Utc>,
    ) -> Result<Option<Campaign>>;

    /// Delete a draft or scheduled campaign
    async fn delete(&self, tenant_id: TenantId, id: CampaignId) -> Result<bool>;

    /// Move to `to` if the current status is one of `from`.
    ///
    /// Stamps `started_at` (first time only), `paused_at` or `completed_at`
    /// according to the target status. Returns `None` when the guard fails.
    async fn transition(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Campaign>>;

    /// Mark a draft or scheduled campaign as scheduled for `at`
    async fn set_schedule(
        &self,
        id: CampaignId,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Campaign>>;
}

fn status_list(statuses: &[CampaignStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// Database campaign repository
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for DbCampaignRepository {
    async fn create(&self, input: CreateCampaign, now: DateTime<Utc>) -> Result<Campaign> {
        sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (
                id, tenant_id, name, subject, html_body, text_body, from_name, from_email,
                reply_to, daily_limit, hourly_limit, delay_min_secs, delay_max_secs, batch_size,
                status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 'draft', $15, $15)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.tenant_id)
        .bind(&input.name)
        .bind(&input.subject)
        .bind(&input.html_body)
        .bind(&input.text_body)
        .bind(&input.from_name)
        .bind(&input.from_email)
        .bind(&input.reply_to)
        .bind(input.daily_limit)
        .bind(input.hourly_limit)
        .bind(input.delay_min_secs)
        .bind(input.delay_max_secs)
        .bind(input.batch_size)
        .bind(now)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn get_for_tenant(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn list_for_tenant(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(tenant_id)
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn update(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
        input: UpdateCampaign,
        now: DateTime<Utc>,
    ) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                name = COALESCE($3, name),
                subject = COALESCE($4, subject),
                html_body = COALESCE($5, html_body),
                text_body = COALESCE($6, text_body),
                from_name = COALESCE($7, from_name),
                from_email = COALESCE($8, from_email),
                reply_to = COALESCE($9, reply_to),
                daily_limit = COALESCE($10, daily_limit),
                hourly_limit = COALESCE($11, hourly_limit),
                delay_min_secs = COALESCE($12, delay_min_secs),
                delay_max_secs = COALESCE($13, delay_max_secs),
                batch_size = COALESCE($14, batch_size),
                updated_at = $15
            WHERE id = $1 AND tenant_id = $2 AND status IN ('draft', 'scheduled')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(&input.name)
        .bind(&input.subject)
        .bind(&input.html_body)
        .bind(&input.text_body)
        .bind(&input.from_name)
        .bind(&input.from_email)
        .bind(&input.reply_to)
        .bind(input.daily_limit)
        .bind(input.hourly_limit)
        .bind(input.delay_min_secs)
        .bind(input.delay_max_secs)
        .bind(input.batch_size)
        .bind(now)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn delete(&self, tenant_id: TenantId, id: CampaignId) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM campaigns WHERE id = $1 AND tenant_id = $2 AND status IN ('draft', 'scheduled')",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn transition(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = $3,
                started_at = CASE WHEN $3 = 'sending' THEN COALESCE(started_at, $4) ELSE started_at END,
                paused_at = CASE WHEN $3 = 'paused' THEN $4 ELSE paused_at END,
                completed_at = CASE WHEN $3 = 'sent' THEN $4 ELSE completed_at END,
                updated_at = $4
            WHERE id = $1 AND status = ANY($2)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status_list(from))
        .bind(to.as_str())
        .bind(now)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn set_schedule(
        &self,
        id: CampaignId,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET status = 'scheduled', scheduled_at = $2, updated_at = $3
            WHERE id = $1 AND status IN ('draft', 'scheduled')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(now)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }
}
