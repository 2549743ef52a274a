//! Warm-up schedule repository

use crate::db::{db_error, DatabasePool};
use crate::models::{MailboxProvider, WarmupSchedule};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailramp_common::types::{TenantId, WarmupId};
use mailramp_common::Result;

#[async_trait]
pub trait WarmupRepository: Send + Sync {
    /// Insert a schedule. A second active/scheduled schedule for the same
    /// tenant and IP is rejected with `Error::Conflict`.
    async fn create(&self, schedule: WarmupSchedule) -> Result<WarmupSchedule>;

    async fn get(&self, id: WarmupId) -> Result<Option<WarmupSchedule>>;

    async fn get_for_tenant(&self, tenant_id: TenantId, id: WarmupId)
        -> Result<Option<WarmupSchedule>>;

    /// The governing schedule for an IP: active, then scheduled, then paused
    async fn find_current(&self, tenant_id: TenantId, ip_address: &str)
        -> Result<Option<WarmupSchedule>>;

    /// Persist status and counters
    async fn save(&self, schedule: &WarmupSchedule) -> Result<()>;

    async fn list_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<WarmupSchedule>>;

    /// Increment today's, the provider's and the lifetime counters
    async fn record_send(
        &self,
        id: WarmupId,
        provider: MailboxProvider,
        now: DateTime<Utc>,
    ) -> Result<Option<WarmupSchedule>>;
}

pub struct DbWarmupRepository {
    pool: DatabasePool,
}

impl DbWarmupRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WarmupRepository for DbWarmupRepository {
    async fn create(&self, schedule: WarmupSchedule) -> Result<WarmupSchedule> {
        sqlx::query_as::<_, WarmupSchedule>(
            r#"
            INSERT INTO warmup_schedules (
                id, tenant_id, ip_address, start_date, total_days, target_volume, pattern, days,
                current_day, emails_sent_today, gmail_sent_today, outlook_sent_today,
                yahoo_sent_today, other_sent_today, total_emails_sent, counters_date, status,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, 0, 0, 0, 0, 0, $10, $11, $12, $12)
            RETURNING *
            "#,
        )
        .bind(schedule.id)
        .bind(schedule.tenant_id)
        .bind(&schedule.ip_address)
        .bind(schedule.start_date)
        .bind(schedule.total_days)
        .bind(schedule.target_volume)
        .bind(&schedule.pattern)
        .bind(&schedule.days)
        .bind(schedule.current_day)
        .bind(schedule.counters_date)
        .bind(&schedule.status)
        .bind(schedule.created_at)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn get(&self, id: WarmupId) -> Result<Option<WarmupSchedule>> {
        sqlx::query_as::<_, WarmupSchedule>("SELECT * FROM warmup_schedules WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn get_for_tenant(
        &self,
        tenant_id: TenantId,
        id: WarmupId,
    ) -> Result<Option<WarmupSchedule>> {
        sqlx::query_as::<_, WarmupSchedule>(
            "SELECT * FROM warmup_schedules WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn find_current(
        &self,
        tenant_id: TenantId,
        ip_address: &str,
    ) -> Result<Option<WarmupSchedule>> {
        sqlx::query_as::<_, WarmupSchedule>(
            r#"
            SELECT * FROM warmup_schedules
            WHERE tenant_id = $1 AND ip_address = $2 AND status IN ('active', 'scheduled', 'paused')
            ORDER BY
                CASE status WHEN 'active' THEN 0 WHEN 'scheduled' THEN 1 ELSE 2 END,
                created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(ip_address)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn save(&self, schedule: &WarmupSchedule) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE warmup_schedules SET
                status = $2,
                current_day = $3,
                emails_sent_today = $4,
                gmail_sent_today = $5,
                outlook_sent_today = $6,
                yahoo_sent_today = $7,
                other_sent_today = $8,
                counters_date = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(schedule.id)
        .bind(&schedule.status)
        .bind(schedule.current_day)
        .bind(schedule.emails_sent_today)
        .bind(schedule.gmail_sent_today)
        .bind(schedule.outlook_sent_today)
        .bind(schedule.yahoo_sent_today)
        .bind(schedule.other_sent_today)
        .bind(schedule.counters_date)
        .bind(schedule.updated_at)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn list_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<WarmupSchedule>> {
        sqlx::query_as::<_, WarmupSchedule>(
            "SELECT * FROM warmup_schedules WHERE tenant_id = $1 ORDER BY created_at DESC",
        )
        .bind(tenant_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn record_send(
        &self,
        id: WarmupId,
        provider: MailboxProvider,
        now: DateTime<Utc>,
    ) -> Result<Option<WarmupSchedule>> {
        let column = match provider {
            MailboxProvider::Gmail => "gmail_sent_today",
            MailboxProvider::Outlook => "outlook_sent_today",
            MailboxProvider::Yahoo => "yahoo_sent_today",
            MailboxProvider::Other => "other_sent_today",
        };
        let sql = format!(
            r#"
            UPDATE warmup_schedules SET
                emails_sent_today = emails_sent_today + 1,
                {column} = {column} + 1,
                total_emails_sent = total_emails_sent + 1,
                updated_at = $2
            WHERE id = $1
            RETURNING *
            "#
        );

        sqlx::query_as::<_, WarmupSchedule>(&sql)
            .bind(id)
            .bind(now)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }
}
