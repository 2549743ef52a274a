//! Campaign recipient repository
//!
//! Every recipient transition that moves a campaign rollup counter runs in a
//! transaction together with the counter update, so the counters always equal
//! the number of rows with the matching milestone set.

use crate::db::{db_error, DatabasePool};
use crate::models::{CampaignRecipient, NewRecipient, OutstandingCounts, RecipientStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailramp_common::types::{CampaignId, RecipientId, TenantId};
use mailramp_common::Result;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryAs;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

/// Rows that have not reached the transport yet
const PRE_SEND: &str =
    "(status IN ('pending', 'scheduled') OR (status = 'failed' AND next_attempt_at IS NOT NULL))";

/// Recipient repository trait
#[async_trait]
pub trait RecipientRepository: Send + Sync {
    /// Add recipients, skipping addresses already on the campaign.
    /// Returns the number of rows inserted.
    async fn add(
        &self,
        campaign_id: CampaignId,
        tenant_id: TenantId,
        recipients: Vec<NewRecipient>,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    async fn get(&self, id: RecipientId) -> Result<Option<CampaignRecipient>>;

    async fn get_by_tracking_id(&self, tracking_id: &str) -> Result<Option<CampaignRecipient>>;

    async fn get_by_provider_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<CampaignRecipient>>;

    async fn get_by_campaign_email(
        &self,
        campaign_id: CampaignId,
        email: &str,
    ) -> Result<Option<CampaignRecipient>>;

    /// List recipients of a campaign, oldest first
    async fn list_for_campaign(
        &self,
        campaign_id: CampaignId,
        status: Option<RecipientStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CampaignRecipient>>;

    /// Oldest pending recipients first
    async fn fetch_pending(&self, campaign_id: CampaignId, limit: i64)
        -> Result<Vec<CampaignRecipient>>;

    /// `pending -> scheduled`
    async fn mark_scheduled(
        &self,
        id: RecipientId,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Move a pre-send row to `sending` and count the attempt
    async fn claim_for_send(
        &self,
        id: RecipientId,
        now: DateTime<Utc>,
    ) -> Result<Option<CampaignRecipient>>;

    /// `sending -> sent`, incrementing `sent_count` once
    async fn mark_sent(
        &self,
        id: RecipientId,
        provider_message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CampaignRecipient>>;

    /// `sending -> failed`. With `next_attempt_at` the row stays retryable,
    /// without it the failure is terminal and `failed_count` increments.
    async fn mark_failed(
        &self,
        id: RecipientId,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<CampaignRecipient>>;

    /// Put a scheduled, claimed or retryable row back to `pending`
    async fn release_to_pending(&self, id: RecipientId, now: DateTime<Utc>) -> Result<bool>;

    /// Terminal skip of a pre-send row (`cancelled`, `unsubscribed` or `failed`)
    async fn finish_skipped(
        &self,
        id: RecipientId,
        status: RecipientStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Returns true on the first open
    async fn record_open(&self, id: RecipientId, now: DateTime<Utc>) -> Result<bool>;

    /// Returns true on the first click
    async fn record_click(&self, id: RecipientId, now: DateTime<Utc>) -> Result<bool>;

    /// Returns true when the recipient was not bounced before
    async fn record_bounce(
        &self,
        id: RecipientId,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Returns true when the recipient was not unsubscribed before
    async fn record_unsubscribe(&self, id: RecipientId, now: DateTime<Utc>) -> Result<bool>;

    /// Cancel pending/scheduled rows for an address; `None` spans all tenants
    async fn cancel_pending_for_email(
        &self,
        email: &str,
        tenant_id: Option<TenantId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Move scheduled and retryable rows back to `pending`
    async fn requeue_for_pause(&self, campaign_id: CampaignId, now: DateTime<Utc>) -> Result<u64>;

    /// Return `sending` rows last updated at or before `claimed_before` to
    /// `pending`. `None` spans every campaign.
    async fn release_stale_sending(
        &self,
        campaign_id: Option<CampaignId>,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    async fn count_outstanding(&self, campaign_id: CampaignId) -> Result<OutstandingCounts>;

    async fn count_by_status(&self, campaign_id: CampaignId) -> Result<Vec<(String, i64)>>;
}

/// Database recipient repository
pub struct DbRecipientRepository {
    pool: DatabasePool,
}

impl DbRecipientRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn bump_counter(
        tx: &mut Transaction<'_, Postgres>,
        campaign_id: CampaignId,
        column: &'static str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE campaigns SET {column} = {column} + 1, updated_at = $2 WHERE id = $1"
        );
        sqlx::query(&sql)
            .bind(campaign_id)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    /// Run a guarded recipient update and bump `column` if it matched
    async fn update_with_counter<'q>(
        &self,
        query: QueryAs<'q, Postgres, CampaignRecipient, PgArguments>,
        column: &'static str,
        now: DateTime<Utc>,
    ) -> Result<Option<CampaignRecipient>> {
        let mut tx = self.pool.pool().begin().await.map_err(db_error)?;

        let updated = query.fetch_optional(&mut *tx).await.map_err(db_error)?;

        if let Some(ref recipient) = updated {
            Self::bump_counter(&mut tx, recipient.campaign_id, column, now).await?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(updated)
    }
}

#[async_trait]
impl RecipientRepository for DbRecipientRepository {
    async fn add(
        &self,
        campaign_id: CampaignId,
        tenant_id: TenantId,
        recipients: Vec<NewRecipient>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut count = 0u64;
        let mut tx = self.pool.pool().begin().await.map_err(db_error)?;

        for recipient in recipients {
            let fields = if recipient.fields.is_null() {
                serde_json::json!({})
            } else {
                recipient.fields
            };

            let result = sqlx::query(
                r#"
                INSERT INTO campaign_recipients
                    (id, campaign_id, tenant_id, email, name, fields, tracking_id, status, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $8)
                ON CONFLICT (campaign_id, email) DO NOTHING
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(campaign_id)
            .bind(tenant_id)
            .bind(&recipient.email)
            .bind(&recipient.name)
            .bind(&fields)
            .bind(Uuid::new_v4().simple().to_string())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            count += result.rows_affected();
        }

        sqlx::query(
            "UPDATE campaigns SET total_recipients = total_recipients + $2, updated_at = $3 WHERE id = $1",
        )
        .bind(campaign_id)
        .bind(count as i32)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(count)
    }

    async fn get(&self, id: RecipientId) -> Result<Option<CampaignRecipient>> {
        sqlx::query_as::<_, CampaignRecipient>("SELECT * FROM campaign_recipients WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn get_by_tracking_id(&self, tracking_id: &str) -> Result<Option<CampaignRecipient>> {
        sqlx::query_as::<_, CampaignRecipient>(
            "SELECT * FROM campaign_recipients WHERE tracking_id = $1",
        )
        .bind(tracking_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn get_by_provider_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<CampaignRecipient>> {
        sqlx::query_as::<_, CampaignRecipient>(
            "SELECT * FROM campaign_recipients WHERE provider_message_id = $1 LIMIT 1",
        )
        .bind(message_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn get_by_campaign_email(
        &self,
        campaign_id: CampaignId,
        email: &str,
    ) -> Result<Option<CampaignRecipient>> {
        sqlx::query_as::<_, CampaignRecipient>(
            "SELECT * FROM campaign_recipients WHERE campaign_id = $1 AND email = $2",
        )
        .bind(campaign_id)
        .bind(email)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn list_for_campaign(
        &self,
        campaign_id: CampaignId,
        status: Option<RecipientStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CampaignRecipient>> {
        sqlx::query_as::<_, CampaignRecipient>(
            r#"
            SELECT * FROM campaign_recipients
            WHERE campaign_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at, id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(campaign_id)
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn fetch_pending(
        &self,
        campaign_id: CampaignId,
        limit: i64,
    ) -> Result<Vec<CampaignRecipient>> {
        sqlx::query_as::<_, CampaignRecipient>(
            r#"
            SELECT * FROM campaign_recipients
            WHERE campaign_id = $1 AND status = 'pending'
            ORDER BY created_at, id
            LIMIT $2
            "#,
        )
        .bind(campaign_id)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn mark_scheduled(
        &self,
        id: RecipientId,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_recipients SET status = 'scheduled', scheduled_at = $2, updated_at = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim_for_send(
        &self,
        id: RecipientId,
        now: DateTime<Utc>,
    ) -> Result<Option<CampaignRecipient>> {
        let sql = format!(
            r#"
            UPDATE campaign_recipients
            SET status = 'sending', attempts = attempts + 1, next_attempt_at = NULL, updated_at = $2
            WHERE id = $1 AND {PRE_SEND}
            RETURNING *
            "#
        );
        sqlx::query_as::<_, CampaignRecipient>(&sql)
            .bind(id)
            .bind(now)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn mark_sent(
        &self,
        id: RecipientId,
        provider_message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CampaignRecipient>> {
        let query = sqlx::query_as::<_, CampaignRecipient>(
            r#"
            UPDATE campaign_recipients
            SET status = 'sent', sent_at = $2, provider_message_id = $3,
                last_error = NULL, next_attempt_at = NULL, updated_at = $2
            WHERE id = $1 AND status = 'sending' AND sent_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(provider_message_id);

        self.update_with_counter(query, "sent_count", now).await
    }

    async fn mark_failed(
        &self,
        id: RecipientId,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<CampaignRecipient>> {
        let query = sqlx::query_as::<_, CampaignRecipient>(
            r#"
            UPDATE campaign_recipients
            SET status = 'failed', last_error = $3, next_attempt_at = $4, updated_at = $2
            WHERE id = $1 AND status = 'sending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(error)
        .bind(next_attempt_at);

        if next_attempt_at.is_none() {
            return self.update_with_counter(query, "failed_count", now).await;
        }

        query.fetch_optional(self.pool.pool()).await.map_err(db_error)
    }

    async fn release_to_pending(&self, id: RecipientId, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_recipients
            SET status = 'pending', scheduled_at = NULL, next_attempt_at = NULL, updated_at = $2
            WHERE id = $1 AND (status IN ('scheduled', 'sending')
                OR (status = 'failed' AND next_attempt_at IS NOT NULL))
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn finish_skipped(
        &self,
        id: RecipientId,
        status: RecipientStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = format!(
            r#"
            UPDATE campaign_recipients
            SET status = $3, last_error = $4, next_attempt_at = NULL, updated_at = $2
            WHERE id = $1 AND {PRE_SEND}
            RETURNING *
            "#
        );
        let query = sqlx::query_as::<_, CampaignRecipient>(&sql)
            .bind(id)
            .bind(now)
            .bind(status.as_str())
            .bind(reason);

        let updated = if status == RecipientStatus::Failed {
            self.update_with_counter(query, "failed_count", now).await?
        } else {
            query.fetch_optional(self.pool.pool()).await.map_err(db_error)?
        };

        Ok(updated.is_some())
    }

    async fn record_open(&self, id: RecipientId, now: DateTime<Utc>) -> Result<bool> {
        let query = sqlx::query_as::<_, CampaignRecipient>(
            r#"
            UPDATE campaign_recipients
            SET first_opened_at = $2,
                status = CASE WHEN status = 'sent' THEN 'opened' ELSE status END,
                updated_at = $2
            WHERE id = $1 AND first_opened_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now);

        Ok(self.update_with_counter(query, "opened_count", now).await?.is_some())
    }

    async fn record_click(&self, id: RecipientId, now: DateTime<Utc>) -> Result<bool> {
        let query = sqlx::query_as::<_, CampaignRecipient>(
            r#"
            UPDATE campaign_recipients
            SET first_clicked_at = $2,
                status = CASE WHEN status IN ('sent', 'opened') THEN 'clicked' ELSE status END,
                updated_at = $2
            WHERE id = $1 AND first_clicked_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now);

        Ok(self.update_with_counter(query, "clicked_count", now).await?.is_some())
    }

    async fn record_bounce(
        &self,
        id: RecipientId,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let query = sqlx::query_as::<_, CampaignRecipient>(
            r#"
            UPDATE campaign_recipients
            SET status = 'bounced', bounced_at = $2, last_error = COALESCE($3, last_error),
                next_attempt_at = NULL, updated_at = $2
            WHERE id = $1 AND bounced_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(reason);

        Ok(self.update_with_counter(query, "bounced_count", now).await?.is_some())
    }

    async fn record_unsubscribe(&self, id: RecipientId, now: DateTime<Utc>) -> Result<bool> {
        let query = sqlx::query_as::<_, CampaignRecipient>(
            r#"
            UPDATE campaign_recipients
            SET unsubscribed_at = $2,
                status = CASE WHEN status = 'bounced' THEN status ELSE 'unsubscribed' END,
                next_attempt_at = NULL,
                updated_at = $2
            WHERE id = $1 AND unsubscribed_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now);

        Ok(self
            .update_with_counter(query, "unsubscribed_count", now)
            .await?
            .is_some())
    }

    async fn cancel_pending_for_email(
        &self,
        email: &str,
        tenant_id: Option<TenantId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_recipients
            SET status = 'cancelled', last_error = $3, updated_at = $4
            WHERE email = $1 AND status IN ('pending', 'scheduled')
              AND ($2::uuid IS NULL OR tenant_id = $2)
            "#,
        )
        .bind(email)
        .bind(tenant_id)
        .bind(reason)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }

    async fn requeue_for_pause(&self, campaign_id: CampaignId, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_recipients
            SET status = 'pending', scheduled_at = NULL, next_attempt_at = NULL, updated_at = $2
            WHERE campaign_id = $1 AND (status = 'scheduled'
                OR (status = 'failed' AND next_attempt_at IS NOT NULL))
            "#,
        )
        .bind(campaign_id)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }

    async fn release_stale_sending(
        &self,
        campaign_id: Option<CampaignId>,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_recipients
            SET status = 'pending', scheduled_at = NULL, next_attempt_at = NULL, updated_at = $3
            WHERE status = 'sending' AND updated_at <= $2
              AND ($1::uuid IS NULL OR campaign_id = $1)
            "#,
        )
        .bind(campaign_id)
        .bind(claimed_before)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }

    async fn count_outstanding(&self, campaign_id: CampaignId) -> Result<OutstandingCounts> {
        let (pending, in_flight): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status IN ('scheduled', 'sending')
                    OR (status = 'failed' AND next_attempt_at IS NOT NULL))
            FROM campaign_recipients
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(OutstandingCounts { pending, in_flight })
    }

    async fn count_by_status(&self, campaign_id: CampaignId) -> Result<Vec<(String, i64)>> {
        sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT status, COUNT(*) FROM campaign_recipients
            WHERE campaign_id = $1
            GROUP BY status
            ORDER BY status
            "#,
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }
}
