//! Append-only activity log

use crate::db::{db_error, DatabasePool};
use crate::models::{CampaignActivity, NewActivity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailramp_common::types::{CampaignId, RecipientId};
use mailramp_common::Result;
use uuid::Uuid;

#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn append(&self, activity: NewActivity) -> Result<CampaignActivity>;

    async fn list_for_recipient(&self, recipient_id: RecipientId) -> Result<Vec<CampaignActivity>>;

    /// Most recent first
    async fn list_for_campaign(
        &self,
        campaign_id: CampaignId,
        limit: i64,
    ) -> Result<Vec<CampaignActivity>>;

    /// Retention cleanup, the only way activities are removed
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

pub struct DbActivityRepository {
    pool: DatabasePool,
}

impl DbActivityRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityRepository for DbActivityRepository {
    async fn append(&self, activity: NewActivity) -> Result<CampaignActivity> {
        sqlx::query_as::<_, CampaignActivity>(
            r#"
            INSERT INTO campaign_activities
                (id, campaign_id, recipient_id, kind, ip_address, user_agent, url, reason, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(activity.campaign_id)
        .bind(activity.recipient_id)
        .bind(activity.kind.as_str())
        .bind(&activity.ip_address)
        .bind(&activity.user_agent)
        .bind(&activity.url)
        .bind(&activity.reason)
        .bind(activity.occurred_at)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn list_for_recipient(&self, recipient_id: RecipientId) -> Result<Vec<CampaignActivity>> {
        sqlx::query_as::<_, CampaignActivity>(
            "SELECT * FROM campaign_activities WHERE recipient_id = $1 ORDER BY occurred_at, id",
        )
        .bind(recipient_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn list_for_campaign(
        &self,
        campaign_id: CampaignId,
        limit: i64,
    ) -> Result<Vec<CampaignActivity>> {
        sqlx::query_as::<_, CampaignActivity>(
            r#"
            SELECT * FROM campaign_activities
            WHERE campaign_id = $1
            ORDER BY occurred_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(campaign_id)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM campaign_activities WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}
