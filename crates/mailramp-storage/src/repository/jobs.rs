//! Durable delayed job queue

use crate::db::{db_error, DatabasePool};
use crate::models::{Job, NewJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailramp_common::types::{CampaignId, JobId};
use mailramp_common::Result;
use uuid::Uuid;

/// Job repository trait
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn enqueue(&self, job: NewJob) -> Result<Job>;

    /// Enqueue unless the job's campaign already has a pending job on the same
    /// queue, in which case that job is moved up to `run_at` if it is later.
    /// Returns the stored job and whether it was inserted.
    async fn enqueue_unique(&self, job: NewJob) -> Result<(Job, bool)>;

    /// Claim due pending jobs of a queue, oldest `run_at` first, marking them running.
    /// Concurrent claimers never receive the same job.
    async fn claim_due(&self, queue: &str, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>>;

    async fn complete(&self, id: JobId, now: DateTime<Utc>) -> Result<()>;

    /// Put a job back on the queue for a later attempt
    async fn retry(&self, id: JobId, attempts: i32, error: &str, run_at: DateTime<Utc>)
        -> Result<()>;

    async fn fail(&self, id: JobId, error: &str, now: DateTime<Utc>) -> Result<()>;

    /// Remove all not-yet-executed jobs of a campaign
    async fn delete_pending_for_campaign(&self, campaign_id: CampaignId) -> Result<u64>;

    async fn count_pending(&self, queue: Option<&str>, campaign_id: Option<CampaignId>)
        -> Result<i64>;

    async fn next_due_at(&self, queue: Option<&str>) -> Result<Option<DateTime<Utc>>>;

    async fn list_pending(&self, queue: Option<&str>) -> Result<Vec<Job>>;

    /// Return jobs left `running` by a crashed process to `pending`
    async fn reset_running(&self) -> Result<u64>;
}

/// Database job repository
pub struct DbJobRepository {
    pool: DatabasePool,
}

impl DbJobRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for DbJobRepository {
    async fn enqueue(&self, job: NewJob) -> Result<Job> {
        sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (id, queue, payload, campaign_id, status, attempts, max_attempts, run_at, created_at)
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&job.queue)
        .bind(&job.payload)
        .bind(job.campaign_id)
        .bind(job.max_attempts)
        .bind(job.run_at)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn enqueue_unique(&self, job: NewJob) -> Result<(Job, bool)> {
        let Some(campaign_id) = job.campaign_id else {
            return Ok((self.enqueue(job).await?, true));
        };

        let mut tx = self.pool.pool().begin().await.map_err(db_error)?;

        // serializes concurrent enqueuers for the same campaign and queue
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("{}:{}", job.queue, campaign_id))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        let existing = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs SET run_at = LEAST(run_at, $3)
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = $1 AND campaign_id = $2 AND status = 'pending'
                ORDER BY run_at, id
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(&job.queue)
        .bind(campaign_id)
        .bind(job.run_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        let stored = match existing {
            Some(existing) => (existing, false),
            None => {
                let inserted = sqlx::query_as::<_, Job>(
                    r#"
                    INSERT INTO jobs (id, queue, payload, campaign_id, status, attempts, max_attempts, run_at, created_at)
                    VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, NOW())
                    RETURNING *
                    "#,
                )
                .bind(Uuid::now_v7())
                .bind(&job.queue)
                .bind(&job.payload)
                .bind(campaign_id)
                .bind(job.max_attempts)
                .bind(job.run_at)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error)?;
                (inserted, true)
            }
        };

        tx.commit().await.map_err(db_error)?;
        Ok(stored)
    }

    async fn claim_due(&self, queue: &str, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs SET status = 'running', started_at = $2
            WHERE id IN (
                SELECT id FROM jobs
                WHERE queue = $1 AND status = 'pending' AND run_at <= $2
                ORDER BY run_at, id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(queue)
        .bind(now)
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn complete(&self, id: JobId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'completed', completed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn retry(
        &self,
        id: JobId,
        attempts: i32,
        error: &str,
        run_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs SET status = 'pending', attempts = $2, last_error = $3, run_at = $4, started_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(error)
        .bind(run_at)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn fail(&self, id: JobId, error: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs SET status = 'failed', attempts = attempts + 1, last_error = $2, completed_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn delete_pending_for_campaign(&self, campaign_id: CampaignId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE campaign_id = $1 AND status = 'pending'")
            .bind(campaign_id)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn count_pending(
        &self,
        queue: Option<&str>,
        campaign_id: Option<CampaignId>,
    ) -> Result<i64> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE status = 'pending'
              AND ($1::text IS NULL OR queue = $1)
              AND ($2::uuid IS NULL OR campaign_id = $2)
            "#,
        )
        .bind(queue)
        .bind(campaign_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn next_due_at(&self, queue: Option<&str>) -> Result<Option<DateTime<Utc>>> {
        sqlx::query_scalar(
            "SELECT MIN(run_at) FROM jobs WHERE status = 'pending' AND ($1::text IS NULL OR queue = $1)",
        )
        .bind(queue)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn list_pending(&self, queue: Option<&str>) -> Result<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM jobs
            WHERE status = 'pending' AND ($1::text IS NULL OR queue = $1)
            ORDER BY run_at, id
            "#,
        )
        .bind(queue)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn reset_running(&self) -> Result<u64> {
        let result =
            sqlx::query("UPDATE jobs SET status = 'pending', started_at = NULL WHERE status = 'running'")
                .execute(self.pool.pool())
                .await
                .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}
