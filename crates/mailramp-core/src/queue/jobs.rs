//! Campaign job payloads on top of the durable job table

use chrono::{DateTime, Duration, Utc};
use mailramp_common::types::{CampaignId, RecipientId};
use mailramp_common::Result;
use mailramp_storage::models::{Job, NewJob};
use mailramp_storage::repository::JobRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Orchestration queue, processed one job at a time
pub const CAMPAIGN_QUEUE: &str = "campaigns";

/// Individual sends
pub const EMAIL_QUEUE: &str = "emails";

const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Job payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CampaignJob {
    ProcessBatch {
        campaign_id: CampaignId,
    },
    SendEmail {
        campaign_id: CampaignId,
        recipient_id: RecipientId,
    },
}

impl CampaignJob {
    pub fn queue(&self) -> &'static str {
        match self {
            Self::ProcessBatch { .. } => CAMPAIGN_QUEUE,
            Self::SendEmail { .. } => EMAIL_QUEUE,
        }
    }

    pub fn campaign_id(&self) -> CampaignId {
        match self {
            Self::ProcessBatch { campaign_id } | Self::SendEmail { campaign_id, .. } => *campaign_id,
        }
    }
}

/// Queue depth snapshot
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub campaigns: i64,
    pub emails: i64,
    pub next_due_at: Option<DateTime<Utc>>,
}

/// Typed access to the job table
#[derive(Clone)]
pub struct JobQueue {
    jobs: Arc<dyn JobRepository>,
    max_attempts: i32,
}

impl JobQueue {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            jobs,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Attempts a job gets when its handler keeps returning errors
    pub fn with_max_attempts(mut self, attempts: i32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn repository(&self) -> Arc<dyn JobRepository> {
        self.jobs.clone()
    }

    fn new_job(&self, job: &CampaignJob, run_at: DateTime<Utc>) -> Result<NewJob> {
        let payload = serde_json::to_value(job)?;

        Ok(NewJob {
            queue: job.queue().to_string(),
            payload,
            campaign_id: Some(job.campaign_id()),
            run_at,
            max_attempts: self.max_attempts,
        })
    }

    /// Enqueue a job that becomes due at `run_at`
    pub async fn enqueue_at(&self, job: CampaignJob, run_at: DateTime<Utc>) -> Result<Job> {
        let stored = self.jobs.enqueue(self.new_job(&job, run_at)?).await?;

        debug!(
            job_id = %stored.id,
            queue = job.queue(),
            campaign_id = %job.campaign_id(),
            %run_at,
            "Job enqueued"
        );
        Ok(stored)
    }

    /// Schedule the campaign's next batch. A campaign has at most one pending
    /// batch job; an existing one is brought forward to `run_at` if later.
    pub async fn enqueue_batch(&self, campaign_id: CampaignId, run_at: DateTime<Utc>) -> Result<Job> {
        let job = CampaignJob::ProcessBatch { campaign_id };
        let (stored, inserted) = self.jobs.enqueue_unique(self.new_job(&job, run_at)?).await?;

        if inserted {
            debug!(job_id = %stored.id, %campaign_id, %run_at, "Batch enqueued");
        } else {
            debug!(job_id = %stored.id, %campaign_id, run_at = %stored.run_at, "Batch already queued");
        }
        Ok(stored)
    }

    /// Drop every job of a campaign that has not started yet
    pub async fn cancel_campaign(&self, campaign_id: CampaignId) -> Result<u64> {
        self.jobs.delete_pending_for_campaign(campaign_id).await
    }

    pub async fn pending_for_campaign(&self, campaign_id: CampaignId) -> Result<i64> {
        self.jobs.count_pending(None, Some(campaign_id)).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            campaigns: self.jobs.count_pending(Some(CAMPAIGN_QUEUE), None).await?,
            emails: self.jobs.count_pending(Some(EMAIL_QUEUE), None).await?,
            next_due_at: self.jobs.next_due_at(None).await?,
        })
    }
}

/// Calculate exponential backoff for retries
pub fn calculate_backoff(attempts: i32) -> Duration {
    // Base: 1 minute, max: 4 hours
    let exponent = attempts.clamp(0, 16) as u32;
    let minutes = std::cmp::min(2_i64.pow(exponent), 240);
    Duration::minutes(minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailramp_storage::memory::MemoryStore;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn test_calculate_backoff() {
        assert_eq!(calculate_backoff(0), Duration::minutes(1));
        assert_eq!(calculate_backoff(1), Duration::minutes(2));
        assert_eq!(calculate_backoff(2), Duration::minutes(4));
        assert_eq!(calculate_backoff(3), Duration::minutes(8));
        assert_eq!(calculate_backoff(10), Duration::minutes(240)); // Max capped at 4 hours
        assert_eq!(calculate_backoff(i32::MAX), Duration::minutes(240));
    }

    #[test]
    fn test_payload_format() {
        let campaign_id = Uuid::nil();
        let job = CampaignJob::ProcessBatch { campaign_id };
        assert_eq!(
            serde_json::to_value(&job).unwrap(),
            serde_json::json!({
                "type": "process_batch",
                "campaign_id": "00000000-0000-0000-0000-000000000000"
            })
        );
        assert_eq!(job.queue(), CAMPAIGN_QUEUE);
    }

    #[tokio::test]
    async fn test_enqueue_and_cancel() {
        let store = MemoryStore::new();
        let queue = JobQueue::new(Arc::new(store.clone())).with_max_attempts(3);
        let campaign_id = Uuid::new_v4();
        let now = Utc::now();

        let job = queue
            .enqueue_at(
                CampaignJob::SendEmail {
                    campaign_id,
                    recipient_id: Uuid::new_v4(),
                },
                now,
            )
            .await
            .unwrap();
        assert_eq!(job.queue, EMAIL_QUEUE);
        assert_eq!(job.max_attempts, 3);

        queue
            .enqueue_at(CampaignJob::ProcessBatch { campaign_id }, now + Duration::hours(1))
            .await
            .unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!((stats.campaigns, stats.emails), (1, 1));
        assert_eq!(stats.next_due_at, Some(now));

        assert_eq!(queue.cancel_campaign(campaign_id).await.unwrap(), 2);
        assert_eq!(queue.pending_for_campaign(campaign_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_jobs_are_not_duplicated() {
        let store = MemoryStore::new();
        let queue = JobQueue::new(Arc::new(store.clone()));
        let campaign_id = Uuid::new_v4();
        let now = Utc::now();

        let first = queue
            .enqueue_batch(campaign_id, now + Duration::hours(1))
            .await
            .unwrap();
        let second = queue.enqueue_batch(campaign_id, now).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.run_at, now);

        // sends are never deduplicated
        for _ in 0..2 {
            queue
                .enqueue_at(
                    CampaignJob::SendEmail {
                        campaign_id,
                        recipient_id: Uuid::new_v4(),
                    },
                    now,
                )
                .await
                .unwrap();
        }

        let stats = queue.stats().await.unwrap();
        assert_eq!((stats.campaigns, stats.emails), (1, 2));
    }
}
