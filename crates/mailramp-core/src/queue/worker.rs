//! Queue Worker - Polls one queue and runs its jobs

use super::jobs::{calculate_backoff, CampaignJob};
use async_trait::async_trait;
use mailramp_common::Clock;
use mailramp_storage::models::Job;
use mailramp_storage::repository::JobRepository;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{debug, error, info, warn};

/// Executes one job; an error hands the job back to the queue for a retry
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: CampaignJob) -> anyhow::Result<()>;
}

/// Queue Worker
pub struct QueueWorker {
    queue: &'static str,
    jobs: Arc<dyn JobRepository>,
    handler: Arc<dyn JobHandler>,
    clock: Arc<dyn Clock>,
    /// Maximum concurrent jobs
    concurrency_limit: usize,
    /// Jobs claimed per poll
    batch_size: i64,
    /// Interval between polls (seconds)
    poll_interval_secs: u64,
}

impl QueueWorker {
    pub fn new(
        queue: &'static str,
        jobs: Arc<dyn JobRepository>,
        handler: Arc<dyn JobHandler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            jobs,
            handler,
            clock,
            concurrency_limit: 1,
            batch_size: 50,
            poll_interval_secs: 1,
        }
    }

    /// Set concurrency limit
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    /// Set batch size
    pub fn with_batch_size(mut self, size: i64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set poll interval
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs.max(1);
        self
    }

    pub fn queue(&self) -> &'static str {
        self.queue
    }

    /// Run the worker until the task is aborted
    pub async fn run(&self) {
        let mut ticker = interval(TokioDuration::from_secs(self.poll_interval_secs));

        info!(
            "Queue worker '{}' started (concurrency: {}, batch: {}, interval: {}s)",
            self.queue, self.concurrency_limit, self.batch_size, self.poll_interval_secs
        );

        loop {
            ticker.tick().await;

            if let Err(e) = self.run_once().await {
                error!("Error processing queue '{}': {}", self.queue, e);
            }
        }
    }

    /// Claim and run the jobs that are due now; returns how many ran
    pub async fn run_once(&self) -> anyhow::Result<usize> {
        let now = self.clock.now();
        let jobs = self.jobs.claim_due(self.queue, now, self.batch_size).await?;

        if jobs.is_empty() {
            return Ok(0);
        }

        let count = jobs.len();
        debug!("Processing {} jobs from '{}'", count, self.queue);

        if self.concurrency_limit == 1 {
            for job in jobs {
                Self::process_job(&self.jobs, &self.handler, &self.clock, job).await;
            }
            return Ok(count);
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let mut handles = Vec::with_capacity(count);

        for job in jobs {
            let permit = semaphore.clone().acquire_owned().await?;
            let repo = self.jobs.clone();
            let handler = self.handler.clone();
            let clock = self.clock.clone();

            handles.push(tokio::spawn(async move {
                Self::process_job(&repo, &handler, &clock, job).await;
                drop(permit);
            }));
        }

        // Wait for all tasks to complete
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Task error: {}", e);
            }
        }

        Ok(count)
    }

    /// Process a single job
    async fn process_job(
        repo: &Arc<dyn JobRepository>,
        handler: &Arc<dyn JobHandler>,
        clock: &Arc<dyn Clock>,
        job: Job,
    ) {
        let job_id = job.id;

        // Parse job payload
        let payload: CampaignJob = match serde_json::from_value(job.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to parse job {} payload: {}", job_id, e);
                if let Err(e) = repo.fail(job_id, &e.to_string(), clock.now()).await {
                    error!("Failed to mark job {} as failed: {}", job_id, e);
                }
                return;
            }
        };

        match handler.handle(payload).await {
            Ok(()) => {
                if let Err(e) = repo.complete(job_id, clock.now()).await {
                    error!("Failed to mark job {} as completed: {}", job_id, e);
                }
            }
            Err(e) => {
                warn!("Job {} failed: {}", job_id, e);

                let attempts = job.attempts + 1;
                let result = if attempts >= job.max_attempts {
                    error!("Job {} exceeded max attempts, marking as failed", job_id);
                    repo.fail(job_id, &e.to_string(), clock.now()).await
                } else {
                    // Schedule retry with exponential backoff
                    let run_at = clock.now() + calculate_backoff(attempts);
                    repo.retry(job_id, attempts, &e.to_string(), run_at).await
                };
                if let Err(e) = result {
                    error!("Failed to reschedule job {}: {}", job_id, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::jobs::{JobQueue, CAMPAIGN_QUEUE, EMAIL_QUEUE};
    use chrono::{Duration, TimeZone, Utc};
    use mailramp_common::ManualClock;
    use mailramp_storage::memory::MemoryStore;
    use mailramp_storage::models::NewJob;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Fails the first `failures` calls
    struct FlakyHandler {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, _job: CampaignJob) -> anyhow::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                anyhow::bail!("database unavailable");
            }
            Ok(())
        }
    }

    fn setup(failures: usize) -> (MemoryStore, Arc<ManualClock>, Arc<FlakyHandler>, QueueWorker) {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap(),
        ));
        let handler = Arc::new(FlakyHandler {
            failures,
            calls: AtomicUsize::new(0),
        });
        let worker = QueueWorker::new(
            EMAIL_QUEUE,
            Arc::new(store.clone()),
            handler.clone(),
            clock.clone(),
        )
        .with_concurrency_limit(4);
        (store, clock, handler, worker)
    }

    #[tokio::test]
    async fn test_runs_due_jobs_only() {
        let (store, clock, handler, worker) = setup(0);
        let queue = JobQueue::new(Arc::new(store.clone()));
        let campaign_id = Uuid::new_v4();

        for offset in [0, 10, 3600] {
            queue
                .enqueue_at(
                    CampaignJob::SendEmail {
                        campaign_id,
                        recipient_id: Uuid::new_v4(),
                    },
                    clock.now() + Duration::seconds(offset),
                )
                .await
                .unwrap();
        }
        queue
            .enqueue_at(CampaignJob::ProcessBatch { campaign_id }, clock.now())
            .await
            .unwrap();

        clock.advance(Duration::seconds(10));
        assert_eq!(worker.run_once().await.unwrap(), 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(worker.run_once().await.unwrap(), 0);

        // the campaign queue job is untouched
        assert_eq!(
            store.count_pending(Some(CAMPAIGN_QUEUE), None).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_failed_job_retries_with_backoff() {
        let (store, clock, _handler, worker) = setup(1);
        store
            .enqueue(NewJob {
                queue: EMAIL_QUEUE.to_string(),
                payload: serde_json::to_value(CampaignJob::ProcessBatch {
                    campaign_id: Uuid::new_v4(),
                })
                .unwrap(),
                campaign_id: None,
                run_at: clock.now(),
                max_attempts: 3,
            })
            .await
            .unwrap();

        assert_eq!(worker.run_once().await.unwrap(), 1);
        let pending = store.list_pending(None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].run_at, clock.now() + Duration::minutes(2));
        assert_eq!(pending[0].last_error.as_deref(), Some("database unavailable"));

        clock.advance(Duration::minutes(2));
        assert_eq!(worker.run_once().await.unwrap(), 1);
        assert!(store.list_pending(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_and_malformed_jobs_fail() {
        let (store, clock, _handler, worker) = setup(usize::MAX);
        for payload in [
            serde_json::json!({"type": "unknown"}),
            serde_json::to_value(CampaignJob::ProcessBatch {
                campaign_id: Uuid::new_v4(),
            })
            .unwrap(),
        ] {
            store
                .enqueue(NewJob {
                    queue: EMAIL_QUEUE.to_string(),
                    payload,
                    campaign_id: None,
                    run_at: clock.now(),
                    max_attempts: 1,
                })
                .await
                .unwrap();
        }

        assert_eq!(worker.run_once().await.unwrap(), 2);
        assert!(store.list_pending(None).await.unwrap().is_empty());
        assert_eq!(store.count_pending(None, None).await.unwrap(), 0);
    }
}
