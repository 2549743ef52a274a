//! Engine - Wires the sending components onto one set of stores

use crate::business_hours::BusinessHours;
use crate::campaign::{CampaignManager, CampaignScheduler};
use crate::delivery::{DeliveryAdapter, MailTransport};
use crate::metrics::Metrics;
use crate::queue::{JobHandler, JobQueue, QueueWorker, CAMPAIGN_QUEUE, EMAIL_QUEUE};
use crate::rate_limiter::RateLimiter;
use crate::suppression::SuppressionManager;
use crate::tracking::{TokenSigner, TrackingService};
use crate::variation::VariationEngine;
use crate::warmup::WarmupGovernor;
use crate::webhooks::WebhookNormalizer;
use anyhow::Context;
use chrono::Duration;
use mailramp_common::{Clock, Config};
use mailramp_storage::Stores;
use std::sync::Arc;
use tracing::{info, warn};

/// Every long-lived component of the sending engine
pub struct Engine {
    pub config: Config,
    pub stores: Stores,
    pub clock: Arc<dyn Clock>,
    pub metrics: Metrics,
    pub business_hours: BusinessHours,
    pub queue: JobQueue,
    pub rate_limiter: Arc<RateLimiter>,
    pub warmup: Arc<WarmupGovernor>,
    pub suppression: Arc<SuppressionManager>,
    pub tracking: Arc<TrackingService>,
    pub variations: Arc<VariationEngine>,
    pub delivery: Arc<DeliveryAdapter>,
    pub campaigns: Arc<CampaignManager>,
    pub scheduler: Arc<CampaignScheduler>,
    pub webhooks: Arc<WebhookNormalizer>,
}

impl Engine {
    pub fn new(
        config: Config,
        stores: Stores,
        transport: Arc<dyn MailTransport>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let metrics = Metrics::new().context("Failed to register metrics")?;
        let business_hours = BusinessHours::new(&config.business_hours);

        let tokens = config
            .tracking
            .unsubscribe_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|secret| TokenSigner::new(secret, Duration::hours(config.tracking.token_ttl_hours)));
        if tokens.is_none() {
            warn!("No unsubscribe secret configured, unsubscribe links use tracking ids");
        }

        let queue = JobQueue::new(stores.jobs.clone());

        let rate_limiter = Arc::new(
            RateLimiter::new(
                stores.rate_counters.clone(),
                stores.sender_configs.clone(),
                business_hours.clone(),
            )
            .with_default_limits(
                config.scheduler.default_hourly_limit,
                config.scheduler.default_daily_limit,
            ),
        );

        let warmup = Arc::new(WarmupGovernor::new(
            stores.warmups.clone(),
            clock.clone(),
            business_hours.clone(),
            config.warmup.clone(),
        ));

        let suppression = Arc::new(SuppressionManager::new(
            stores.suppressions.clone(),
            stores.recipients.clone(),
            clock.clone(),
            config.suppression.clone(),
        ));

        let tracking = Arc::new(TrackingService::new(
            stores.campaigns.clone(),
            stores.recipients.clone(),
            stores.activities.clone(),
            stores.jobs.clone(),
            suppression.clone(),
            tokens.clone(),
            clock.clone(),
        ));

        let variations = Arc::new(VariationEngine::new(config.variation.clone()));

        let delivery = Arc::new(DeliveryAdapter::new(
            transport,
            variations.clone(),
            tokens,
            clock.clone(),
            &config,
        ));

        let campaigns = Arc::new(CampaignManager::new(
            stores.campaigns.clone(),
            stores.recipients.clone(),
            variations.clone(),
            clock.clone(),
            config.scheduler.clone(),
        ));

        let scheduler = Arc::new(CampaignScheduler::new(
            stores.campaigns.clone(),
            stores.recipients.clone(),
            queue.clone(),
            rate_limiter.clone(),
            warmup.clone(),
            suppression.clone(),
            tracking.clone(),
            delivery.clone(),
            metrics.clone(),
            business_hours.clone(),
            clock.clone(),
            config.scheduler.clone(),
        ));

        let webhooks = Arc::new(WebhookNormalizer::new(config.webhooks.clone()));

        Ok(Self {
            config,
            stores,
            clock,
            metrics,
            business_hours,
            queue,
            rate_limiter,
            warmup,
            suppression,
            tracking,
            variations,
            delivery,
            campaigns,
            scheduler,
            webhooks,
        })
    }

    /// Batch worker and send worker
    pub fn workers(&self) -> (QueueWorker, QueueWorker) {
        let handler: Arc<dyn JobHandler> = self.scheduler.clone();
        let poll = self.config.scheduler.poll_interval_secs;

        let batches = QueueWorker::new(
            CAMPAIGN_QUEUE,
            self.stores.jobs.clone(),
            handler.clone(),
            self.clock.clone(),
        )
        .with_poll_interval(poll);

        let sends = QueueWorker::new(EMAIL_QUEUE, self.stores.jobs.clone(), handler, self.clock.clone())
            .with_concurrency_limit(self.config.scheduler.send_concurrency)
            .with_poll_interval(poll);

        (batches, sends)
    }

    /// Put jobs left running by a previous process back on the queue and
    /// return recipients it left mid-send to `pending`
    pub async fn recover(&self) -> mailramp_common::Result<u64> {
        let reset = self.stores.jobs.reset_running().await?;
        if reset > 0 {
            info!(reset, "Recovered interrupted jobs");
        }

        let now = self.clock.now();
        let released = self
            .stores
            .recipients
            .release_stale_sending(None, now, now)
            .await?;
        if released > 0 {
            warn!(released, "Recipients interrupted mid-send returned to pending");
        }

        Ok(reset + released)
    }

    /// Drop expired rate counters and old activities
    pub async fn run_maintenance(&self) -> mailramp_common::Result<()> {
        let counters = self
            .rate_limiter
            .cleanup_old_counters(self.clock.now())
            .await?;
        let activities = self
            .tracking
            .cleanup_activities(self.config.tracking.activity_retention_days)
            .await?;

        info!(counters, activities, "Maintenance completed");
        Ok(())
    }

    /// Run maintenance on the configured interval
    pub async fn maintenance_loop(self: Arc<Self>) {
        let secs = self.config.scheduler.maintenance_interval_secs.max(1);
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(secs));

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_maintenance().await {
                warn!("Maintenance failed: {}", e);
            }
        }
    }
}
