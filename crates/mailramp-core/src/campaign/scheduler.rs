//! Campaign Scheduler - Admits recipients in paced batches and sends them

use super::pacing::{humanized_offsets, Pacing};
use super::CampaignError;
use crate::business_hours::BusinessHours;
use crate::delivery::{DeliveryAdapter, TransportError};
use crate::metrics::Metrics;
use crate::queue::{calculate_backoff, CampaignJob, JobHandler, JobQueue};
use crate::rate_limiter::RateLimiter;
use crate::suppression::{SkipReason, SuppressionManager};
use crate::tracking::TrackingService;
use crate::warmup::{classify, WarmupDecision, WarmupGovernor};
use crate::webhooks::BounceEvent;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mailramp_common::config::SchedulerConfig;
use mailramp_common::types::{CampaignId, RecipientId, TenantId};
use mailramp_common::Clock;
use mailramp_storage::models::{
    BounceKind, Campaign, CampaignRecipient, CampaignStatus, MailboxProvider, RecipientStatus,
    WarmupSchedule,
};
use mailramp_storage::repository::{CampaignRepository, RecipientRepository};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pending rows read per page when admitting by provider share
const PROVIDER_SCAN_PAGE: i64 = 500;

/// Pending rows scanned at most per warm-up batch
const PROVIDER_SCAN_LIMIT: i64 = 5_000;

/// What a batch job did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The campaign is not sending
    Skipped,
    /// A limit refused admission; the next batch runs at `until`
    Deferred {
        reason: &'static str,
        until: DateTime<Utc>,
    },
    Admitted {
        count: usize,
        next_batch_at: DateTime<Utc>,
    },
    /// Nothing pending but sends are still outstanding
    Draining { until: DateTime<Utc> },
    Completed,
}

/// What a send job did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing to do for this recipient
    Skipped,
    /// Returned to `pending` for a later batch
    Released,
    Suppressed(SkipReason),
    Sent { message_id: String },
    RetryScheduled { at: DateTime<Utc> },
    Bounced,
    Failed,
}

/// Campaign Scheduler
pub struct CampaignScheduler {
    campaigns: Arc<dyn CampaignRepository>,
    recipients: Arc<dyn RecipientRepository>,
    queue: JobQueue,
    rate_limiter: Arc<RateLimiter>,
    warmup: Arc<WarmupGovernor>,
    suppression: Arc<SuppressionManager>,
    tracking: Arc<TrackingService>,
    delivery: Arc<DeliveryAdapter>,
    metrics: Metrics,
    business_hours: BusinessHours,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl CampaignScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        recipients: Arc<dyn RecipientRepository>,
        queue: JobQueue,
        rate_limiter: Arc<RateLimiter>,
        warmup: Arc<WarmupGovernor>,
        suppression: Arc<SuppressionManager>,
        tracking: Arc<TrackingService>,
        delivery: Arc<DeliveryAdapter>,
        metrics: Metrics,
        business_hours: BusinessHours,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            campaigns,
            recipients,
            queue,
            rate_limiter,
            warmup,
            suppression,
            tracking,
            delivery,
            metrics,
            business_hours,
            clock,
            config,
        }
    }

    async fn campaign_for(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        self.campaigns
            .get_for_tenant(tenant_id, id)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    fn invalid(action: &'static str, campaign: &Campaign) -> CampaignError {
        CampaignError::InvalidState {
            action,
            status: campaign.status.clone(),
        }
    }

    /// Start sending now
    pub async fn start(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.campaign_for(tenant_id, id).await?;
        if !campaign.status_enum().is_some_and(|s| s.is_editable()) {
            return Err(Self::invalid("start", &campaign));
        }
        if campaign.total_recipients == 0 {
            return Err(CampaignError::NoRecipients);
        }

        let now = self.clock.now();
        let started = self
            .campaigns
            .transition(
                id,
                &[CampaignStatus::Draft, CampaignStatus::Scheduled],
                CampaignStatus::Sending,
                now,
            )
            .await?
            .ok_or_else(|| Self::invalid("start", &campaign))?;

        // a scheduled campaign already has its first batch queued
        self.queue.cancel_campaign(id).await?;
        self.queue.enqueue_batch(id, now).await?;

        info!(
            "Campaign {} started with {} recipients",
            id, started.total_recipients
        );
        Ok(started)
    }

    /// Start sending at `at`
    pub async fn schedule(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
        at: DateTime<Utc>,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.campaign_for(tenant_id, id).await?;
        if !campaign.status_enum().is_some_and(|s| s.is_editable()) {
            return Err(Self::invalid("schedule", &campaign));
        }
        if campaign.total_recipients == 0 {
            return Err(CampaignError::NoRecipients);
        }

        let scheduled = self
            .campaigns
            .set_schedule(id, at, self.clock.now())
            .await?
            .ok_or_else(|| Self::invalid("schedule", &campaign))?;

        self.queue.cancel_campaign(id).await?;
        self.queue.enqueue_batch(id, at).await?;

        info!("Campaign {} scheduled for {}", id, at);
        Ok(scheduled)
    }

    /// Stop admitting; queued sends are withdrawn
    pub async fn pause(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.campaign_for(tenant_id, id).await?;
        let now = self.clock.now();

        let paused = self
            .campaigns
            .transition(id, &[CampaignStatus::Sending], CampaignStatus::Paused, now)
            .await?
            .ok_or_else(|| Self::invalid("pause", &campaign))?;

        let withdrawn = self.queue.cancel_campaign(id).await?;
        let requeued = self.recipients.requeue_for_pause(id, now).await?;

        info!(
            "Campaign {} paused ({} jobs withdrawn, {} recipients requeued)",
            id, withdrawn, requeued
        );
        Ok(paused)
    }

    pub async fn resume(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.campaign_for(tenant_id, id).await?;
        let now = self.clock.now();

        let resumed = self
            .campaigns
            .transition(id, &[CampaignStatus::Paused], CampaignStatus::Sending, now)
            .await?
            .ok_or_else(|| Self::invalid("resume", &campaign))?;

        // a batch that was running during the pause may already have queued
        // its successor; the campaign keeps a single batch chain
        self.queue.enqueue_batch(id, now).await?;

        info!("Campaign {} resumed", id);
        Ok(resumed)
    }

    /// Delete a draft or scheduled campaign and its queued jobs
    pub async fn delete(&self, tenant_id: TenantId, id: CampaignId) -> Result<(), CampaignError> {
        let campaign = self.campaign_for(tenant_id, id).await?;
        if !campaign.status_enum().is_some_and(|s| s.is_editable()) {
            return Err(Self::invalid("delete", &campaign));
        }

        self.queue.cancel_campaign(id).await?;
        if !self.campaigns.delete(tenant_id, id).await? {
            return Err(Self::invalid("delete", &campaign));
        }

        info!("Campaign {} deleted", id);
        Ok(())
    }

    async fn defer(
        &self,
        campaign_id: CampaignId,
        reason: &'static str,
        until: DateTime<Utc>,
    ) -> Result<BatchOutcome, CampaignError> {
        self.queue.enqueue_batch(campaign_id, until).await?;
        self.metrics
            .admission_deferrals
            .with_label_values(&[reason])
            .inc();
        debug!(%campaign_id, reason, %until, "Batch deferred");
        Ok(BatchOutcome::Deferred { reason, until })
    }

    fn pacing(&self, campaign: &Campaign) -> Pacing {
        Pacing {
            delay_min_secs: campaign.delay_min_secs as i64,
            delay_max_secs: campaign.delay_max_secs as i64,
            pause_every: self.config.pause_every,
            pause_min_secs: self.config.pause_min_secs,
            pause_max_secs: self.config.pause_max_secs,
        }
    }

    /// Admit the next batch of a sending campaign
    pub async fn process_batch(&self, campaign_id: CampaignId) -> Result<BatchOutcome, CampaignError> {
        let now = self.clock.now();
        let Some(mut campaign) = self.campaigns.get(campaign_id).await? else {
            return Ok(BatchOutcome::Skipped);
        };

        if campaign.has_status(CampaignStatus::Scheduled) {
            match self
                .campaigns
                .transition(
                    campaign_id,
                    &[CampaignStatus::Scheduled],
                    CampaignStatus::Sending,
                    now,
                )
                .await?
            {
                Some(started) => {
                    info!("Scheduled campaign {} started", campaign_id);
                    campaign = started;
                }
                None => return Ok(BatchOutcome::Skipped),
            }
        }
        if !campaign.has_status(CampaignStatus::Sending) {
            debug!(%campaign_id, status = %campaign.status, "Batch for campaign that is not sending");
            return Ok(BatchOutcome::Skipped);
        }

        let stale = self
            .recipients
            .release_stale_sending(
                Some(campaign_id),
                now - Duration::seconds(self.config.stale_send_secs),
                now,
            )
            .await?;
        if stale > 0 {
            warn!(%campaign_id, stale, "Recipients stuck in sending returned to pending");
        }

        let outstanding = self.recipients.count_outstanding(campaign_id).await?;
        if outstanding.pending == 0 {
            return self.finish_or_drain(campaign_id, outstanding.in_flight, now).await;
        }

        // 1. Rate limits
        let quota = self.rate_limiter.remaining(&campaign, now).await?;
        if quota.per_day <= 0 {
            return self
                .defer(campaign_id, "daily_limit", self.business_hours.next_day_opening(now))
                .await;
        }
        if quota.per_hour <= 0 {
            return self
                .defer(campaign_id, "hourly_limit", self.rate_limiter.next_hour_window(now))
                .await;
        }

        let mut cap = quota.per_hour.min(quota.per_day);

        // 2. Warm-up
        let mut shares = None;
        let sender = self.rate_limiter.sender_config(campaign.tenant_id).await?;
        if let Some(ip) = sender.as_ref().and_then(|s| s.dedicated_ip.as_deref()) {
            match self.warmup.can_send(campaign.tenant_id, ip, now).await? {
                WarmupDecision::Denied { retry_at, .. } => {
                    return self.defer(campaign_id, "warmup", retry_at).await;
                }
                WarmupDecision::Allowed {
                    schedule,
                    remaining_today,
                } => {
                    cap = cap.min(remaining_today);
                    shares = Some(self.provider_shares(&schedule));
                }
                WarmupDecision::Unconstrained => {}
            }
        }

        // 3. Business hours
        if !self.business_hours.is_open(now) {
            return self
                .defer(campaign_id, "business_hours", self.business_hours.next_open(now))
                .await;
        }

        // 4. Sends admitted earlier and not finished yet use the same limits
        let in_flight = i32::try_from(outstanding.in_flight).unwrap_or(i32::MAX);
        let admit = campaign.batch_size.min(cap.saturating_sub(in_flight));
        if admit <= 0 {
            let until = now + Duration::seconds(self.config.drain_check_secs);
            return self.defer(campaign_id, "in_flight", until).await;
        }

        // 5. Admit the oldest pending recipients
        let by_provider = shares.is_some();
        let batch = match shares {
            Some(shares) => self.pending_within_shares(campaign_id, admit, shares).await?,
            None => self.recipients.fetch_pending(campaign_id, admit as i64).await?,
        };
        if batch.is_empty() {
            if by_provider {
                // every pending recipient belongs to a provider whose share is used up
                return self
                    .defer(
                        campaign_id,
                        "warmup_provider",
                        self.business_hours.next_day_opening(now),
                    )
                    .await;
            }
            return self.finish_or_drain(campaign_id, outstanding.in_flight, now).await;
        }

        let offsets = humanized_offsets(&mut rand::rng(), batch.len(), &self.pacing(&campaign));
        let mut admitted = 0usize;
        let mut last_send = now;

        for (recipient, offset) in batch.iter().zip(offsets) {
            let at = now + offset;
            if !self.recipients.mark_scheduled(recipient.id, at, now).await? {
                continue;
            }
            self.queue
                .enqueue_at(
                    CampaignJob::SendEmail {
                        campaign_id,
                        recipient_id: recipient.id,
                    },
                    at,
                )
                .await?;
            admitted += 1;
            last_send = last_send.max(at);
        }

        let mut next_batch_at = last_send + Duration::seconds(self.config.next_batch_gap_secs);
        if admitted as i32 >= quota.per_hour {
            next_batch_at = next_batch_at.max(self.rate_limiter.next_hour_window(now));
        }
        self.queue.enqueue_batch(campaign_id, next_batch_at).await?;

        self.metrics.batches_processed.inc();
        info!(
            "Campaign {}: admitted {} recipients, next batch at {}",
            campaign_id, admitted, next_batch_at
        );

        Ok(BatchOutcome::Admitted {
            count: admitted,
            next_batch_at,
        })
    }

    /// Sends each provider may still receive today under `schedule`
    fn provider_shares(&self, schedule: &WarmupSchedule) -> HashMap<MailboxProvider, i32> {
        [
            MailboxProvider::Gmail,
            MailboxProvider::Outlook,
            MailboxProvider::Yahoo,
            MailboxProvider::Other,
        ]
        .into_iter()
        .map(|provider| (provider, self.warmup.provider_allowance(schedule, provider)))
        .collect()
    }

    /// Oldest pending recipients whose provider still has a share left,
    /// skipping over providers that are used up
    async fn pending_within_shares(
        &self,
        campaign_id: CampaignId,
        limit: i32,
        mut shares: HashMap<MailboxProvider, i32>,
    ) -> Result<Vec<CampaignRecipient>, CampaignError> {
        let limit = limit.max(0) as usize;
        let mut picked = Vec::new();
        let mut offset = 0;

        while picked.len() < limit
            && offset < PROVIDER_SCAN_LIMIT
            && shares.values().any(|&left| left > 0)
        {
            let page = self
                .recipients
                .list_for_campaign(
                    campaign_id,
                    Some(RecipientStatus::Pending),
                    PROVIDER_SCAN_PAGE,
                    offset,
                )
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as i64;

            for recipient in page {
                let left = shares.entry(classify(&recipient.email)).or_insert(0);
                if *left > 0 {
                    *left -= 1;
                    picked.push(recipient);
                    if picked.len() == limit {
                        break;
                    }
                }
            }
        }

        Ok(picked)
    }

    async fn finish_or_drain(
        &self,
        campaign_id: CampaignId,
        in_flight: i64,
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome, CampaignError> {
        if in_flight > 0 {
            let until = now + Duration::seconds(self.config.drain_check_secs);
            self.queue.enqueue_batch(campaign_id, until).await?;
            debug!(%campaign_id, in_flight, "Waiting for outstanding sends");
            return Ok(BatchOutcome::Draining { until });
        }

        match self
            .campaigns
            .transition(campaign_id, &[CampaignStatus::Sending], CampaignStatus::Sent, now)
            .await?
        {
            Some(campaign) => {
                info!(
                    "Campaign {} completed: {} sent, {} failed",
                    campaign_id, campaign.sent_count, campaign.failed_count
                );
                Ok(BatchOutcome::Completed)
            }
            None => Ok(BatchOutcome::Skipped),
        }
    }

    /// Send to one admitted recipient
    pub async fn process_single_email(
        &self,
        campaign_id: CampaignId,
        recipient_id: RecipientId,
    ) -> Result<SendOutcome, CampaignError> {
        let now = self.clock.now();
        let Some(recipient) = self.recipients.get(recipient_id).await? else {
            return Ok(SendOutcome::Skipped);
        };
        if !recipient.is_pre_send() {
            debug!(%recipient_id, status = %recipient.status, "Recipient no longer awaiting send");
            return Ok(SendOutcome::Skipped);
        }

        let campaign = match self.campaigns.get(campaign_id).await? {
            Some(c) if c.has_status(CampaignStatus::Sending) => c,
            _ => {
                self.recipients.release_to_pending(recipient_id, now).await?;
                return Ok(SendOutcome::Released);
            }
        };

        let decision = self
            .suppression
            .should_skip_email(&recipient.email, Some(recipient.tenant_id))
            .await?;
        if let (true, Some(reason)) = (decision.skip, decision.reason) {
            let status = match reason {
                SkipReason::InvalidAddress => RecipientStatus::Failed,
                SkipReason::Unsubscribed => RecipientStatus::Unsubscribed,
                _ => RecipientStatus::Cancelled,
            };
            self.recipients
                .finish_skipped(recipient_id, status, reason.as_str(), now)
                .await?;
            self.metrics
                .emails_suppressed
                .with_label_values(&[reason.as_str()])
                .inc();
            debug!(%recipient_id, %reason, "Suppressed recipient skipped");
            return Ok(SendOutcome::Suppressed(reason));
        }

        let sender = self.rate_limiter.sender_config(campaign.tenant_id).await?;
        let dedicated_ip = sender.as_ref().and_then(|s| s.dedicated_ip.clone());
        if let Some(ip) = &dedicated_ip {
            let admitted = match self.warmup.can_send(campaign.tenant_id, ip, now).await? {
                WarmupDecision::Allowed { schedule, .. } => {
                    self.warmup
                        .provider_allowance(&schedule, classify(&recipient.email))
                        > 0
                }
                WarmupDecision::Unconstrained => true,
                WarmupDecision::Denied { .. } => false,
            };
            if !admitted {
                self.recipients.release_to_pending(recipient_id, now).await?;
                debug!(%recipient_id, ip = %ip, "Warm-up share exhausted, recipient released");
                return Ok(SendOutcome::Released);
            }
        }

        let Some(claimed) = self.recipients.claim_for_send(recipient_id, now).await? else {
            return Ok(SendOutcome::Skipped);
        };

        match self.delivery.deliver(&campaign, &claimed, sender.as_ref()).await {
            Ok(receipt) => {
                let done = self.clock.now();
                self.recipients
                    .mark_sent(recipient_id, &receipt.message_id, done)
                    .await?;
                self.rate_limiter.record_send(&campaign, done).await?;
                if let Some(ip) = &dedicated_ip {
                    self.warmup
                        .record_email_sent(campaign.tenant_id, ip, &claimed.email)
                        .await?;
                }
                self.metrics.emails_sent.inc();
                debug!(%recipient_id, message_id = %receipt.message_id, "Email sent");
                Ok(SendOutcome::Sent {
                    message_id: receipt.message_id,
                })
            }
            Err(TransportError::Rejected(reason)) => {
                let event = BounceEvent {
                    message_id: None,
                    email: claimed.email.clone(),
                    kind: BounceKind::Hard,
                    reason: Some(reason.clone()),
                    provider: "smtp".to_string(),
                };
                self.tracking.record_recipient_bounce(&claimed, &event).await?;
                self.metrics.emails_bounced.inc();
                warn!(%recipient_id, "Recipient rejected by relay: {}", reason);
                Ok(SendOutcome::Bounced)
            }
            Err(TransportError::Transient(error)) if claimed.attempts < self.config.max_attempts => {
                let failed_at = self.clock.now();
                let at = failed_at + calculate_backoff(claimed.attempts);
                self.recipients
                    .mark_failed(recipient_id, &error, Some(at), failed_at)
                    .await?;
                self.queue
                    .enqueue_at(
                        CampaignJob::SendEmail {
                            campaign_id,
                            recipient_id,
                        },
                        at,
                    )
                    .await?;
                self.metrics.emails_retried.inc();
                warn!(
                    %recipient_id,
                    attempt = claimed.attempts,
                    retry_at = %at,
                    "Temporary send failure: {}",
                    error
                );
                Ok(SendOutcome::RetryScheduled { at })
            }
            Err(e) => {
                self.recipients
                    .mark_failed(recipient_id, e.message(), None, self.clock.now())
                    .await?;
                self.metrics.emails_failed.inc();
                warn!(%recipient_id, attempts = claimed.attempts, "Send failed: {}", e);
                Ok(SendOutcome::Failed)
            }
        }
    }
}

#[async_trait]
impl JobHandler for CampaignScheduler {
    async fn handle(&self, job: CampaignJob) -> anyhow::Result<()> {
        match job {
            CampaignJob::ProcessBatch { campaign_id } => {
                self.process_batch(campaign_id).await?;
            }
            CampaignJob::SendEmail {
                campaign_id,
                recipient_id,
            } => {
                self.process_single_email(campaign_id, recipient_id).await?;
            }
        }
        Ok(())
    }
}
