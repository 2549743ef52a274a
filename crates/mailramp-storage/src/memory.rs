//! In-memory store
//!
//! Implements every repository trait over plain collections behind one
//! `tokio::sync::RwLock`. Used by `backend = "memory"` and by tests; the
//! semantics (guards, counters, scoping) mirror the PostgreSQL repositories.

use crate::models::*;
use crate::repository::{
    ActivityRepository, CampaignRepository, JobRepository, RateCounterRepository,
    RecipientRepository, SenderConfigRepository, SuppressionRepository, WarmupRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailramp_common::types::{CampaignId, JobId, RecipientId, TenantId, WarmupId};
use mailramp_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

type RateKey = (RateScope, Uuid, RateWindow, DateTime<Utc>);

#[derive(Default)]
struct MemoryState {
    campaigns: HashMap<CampaignId, Campaign>,
    /// Insertion order doubles as the `created_at, id` ordering
    recipients: Vec<CampaignRecipient>,
    activities: Vec<CampaignActivity>,
    bounces: Vec<BounceRecord>,
    unsubscribes: Vec<Unsubscribe>,
    warmups: Vec<WarmupSchedule>,
    sender_configs: HashMap<TenantId, SenderConfiguration>,
    rate_counters: HashMap<RateKey, i64>,
    jobs: Vec<Job>,
}

#[derive(Clone, Copy)]
enum Counter {
    Sent,
    Opened,
    Clicked,
    Bounced,
    Unsubscribed,
    Failed,
}

impl MemoryState {
    fn bump(&mut self, campaign_id: CampaignId, counter: Counter, now: DateTime<Utc>) {
        if let Some(campaign) = self.campaigns.get_mut(&campaign_id) {
            let field = match counter {
                Counter::Sent => &mut campaign.sent_count,
                Counter::Opened => &mut campaign.opened_count,
                Counter::Clicked => &mut campaign.clicked_count,
                Counter::Bounced => &mut campaign.bounced_count,
                Counter::Unsubscribed => &mut campaign.unsubscribed_count,
                Counter::Failed => &mut campaign.failed_count,
            };
            *field += 1;
            campaign.updated_at = now;
        }
    }

    fn recipient_mut(&mut self, id: RecipientId) -> Option<&mut CampaignRecipient> {
        self.recipients.iter_mut().find(|r| r.id == id)
    }
}

fn visible_to(entry_tenant: Option<TenantId>, tenant_id: Option<TenantId>) -> bool {
    entry_tenant.is_none() || (tenant_id.is_some() && entry_tenant == tenant_id)
}

fn pending_job(job: NewJob) -> Job {
    Job {
        id: Uuid::now_v7(),
        queue: job.queue,
        payload: job.payload,
        campaign_id: job.campaign_id,
        status: JobStatus::Pending.as_str().to_string(),
        attempts: 0,
        max_attempts: job.max_attempts,
        last_error: None,
        run_at: job.run_at,
        started_at: None,
        completed_at: None,
        created_at: Utc::now(),
    }
}

fn page<T: Clone>(items: impl Iterator<Item = T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

/// In-memory implementation of all stores
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CampaignRepository for MemoryStore {
    async fn create(&self, input: CreateCampaign, now: DateTime<Utc>) -> Result<Campaign> {
        let campaign = Campaign {
            id: Uuid::now_v7(),
            tenant_id: input.tenant_id,
            name: input.name,
            subject: input.subject,
            html_body: input.html_body,
            text_body: input.text_body,
            from_name: input.from_name,
            from_email: input.from_email,
            reply_to: input.reply_to,
            daily_limit: input.daily_limit,
            hourly_limit: input.hourly_limit,
            delay_min_secs: input.delay_min_secs,
            delay_max_secs: input.delay_max_secs,
            batch_size: input.batch_size,
            status: CampaignStatus::Draft.as_str().to_string(),
            scheduled_at: None,
            started_at: None,
            paused_at: None,
            completed_at: None,
            total_recipients: 0,
            sent_count: 0,
            opened_count: 0,
            clicked_count: 0,
            bounced_count: 0,
            unsubscribed_count: 0,
            failed_count: 0,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.write().await;
        state.campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.state.read().await.campaigns.get(&id).cloned())
    }

    async fn get_for_tenant(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Option<Campaign>> {
        Ok(self
            .state
            .read()
            .await
            .campaigns
            .get(&id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_for_tenant(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        let state = self.state.read().await;
        let mut campaigns: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .filter(|c| status.map_or(true, |s| c.has_status(s)))
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(page(campaigns.into_iter(), limit, offset))
    }

    async fn update(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
        input: UpdateCampaign,
        now: DateTime<Utc>,
    ) -> Result<Option<Campaign>> {
        let mut state = self.state.write().await;
        let Some(campaign) = state.campaigns.get_mut(&id) else {
            return Ok(None);
        };
        let editable = campaign.status_enum().map_or(false, |s| s.is_editable());
        if campaign.tenant_id != tenant_id || !editable {
            return Ok(None);
        }

        if let Some(v) = input.name {
            campaign.name = v;
        }
        if let Some(v) = input.subject {
            campaign.subject = v;
        }
        if let Some(v) = input.html_body {
            campaign.html_body = v;
        }
        if input.text_body.is_some() {
            campaign.text_body = input.text_body;
        }
        if input.from_name.is_some() {
            campaign.from_name = input.from_name;
        }
        if let Some(v) = input.from_email {
            campaign.from_email = v;
        }
        if input.reply_to.is_some() {
            campaign.reply_to = input.reply_to;
        }
        if let Some(v) = input.daily_limit {
            campaign.daily_limit = v;
        }
        if let Some(v) = input.hourly_limit {
            campaign.hourly_limit = v;
        }
        if let Some(v) = input.delay_min_secs {
            campaign.delay_min_secs = v;
        }
        if let Some(v) = input.delay_max_secs {
            campaign.delay_max_secs = v;
        }
        if let Some(v) = input.batch_size {
            campaign.batch_size = v;
        }
        campaign.updated_at = now;

        Ok(Some(campaign.clone()))
    }

    async fn delete(&self, tenant_id: TenantId, id: CampaignId) -> Result<bool> {
        let mut state = self.state.write().await;
        let deletable = state
            .campaigns
            .get(&id)
            .filter(|c| c.tenant_id == tenant_id)
            .and_then(|c| c.status_enum())
            .map_or(false, |s| s.is_editable());
        if !deletable {
            return Ok(false);
        }

        state.campaigns.remove(&id);
        state.recipients.retain(|r| r.campaign_id != id);
        Ok(true)
    }

    async fn transition(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Campaign>> {
        let mut state = self.state.write().await;
        let Some(campaign) = state.campaigns.get_mut(&id) else {
            return Ok(None);
        };
        if !from.iter().any(|s| campaign.has_status(*s)) {
            return Ok(None);
        }

        campaign.status = to.as_str().to_string();
        match to {
            CampaignStatus::Sending => {
                campaign.started_at.get_or_insert(now);
            }
            CampaignStatus::Paused => campaign.paused_at = Some(now),
            CampaignStatus::Sent => campaign.completed_at = Some(now),
            _ => {}
        }
        campaign.updated_at = now;

        Ok(Some(campaign.clone()))
    }

    async fn set_schedule(
        &self,
        id: CampaignId,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Campaign>> {
        let mut state = self.state.write().await;
        let Some(campaign) = state.campaigns.get_mut(&id) else {
            return Ok(None);
        };
        if !campaign.status_enum().map_or(false, |s| s.is_editable()) {
            return Ok(None);
        }

        campaign.status = CampaignStatus::Scheduled.as_str().to_string();
        campaign.scheduled_at = Some(at);
        campaign.updated_at = now;
        Ok(Some(campaign.clone()))
    }
}

#[async_trait]
impl RecipientRepository for MemoryStore {
    async fn add(
        &self,
        campaign_id: CampaignId,
        tenant_id: TenantId,
        recipients: Vec<NewRecipient>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        if !state.campaigns.contains_key(&campaign_id) {
            return Err(Error::NotFound(format!("Campaign {}", campaign_id)));
        }

        let mut count = 0u64;
        for recipient in recipients {
            let exists = state
                .recipients
                .iter()
                .any(|r| r.campaign_id == campaign_id && r.email == recipient.email);
            if exists {
                continue;
            }

            let fields = if recipient.fields.is_null() {
                serde_json::json!({})
            } else {
                recipient.fields
            };

            state.recipients.push(CampaignRecipient {
                id: Uuid::now_v7(),
                campaign_id,
                tenant_id,
                email: recipient.email,
                name: recipient.name,
                fields,
                tracking_id: Uuid::new_v4().simple().to_string(),
                status: RecipientStatus::Pending.as_str().to_string(),
                attempts: 0,
                last_error: None,
                provider_message_id: None,
                next_attempt_at: None,
                scheduled_at: None,
                sent_at: None,
                first_opened_at: None,
                first_clicked_at: None,
                bounced_at: None,
                unsubscribed_at: None,
                created_at: now,
                updated_at: now,
            });
            count += 1;
        }

        if let Some(campaign) = state.campaigns.get_mut(&campaign_id) {
            campaign.total_recipients += count as i32;
            campaign.updated_at = now;
        }
        Ok(count)
    }

    async fn get(&self, id: RecipientId) -> Result<Option<CampaignRecipient>> {
        let state = self.state.read().await;
        Ok(state.recipients.iter().find(|r| r.id == id).cloned())
    }

    async fn get_by_tracking_id(&self, tracking_id: &str) -> Result<Option<CampaignRecipient>> {
        let state = self.state.read().await;
        Ok(state
            .recipients
            .iter()
            .find(|r| r.tracking_id == tracking_id)
            .cloned())
    }

    async fn get_by_provider_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<CampaignRecipient>> {
        let state = self.state.read().await;
        Ok(state
            .recipients
            .iter()
            .find(|r| r.provider_message_id.as_deref() == Some(message_id))
            .cloned())
    }

    async fn get_by_campaign_email(
        &self,
        campaign_id: CampaignId,
        email: &str,
    ) -> Result<Option<CampaignRecipient>> {
        let state = self.state.read().await;
        Ok(state
            .recipients
            .iter()
            .find(|r| r.campaign_id == campaign_id && r.email == email)
            .cloned())
    }

    async fn list_for_campaign(
        &self,
        campaign_id: CampaignId,
        status: Option<RecipientStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CampaignRecipient>> {
        let state = self.state.read().await;
        Ok(page(
            state
                .recipients
                .iter()
                .filter(|r| r.campaign_id == campaign_id)
                .filter(|r| status.map_or(true, |s| r.has_status(s)))
                .cloned(),
            limit,
            offset,
        ))
    }

    async fn fetch_pending(
        &self,
        campaign_id: CampaignId,
        limit: i64,
    ) -> Result<Vec<CampaignRecipient>> {
        let state = self.state.read().await;
        Ok(page(
            state
                .recipients
                .iter()
                .filter(|r| r.campaign_id == campaign_id && r.has_status(RecipientStatus::Pending))
                .cloned(),
            limit,
            0,
        ))
    }

    async fn mark_scheduled(
        &self,
        id: RecipientId,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.recipient_mut(id) {
            Some(r) if r.has_status(RecipientStatus::Pending) => {
                r.status = RecipientStatus::Scheduled.as_str().to_string();
                r.scheduled_at = Some(at);
                r.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_for_send(
        &self,
        id: RecipientId,
        now: DateTime<Utc>,
    ) -> Result<Option<CampaignRecipient>> {
        let mut state = self.state.write().await;
        match state.recipient_mut(id) {
            Some(r) if r.is_pre_send() => {
                r.status = RecipientStatus::Sending.as_str().to_string();
                r.attempts += 1;
                r.next_attempt_at = None;
                r.updated_at = now;
                Ok(Some(r.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_sent(
        &self,
        id: RecipientId,
        provider_message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CampaignRecipient>> {
        let mut state = self.state.write().await;
        let updated = match state.recipient_mut(id) {
            Some(r) if r.has_status(RecipientStatus::Sending) && r.sent_at.is_none() => {
                r.status = RecipientStatus::Sent.as_str().to_string();
                r.sent_at = Some(now);
                r.provider_message_id = Some(provider_message_id.to_string());
                r.last_error = None;
                r.next_attempt_at = None;
                r.updated_at = now;
                r.clone()
            }
            _ => return Ok(None),
        };
        state.bump(updated.campaign_id, Counter::Sent, now);
        Ok(Some(updated))
    }

    async fn mark_failed(
        &self,
        id: RecipientId,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<CampaignRecipient>> {
        let mut state = self.state.write().await;
        let updated = match state.recipient_mut(id) {
            Some(r) if r.has_status(RecipientStatus::Sending) => {
                r.status = RecipientStatus::Failed.as_str().to_string();
                r.last_error = Some(error.to_string());
                r.next_attempt_at = next_attempt_at;
                r.updated_at = now;
                r.clone()
            }
            _ => return Ok(None),
        };
        if next_attempt_at.is_none() {
            state.bump(updated.campaign_id, Counter::Failed, now);
        }
        Ok(Some(updated))
    }

    async fn release_to_pending(&self, id: RecipientId, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.recipient_mut(id) {
            Some(r)
                if r.has_status(RecipientStatus::Scheduled)
                    || r.has_status(RecipientStatus::Sending)
                    || r.is_retryable() =>
            {
                r.status = RecipientStatus::Pending.as_str().to_string();
                r.scheduled_at = None;
                r.next_attempt_at = None;
                r.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish_skipped(
        &self,
        id: RecipientId,
        status: RecipientStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let campaign_id = match state.recipient_mut(id) {
            Some(r) if r.is_pre_send() => {
                r.status = status.as_str().to_string();
                r.last_error = Some(reason.to_string());
                r.next_attempt_at = None;
                r.updated_at = now;
                r.campaign_id
            }
            _ => return Ok(false),
        };
        if status == RecipientStatus::Failed {
            state.bump(campaign_id, Counter::Failed, now);
        }
        Ok(true)
    }

    async fn record_open(&self, id: RecipientId, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        let campaign_id = match state.recipient_mut(id) {
            Some(r) if r.first_opened_at.is_none() => {
                r.first_opened_at = Some(now);
                if r.has_status(RecipientStatus::Sent) {
                    r.status = RecipientStatus::Opened.as_str().to_string();
                }
                r.updated_at = now;
                r.campaign_id
            }
            _ => return Ok(false),
        };
        state.bump(campaign_id, Counter::Opened, now);
        Ok(true)
    }

    async fn record_click(&self, id: RecipientId, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        let campaign_id = match state.recipient_mut(id) {
            Some(r) if r.first_clicked_at.is_none() => {
                r.first_clicked_at = Some(now);
                if r.has_status(RecipientStatus::Sent) || r.has_status(RecipientStatus::Opened) {
                    r.status = RecipientStatus::Clicked.as_str().to_string();
                }
                r.updated_at = now;
                r.campaign_id
            }
            _ => return Ok(false),
        };
        state.bump(campaign_id, Counter::Clicked, now);
        Ok(true)
    }

    async fn record_bounce(
        &self,
        id: RecipientId,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let campaign_id = match state.recipient_mut(id) {
            Some(r) if r.bounced_at.is_none() => {
                r.status = RecipientStatus::Bounced.as_str().to_string();
                r.bounced_at = Some(now);
                if let Some(reason) = reason {
                    r.last_error = Some(reason.to_string());
                }
                r.next_attempt_at = None;
                r.updated_at = now;
                r.campaign_id
            }
            _ => return Ok(false),
        };
        state.bump(campaign_id, Counter::Bounced, now);
        Ok(true)
    }

    async fn record_unsubscribe(&self, id: RecipientId, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        let campaign_id = match state.recipient_mut(id) {
            Some(r) if r.unsubscribed_at.is_none() => {
                r.unsubscribed_at = Some(now);
                if !r.has_status(RecipientStatus::Bounced) {
                    r.status = RecipientStatus::Unsubscribed.as_str().to_string();
                }
                r.next_attempt_at = None;
                r.updated_at = now;
                r.campaign_id
            }
            _ => return Ok(false),
        };
        state.bump(campaign_id, Counter::Unsubscribed, now);
        Ok(true)
    }

    async fn cancel_pending_for_email(
        &self,
        email: &str,
        tenant_id: Option<TenantId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut count = 0u64;
        for r in state.recipients.iter_mut() {
            let in_scope = tenant_id.map_or(true, |t| r.tenant_id == t);
            let waiting =
                r.has_status(RecipientStatus::Pending) || r.has_status(RecipientStatus::Scheduled);
            if r.email == email && in_scope && waiting {
                r.status = RecipientStatus::Cancelled.as_str().to_string();
                r.last_error = Some(reason.to_string());
                r.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn requeue_for_pause(&self, campaign_id: CampaignId, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut count = 0u64;
        for r in state.recipients.iter_mut() {
            if r.campaign_id == campaign_id
                && (r.has_status(RecipientStatus::Scheduled) || r.is_retryable())
            {
                r.status = RecipientStatus::Pending.as_str().to_string();
                r.scheduled_at = None;
                r.next_attempt_at = None;
                r.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn release_stale_sending(
        &self,
        campaign_id: Option<CampaignId>,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut count = 0u64;
        for r in state.recipients.iter_mut() {
            if campaign_id.map_or(true, |c| r.campaign_id == c)
                && r.has_status(RecipientStatus::Sending)
                && r.updated_at <= claimed_before
            {
                r.status = RecipientStatus::Pending.as_str().to_string();
                r.scheduled_at = None;
                r.next_attempt_at = None;
                r.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn count_outstanding(&self, campaign_id: CampaignId) -> Result<OutstandingCounts> {
        let state = self.state.read().await;
        let mut counts = OutstandingCounts::default();
        for r in state.recipients.iter().filter(|r| r.campaign_id == campaign_id) {
            if r.has_status(RecipientStatus::Pending) {
                counts.pending += 1;
            } else if r.has_status(RecipientStatus::Scheduled)
                || r.has_status(RecipientStatus::Sending)
                || r.is_retryable()
            {
                counts.in_flight += 1;
            }
        }
        Ok(counts)
    }

    async fn count_by_status(&self, campaign_id: CampaignId) -> Result<Vec<(String, i64)>> {
        let state = self.state.read().await;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for r in state.recipients.iter().filter(|r| r.campaign_id == campaign_id) {
            *counts.entry(r.status.clone()).or_default() += 1;
        }
        let mut counts: Vec<(String, i64)> = counts.into_iter().collect();
        counts.sort();
        Ok(counts)
    }
}

#[async_trait]
impl ActivityRepository for MemoryStore {
    async fn append(&self, activity: NewActivity) -> Result<CampaignActivity> {
        let entry = CampaignActivity {
            id: Uuid::now_v7(),
            campaign_id: activity.campaign_id,
            recipient_id: activity.recipient_id,
            kind: activity.kind.as_str().to_string(),
            ip_address: activity.ip_address,
            user_agent: activity.user_agent,
            url: activity.url,
            reason: activity.reason,
            occurred_at: activity.occurred_at,
        };
        self.state.write().await.activities.push(entry.clone());
        Ok(entry)
    }

    async fn list_for_recipient(&self, recipient_id: RecipientId) -> Result<Vec<CampaignActivity>> {
        let state = self.state.read().await;
        Ok(state
            .activities
            .iter()
            .filter(|a| a.recipient_id == recipient_id)
            .cloned()
            .collect())
    }

    async fn list_for_campaign(
        &self,
        campaign_id: CampaignId,
        limit: i64,
    ) -> Result<Vec<CampaignActivity>> {
        let state = self.state.read().await;
        Ok(page(
            state
                .activities
                .iter()
                .rev()
                .filter(|a| a.campaign_id == campaign_id)
                .cloned(),
            limit,
            0,
        ))
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.activities.len();
        state.activities.retain(|a| a.occurred_at >= cutoff);
        Ok((before - state.activities.len()) as u64)
    }
}

#[async_trait]
impl SuppressionRepository for MemoryStore {
    async fn upsert_bounce(&self, bounce: NewBounce) -> Result<BounceRecord> {
        let mut state = self.state.write().await;

        if let Some(existing) = state
            .bounces
            .iter_mut()
            .find(|b| b.tenant_id == bounce.tenant_id && b.email == bounce.email)
        {
            let current = existing.kind_enum().unwrap_or(BounceKind::Soft);
            if bounce.kind.rank() > current.rank() {
                existing.kind = bounce.kind.as_str().to_string();
            }
            if bounce.reason.is_some() {
                existing.reason = bounce.reason;
            }
            if bounce.source.is_some() {
                existing.source = bounce.source;
            }
            if existing.first_bounced_at < bounce.window_start {
                existing.bounce_count = 1;
                existing.first_bounced_at = bounce.occurred_at;
            } else {
                existing.bounce_count += 1;
            }
            existing.last_bounced_at = bounce.occurred_at;
            return Ok(existing.clone());
        }

        let record = BounceRecord {
            id: Uuid::now_v7(),
            tenant_id: bounce.tenant_id,
            email: bounce.email,
            kind: bounce.kind.as_str().to_string(),
            reason: bounce.reason,
            source: bounce.source,
            bounce_count: 1,
            first_bounced_at: bounce.occurred_at,
            last_bounced_at: bounce.occurred_at,
        };
        state.bounces.push(record.clone());
        Ok(record)
    }

    async fn find_bounces(
        &self,
        email: &str,
        tenant_id: Option<TenantId>,
    ) -> Result<Vec<BounceRecord>> {
        let state = self.state.read().await;
        Ok(state
            .bounces
            .iter()
            .filter(|b| b.email == email && visible_to(b.tenant_id, tenant_id))
            .cloned()
            .collect())
    }

    async fn upsert_unsubscribe(&self, input: CreateUnsubscribe) -> Result<(Unsubscribe, bool)> {
        let mut state = self.state.write().await;

        if let Some(existing) = state
            .unsubscribes
            .iter()
            .find(|u| u.tenant_id == input.tenant_id && u.email == input.email)
        {
            return Ok((existing.clone(), false));
        }

        let entry = Unsubscribe {
            id: Uuid::now_v7(),
            tenant_id: input.tenant_id,
            email: input.email,
            source: input.source.as_str().to_string(),
            campaign_id: input.campaign_id,
            reason: input.reason,
            unsubscribed_at: input.unsubscribed_at,
        };
        state.unsubscribes.push(entry.clone());
        Ok((entry, true))
    }

    async fn find_unsubscribes(
        &self,
        email: &str,
        tenant_id: Option<TenantId>,
    ) -> Result<Vec<Unsubscribe>> {
        let state = self.state.read().await;
        Ok(state
            .unsubscribes
            .iter()
            .filter(|u| u.email == email && visible_to(u.tenant_id, tenant_id))
            .cloned()
            .collect())
    }

    async fn delete_unsubscribe(&self, email: &str, tenant_id: TenantId) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.unsubscribes.len();
        state.unsubscribes.retain(|u| {
            !(u.email == email
                && u.tenant_id == Some(tenant_id)
                && u.source != UnsubscribeSource::Complaint.as_str())
        });
        Ok(state.unsubscribes.len() < before)
    }

    async fn list_bounces(
        &self,
        tenant_id: TenantId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BounceRecord>> {
        let state = self.state.read().await;
        let mut bounces: Vec<BounceRecord> = state
            .bounces
            .iter()
            .filter(|b| visible_to(b.tenant_id, Some(tenant_id)))
            .cloned()
            .collect();
        bounces.sort_by(|a, b| b.last_bounced_at.cmp(&a.last_bounced_at));
        Ok(page(bounces.into_iter(), limit, offset))
    }

    async fn list_unsubscribes(
        &self,
        tenant_id: TenantId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Unsubscribe>> {
        let state = self.state.read().await;
        let mut entries: Vec<Unsubscribe> = state
            .unsubscribes
            .iter()
            .filter(|u| visible_to(u.tenant_id, Some(tenant_id)))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.unsubscribed_at.cmp(&a.unsubscribed_at));
        Ok(page(entries.into_iter(), limit, offset))
    }
}

#[async_trait]
impl WarmupRepository for MemoryStore {
    async fn create(&self, schedule: WarmupSchedule) -> Result<WarmupSchedule> {
        let mut state = self.state.write().await;
        let blocking = state.warmups.iter().any(|w| {
            w.tenant_id == schedule.tenant_id
                && w.ip_address == schedule.ip_address
                && (w.has_status(WarmupStatus::Active) || w.has_status(WarmupStatus::Scheduled))
        });
        if blocking {
            return Err(Error::Conflict(format!(
                "Warm-up schedule already exists for {}",
                schedule.ip_address
            )));
        }

        state.warmups.push(schedule.clone());
        Ok(schedule)
    }

    async fn get(&self, id: WarmupId) -> Result<Option<WarmupSchedule>> {
        let state = self.state.read().await;
        Ok(state.warmups.iter().find(|w| w.id == id).cloned())
    }

    async fn get_for_tenant(
        &self,
        tenant_id: TenantId,
        id: WarmupId,
    ) -> Result<Option<WarmupSchedule>> {
        let state = self.state.read().await;
        Ok(state
            .warmups
            .iter()
            .find(|w| w.id == id && w.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_current(
        &self,
        tenant_id: TenantId,
        ip_address: &str,
    ) -> Result<Option<WarmupSchedule>> {
        let state = self.state.read().await;
        let rank = |w: &WarmupSchedule| {
            if w.has_status(WarmupStatus::Active) {
                0
            } else if w.has_status(WarmupStatus::Scheduled) {
                1
            } else {
                2
            }
        };
        let mut candidates: Vec<&WarmupSchedule> = state
            .warmups
            .iter()
            .filter(|w| w.tenant_id == tenant_id && w.ip_address == ip_address)
            .filter(|w| !w.has_status(WarmupStatus::Completed))
            .collect();
        candidates.sort_by(|a, b| rank(a).cmp(&rank(b)).then(b.created_at.cmp(&a.created_at)));
        Ok(candidates.first().map(|w| (*w).clone()))
    }

    async fn save(&self, schedule: &WarmupSchedule) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.warmups.iter_mut().find(|w| w.id == schedule.id) {
            existing.status = schedule.status.clone();
            existing.current_day = schedule.current_day;
            existing.emails_sent_today = schedule.emails_sent_today;
            existing.gmail_sent_today = schedule.gmail_sent_today;
            existing.outlook_sent_today = schedule.outlook_sent_today;
            existing.yahoo_sent_today = schedule.yahoo_sent_today;
            existing.other_sent_today = schedule.other_sent_today;
            existing.counters_date = schedule.counters_date;
            existing.updated_at = schedule.updated_at;
        }
        Ok(())
    }

    async fn list_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<WarmupSchedule>> {
        let state = self.state.read().await;
        let mut schedules: Vec<WarmupSchedule> = state
            .warmups
            .iter()
            .filter(|w| w.tenant_id == tenant_id)
            .cloned()
            .collect();
        schedules.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(schedules)
    }

    async fn record_send(
        &self,
        id: WarmupId,
        provider: MailboxProvider,
        now: DateTime<Utc>,
    ) -> Result<Option<WarmupSchedule>> {
        let mut state = self.state.write().await;
        let Some(schedule) = state.warmups.iter_mut().find(|w| w.id == id) else {
            return Ok(None);
        };

        schedule.emails_sent_today += 1;
        match provider {
            MailboxProvider::Gmail => schedule.gmail_sent_today += 1,
            MailboxProvider::Outlook => schedule.outlook_sent_today += 1,
            MailboxProvider::Yahoo => schedule.yahoo_sent_today += 1,
            MailboxProvider::Other => schedule.other_sent_today += 1,
        }
        schedule.total_emails_sent += 1;
        schedule.updated_at = now;
        Ok(Some(schedule.clone()))
    }
}

#[async_trait]
impl RateCounterRepository for MemoryStore {
    async fn increment(
        &self,
        scope: RateScope,
        scope_id: Uuid,
        window: RateWindow,
        window_start: DateTime<Utc>,
    ) -> Result<i64> {
        let mut state = self.state.write().await;
        let count = state
            .rate_counters
            .entry((scope, scope_id, window, window_start))
            .or_default();
        *count += 1;
        Ok(*count)
    }

    async fn get(
        &self,
        scope: RateScope,
        scope_id: Uuid,
        window: RateWindow,
        window_start: DateTime<Utc>,
    ) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .rate_counters
            .get(&(scope, scope_id, window, window_start))
            .copied()
            .unwrap_or(0))
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.rate_counters.len();
        state.rate_counters.retain(|(_, _, _, start), _| *start >= cutoff);
        Ok((before - state.rate_counters.len()) as u64)
    }
}

#[async_trait]
impl SenderConfigRepository for MemoryStore {
    async fn get(&self, tenant_id: TenantId) -> Result<Option<SenderConfiguration>> {
        Ok(self.state.read().await.sender_configs.get(&tenant_id).cloned())
    }

    async fn upsert(&self, config: SenderConfiguration) -> Result<SenderConfiguration> {
        let mut state = self.state.write().await;
        let stored = match state.sender_configs.get(&config.tenant_id) {
            Some(existing) => SenderConfiguration {
                created_at: existing.created_at,
                ..config
            },
            None => config,
        };
        state.sender_configs.insert(stored.tenant_id, stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn enqueue(&self, job: NewJob) -> Result<Job> {
        let entry = pending_job(job);
        self.state.write().await.jobs.push(entry.clone());
        Ok(entry)
    }

    async fn enqueue_unique(&self, job: NewJob) -> Result<(Job, bool)> {
        let mut state = self.state.write().await;
        let pending = JobStatus::Pending.as_str();

        if job.campaign_id.is_some() {
            let existing = state
                .jobs
                .iter_mut()
                .filter(|j| {
                    j.status == pending && j.queue == job.queue && j.campaign_id == job.campaign_id
                })
                .min_by_key(|j| j.run_at);
            if let Some(existing) = existing {
                existing.run_at = existing.run_at.min(job.run_at);
                return Ok((existing.clone(), false));
            }
        }

        let entry = pending_job(job);
        state.jobs.push(entry.clone());
        Ok((entry, true))
    }

    async fn claim_due(&self, queue: &str, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
        let mut state = self.state.write().await;
        let pending = JobStatus::Pending.as_str();

        let mut due: Vec<usize> = state
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.queue == queue && j.status == pending && j.run_at <= now)
            .map(|(i, _)| i)
            .collect();
        due.sort_by_key(|&i| (state.jobs[i].run_at, state.jobs[i].id));
        due.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for i in due {
            let job = &mut state.jobs[i];
            job.status = JobStatus::Running.as_str().to_string();
            job.started_at = Some(now);
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn complete(&self, id: JobId, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(job) = state.jobs.iter_mut().find(|j| j.id == id) {
            job.status = JobStatus::Completed.as_str().to_string();
            job.completed_at = Some(now);
        }
        Ok(())
    }

    async fn retry(
        &self,
        id: JobId,
        attempts: i32,
        error: &str,
        run_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(job) = state.jobs.iter_mut().find(|j| j.id == id) {
            job.status = JobStatus::Pending.as_str().to_string();
            job.attempts = attempts;
            job.last_error = Some(error.to_string());
            job.run_at = run_at;
            job.started_at = None;
        }
        Ok(())
    }

    async fn fail(&self, id: JobId, error: &str, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(job) = state.jobs.iter_mut().find(|j| j.id == id) {
            job.status = JobStatus::Failed.as_str().to_string();
            job.attempts += 1;
            job.last_error = Some(error.to_string());
            job.completed_at = Some(now);
        }
        Ok(())
    }

    async fn delete_pending_for_campaign(&self, campaign_id: CampaignId) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.jobs.len();
        let pending = JobStatus::Pending.as_str();
        state
            .jobs
            .retain(|j| !(j.campaign_id == Some(campaign_id) && j.status == pending));
        Ok((before - state.jobs.len()) as u64)
    }

    async fn count_pending(
        &self,
        queue: Option<&str>,
        campaign_id: Option<CampaignId>,
    ) -> Result<i64> {
        let state = self.state.read().await;
        let pending = JobStatus::Pending.as_str();
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.status == pending)
            .filter(|j| queue.map_or(true, |q| j.queue == q))
            .filter(|j| campaign_id.map_or(true, |c| j.campaign_id == Some(c)))
            .count() as i64)
    }

    async fn next_due_at(&self, queue: Option<&str>) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.read().await;
        let pending = JobStatus::Pending.as_str();
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.status == pending)
            .filter(|j| queue.map_or(true, |q| j.queue == q))
            .map(|j| j.run_at)
            .min())
    }

    async fn list_pending(&self, queue: Option<&str>) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        let pending = JobStatus::Pending.as_str();
        let mut jobs: Vec<Job> = state
            .jobs
            .iter()
            .filter(|j| j.status == pending)
            .filter(|j| queue.map_or(true, |q| j.queue == q))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.run_at, j.id));
        Ok(jobs)
    }

    async fn reset_running(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut count = 0u64;
        for job in state.jobs.iter_mut() {
            if job.status == JobStatus::Running.as_str() {
                job.status = JobStatus::Pending.as_str().to_string();
                job.started_at = None;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
    }

    fn new_campaign(tenant_id: TenantId) -> CreateCampaign {
        CreateCampaign {
            tenant_id,
            name: "Spring launch".to_string(),
            subject: "Hello".to_string(),
            html_body: "<p>Hi</p>".to_string(),
            text_body: None,
            from_name: None,
            from_email: "news@example.com".to_string(),
            reply_to: None,
            daily_limit: 1000,
            hourly_limit: 100,
            delay_min_secs: 30,
            delay_max_secs: 120,
            batch_size: 100,
        }
    }

    fn recipient(email: &str) -> NewRecipient {
        NewRecipient {
            email: email.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_add_recipients_skips_duplicates() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let campaign = CampaignRepository::create(&store, new_campaign(tenant), now())
            .await
            .unwrap();

        let added = store
            .add(
                campaign.id,
                tenant,
                vec![recipient("a@example.com"), recipient("b@example.com")],
                now(),
            )
            .await
            .unwrap();
        assert_eq!(added, 2);

        let added = store
            .add(campaign.id, tenant, vec![recipient("a@example.com")], now())
            .await
            .unwrap();
        assert_eq!(added, 0);

        let campaign = CampaignRepository::get(&store, campaign.id).await.unwrap().unwrap();
        assert_eq!(campaign.total_recipients, 2);
    }

    #[tokio::test]
    async fn test_transition_guards_status() {
        let store = MemoryStore::new();
        let campaign = CampaignRepository::create(&store, new_campaign(Uuid::new_v4()), now())
            .await
            .unwrap();

        let paused = store
            .transition(campaign.id, &[CampaignStatus::Sending], CampaignStatus::Paused, now())
            .await
            .unwrap();
        assert!(paused.is_none());

        let sending = store
            .transition(campaign.id, &[CampaignStatus::Draft], CampaignStatus::Sending, now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sending.status, "sending");
        assert_eq!(sending.started_at, Some(now()));
    }

    #[tokio::test]
    async fn test_open_counts_once() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let campaign = CampaignRepository::create(&store, new_campaign(tenant), now())
            .await
            .unwrap();
        store
            .add(campaign.id, tenant, vec![recipient("a@example.com")], now())
            .await
            .unwrap();
        let r = store.fetch_pending(campaign.id, 10).await.unwrap().remove(0);

        store.claim_for_send(r.id, now()).await.unwrap().unwrap();
        store.mark_sent(r.id, "<m1@example.com>", now()).await.unwrap().unwrap();

        assert!(store.record_open(r.id, now()).await.unwrap());
        assert!(!store.record_open(r.id, now()).await.unwrap());

        let campaign = CampaignRepository::get(&store, campaign.id).await.unwrap().unwrap();
        assert_eq!(campaign.sent_count, 1);
        assert_eq!(campaign.opened_count, 1);

        let r = RecipientRepository::get(&store, r.id).await.unwrap().unwrap();
        assert_eq!(r.status, "opened");
    }

    #[tokio::test]
    async fn test_global_entries_visible_without_tenant() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();

        store
            .upsert_unsubscribe(CreateUnsubscribe {
                tenant_id: Some(tenant),
                email: "a@example.com".to_string(),
                source: UnsubscribeSource::Link,
                campaign_id: None,
                reason: None,
                unsubscribed_at: now(),
            })
            .await
            .unwrap();

        assert_eq!(store.find_unsubscribes("a@example.com", Some(tenant)).await.unwrap().len(), 1);
        assert!(store.find_unsubscribes("a@example.com", None).await.unwrap().is_empty());
        assert!(store
            .find_unsubscribes("a@example.com", Some(Uuid::new_v4()))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_soft_bounce_window_restarts() {
        let store = MemoryStore::new();
        let start = now();
        let bounce = |at: DateTime<Utc>| NewBounce {
            tenant_id: None,
            email: "a@example.com".to_string(),
            kind: BounceKind::Soft,
            reason: None,
            source: None,
            occurred_at: at,
            window_start: at - chrono::Duration::days(30),
        };

        store.upsert_bounce(bounce(start)).await.unwrap();
        let record = store
            .upsert_bounce(bounce(start + chrono::Duration::days(1)))
            .await
            .unwrap();
        assert_eq!(record.bounce_count, 2);

        let record = store
            .upsert_bounce(bounce(start + chrono::Duration::days(45)))
            .await
            .unwrap();
        assert_eq!(record.bounce_count, 1);
        assert_eq!(record.first_bounced_at, start + chrono::Duration::days(45));
    }

    #[tokio::test]
    async fn test_claim_due_respects_run_at() {
        let store = MemoryStore::new();
        for offset in [0, 60] {
            store
                .enqueue(NewJob {
                    queue: "emails".to_string(),
                    payload: serde_json::json!({}),
                    campaign_id: None,
                    run_at: now() + chrono::Duration::seconds(offset),
                    max_attempts: 5,
                })
                .await
                .unwrap();
        }

        let claimed = store.claim_due("emails", now(), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert!(store.claim_due("emails", now(), 10).await.unwrap().is_empty());
        assert_eq!(store.reset_running().await.unwrap(), 1);
        assert_eq!(store.count_pending(Some("emails"), None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stale_sending_rows_return_to_pending() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let campaign = CampaignRepository::create(&store, new_campaign(tenant), now())
            .await
            .unwrap();
        store
            .add(
                campaign.id,
                tenant,
                vec![recipient("a@example.com"), recipient("b@example.com")],
                now(),
            )
            .await
            .unwrap();
        let rows = store.fetch_pending(campaign.id, 10).await.unwrap();

        let later = now() + chrono::Duration::minutes(20);
        store.claim_for_send(rows[0].id, now()).await.unwrap().unwrap();
        store.claim_for_send(rows[1].id, later).await.unwrap().unwrap();

        let released = store
            .release_stale_sending(Some(campaign.id), now() + chrono::Duration::minutes(5), later)
            .await
            .unwrap();
        assert_eq!(released, 1);

        let a = RecipientRepository::get(&store, rows[0].id).await.unwrap().unwrap();
        assert_eq!(a.status, "pending");
        assert_eq!(a.attempts, 1);
        let b = RecipientRepository::get(&store, rows[1].id).await.unwrap().unwrap();
        assert_eq!(b.status, "sending");
    }

    #[tokio::test]
    async fn test_enqueue_unique_keeps_one_pending_job_per_campaign() {
        let store = MemoryStore::new();
        let campaign_id = Uuid::new_v4();
        let job = |offset: i64| NewJob {
            queue: "campaigns".to_string(),
            payload: serde_json::json!({}),
            campaign_id: Some(campaign_id),
            run_at: now() + chrono::Duration::minutes(offset),
            max_attempts: 5,
        };

        let (first, inserted) = store.enqueue_unique(job(30)).await.unwrap();
        assert!(inserted);

        let (same, inserted) = store.enqueue_unique(job(60)).await.unwrap();
        assert!(!inserted);
        assert_eq!((same.id, same.run_at), (first.id, now() + chrono::Duration::minutes(30)));

        let (same, inserted) = store.enqueue_unique(job(0)).await.unwrap();
        assert!(!inserted);
        assert_eq!(same.run_at, now());
        assert_eq!(store.count_pending(Some("campaigns"), Some(campaign_id)).await.unwrap(), 1);

        // a running job does not block its successor
        store.claim_due("campaigns", now(), 1).await.unwrap();
        let (_, inserted) = store.enqueue_unique(job(30)).await.unwrap();
        assert!(inserted);
    }
}
