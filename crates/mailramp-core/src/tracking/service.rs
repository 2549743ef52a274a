//! Event Tracking Service - Opens, clicks, bounces and unsubscribes

use super::token::{TokenSigner, UnsubscribeClaims};
use super::TrackingError;
use crate::suppression::SuppressionManager;
use crate::webhooks::BounceEvent;
use chrono::Duration;
use mailramp_common::types::{CampaignId, RecipientId};
use mailramp_common::{Clock, Result};
use mailramp_storage::models::{
    ActivityKind, BounceKind, CampaignRecipient, NewActivity, UnsubscribeSource,
};
use mailramp_storage::repository::{
    ActivityRepository, CampaignRepository, JobRepository, RecipientRepository,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Request metadata stored with an activity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Result of recording an event for a known recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackOutcome {
    pub recipient_id: RecipientId,
    pub campaign_id: CampaignId,
    /// The event moved the recipient and bumped a counter
    pub first: bool,
}

/// Campaign statistics read from rollup counters
#[derive(Debug, Clone, Serialize)]
pub struct CampaignStats {
    pub campaign_id: CampaignId,
    pub status: String,
    pub total_recipients: i32,
    pub sent: i32,
    pub opened: i32,
    pub clicked: i32,
    pub bounced: i32,
    pub unsubscribed: i32,
    pub failed: i32,
    pub open_rate: f64,
    pub click_rate: f64,
    pub bounce_rate: f64,
    pub unsubscribe_rate: f64,
    pub progress: f64,
    pub queued_jobs: i64,
}

fn rate(count: i32, sent: i32) -> f64 {
    if sent == 0 {
        0.0
    } else {
        count as f64 / sent as f64
    }
}

/// Event Tracking Service
pub struct TrackingService {
    campaigns: Arc<dyn CampaignRepository>,
    recipients: Arc<dyn RecipientRepository>,
    activities: Arc<dyn ActivityRepository>,
    jobs: Arc<dyn JobRepository>,
    suppression: Arc<SuppressionManager>,
    tokens: Option<TokenSigner>,
    clock: Arc<dyn Clock>,
}

impl TrackingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        recipients: Arc<dyn RecipientRepository>,
        activities: Arc<dyn ActivityRepository>,
        jobs: Arc<dyn JobRepository>,
        suppression: Arc<SuppressionManager>,
        tokens: Option<TokenSigner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            campaigns,
            recipients,
            activities,
            jobs,
            suppression,
            tokens,
            clock,
        }
    }

    pub fn tokens(&self) -> Option<&TokenSigner> {
        self.tokens.as_ref()
    }

    async fn append(
        &self,
        recipient: &CampaignRecipient,
        kind: ActivityKind,
        meta: &RequestMeta,
        url: Option<&str>,
        reason: Option<&str>,
    ) -> Result<()> {
        self.activities
            .append(NewActivity {
                campaign_id: recipient.campaign_id,
                recipient_id: recipient.id,
                kind,
                ip_address: meta.ip_address.clone(),
                user_agent: meta.user_agent.clone(),
                url: url.map(str::to_string),
                reason: reason.map(str::to_string),
                occurred_at: self.clock.now(),
            })
            .await?;
        Ok(())
    }

    /// Record an open; unknown ids return `None`
    pub async fn track_open(
        &self,
        tracking_id: &str,
        meta: &RequestMeta,
    ) -> Result<Option<TrackOutcome>> {
        let Some(recipient) = self.recipients.get_by_tracking_id(tracking_id).await? else {
            debug!(tracking_id, "Open for unknown tracking id");
            return Ok(None);
        };

        self.append(&recipient, ActivityKind::Opened, meta, None, None)
            .await?;
        let first = self
            .recipients
            .record_open(recipient.id, self.clock.now())
            .await?;

        Ok(Some(TrackOutcome {
            recipient_id: recipient.id,
            campaign_id: recipient.campaign_id,
            first,
        }))
    }

    /// Record a click; every click is logged, the first one is counted
    pub async fn track_click(
        &self,
        tracking_id: &str,
        url: &str,
        meta: &RequestMeta,
    ) -> Result<Option<TrackOutcome>> {
        let Some(recipient) = self.recipients.get_by_tracking_id(tracking_id).await? else {
            debug!(tracking_id, "Click for unknown tracking id");
            return Ok(None);
        };

        self.append(&recipient, ActivityKind::Clicked, meta, Some(url), None)
            .await?;
        let first = self
            .recipients
            .record_click(recipient.id, self.clock.now())
            .await?;

        Ok(Some(TrackOutcome {
            recipient_id: recipient.id,
            campaign_id: recipient.campaign_id,
            first,
        }))
    }

    /// Apply a provider event. The address is suppressed even when the
    /// message id matches no recipient.
    pub async fn track_bounce(&self, event: &BounceEvent) -> Result<Option<TrackOutcome>> {
        let recipient = match &event.message_id {
            Some(id) => self.find_by_message_id(id).await?,
            None => None,
        };

        match recipient {
            Some(recipient) => {
                let outcome = self.record_recipient_bounce(&recipient, event).await?;
                Ok(Some(outcome))
            }
            None => {
                self.suppression.record_bounce(event, None).await?;
                Ok(None)
            }
        }
    }

    async fn find_by_message_id(&self, id: &str) -> Result<Option<CampaignRecipient>> {
        if let Some(r) = self.recipients.get_by_provider_message_id(id).await? {
            return Ok(Some(r));
        }
        self.recipients
            .get_by_provider_message_id(&format!("<{}>", id))
            .await
    }

    /// Bounce path for a known recipient, shared with synchronous SMTP rejections
    pub async fn record_recipient_bounce(
        &self,
        recipient: &CampaignRecipient,
        event: &BounceEvent,
    ) -> Result<TrackOutcome> {
        let now = self.clock.now();
        let meta = RequestMeta::default();

        let first = if event.kind == BounceKind::Complaint {
            self.append(recipient, ActivityKind::Unsubscribed, &meta, None, event.reason.as_deref())
                .await?;
            self.recipients.record_unsubscribe(recipient.id, now).await?
        } else {
            self.append(recipient, ActivityKind::Bounced, &meta, None, event.reason.as_deref())
                .await?;
            self.recipients
                .record_bounce(recipient.id, event.reason.as_deref(), now)
                .await?
        };

        self.suppression
            .record_bounce(event, Some(recipient.tenant_id))
            .await?;

        info!(
            campaign_id = %recipient.campaign_id,
            recipient_id = %recipient.id,
            kind = %event.kind,
            "Bounce recorded"
        );

        Ok(TrackOutcome {
            recipient_id: recipient.id,
            campaign_id: recipient.campaign_id,
            first,
        })
    }

    /// Unsubscribe through a recipient's tracking link
    pub async fn track_unsubscribe(
        &self,
        tracking_id: &str,
        reason: Option<String>,
        meta: &RequestMeta,
    ) -> Result<Option<TrackOutcome>> {
        let Some(recipient) = self.recipients.get_by_tracking_id(tracking_id).await? else {
            return Ok(None);
        };

        self.suppression
            .unsubscribe(
                &recipient.email,
                Some(recipient.tenant_id),
                UnsubscribeSource::Link,
                Some(recipient.campaign_id),
                reason.clone(),
            )
            .await?;

        let first = self
            .recipients
            .record_unsubscribe(recipient.id, self.clock.now())
            .await?;
        if first {
            self.append(&recipient, ActivityKind::Unsubscribed, meta, None, reason.as_deref())
                .await?;
        }

        Ok(Some(TrackOutcome {
            recipient_id: recipient.id,
            campaign_id: recipient.campaign_id,
            first,
        }))
    }

    /// Unsubscribe through a signed token
    pub async fn unsubscribe_with_token(
        &self,
        token: &str,
        reason: Option<String>,
    ) -> std::result::Result<UnsubscribeClaims, TrackingError> {
        let signer = self.tokens.as_ref().ok_or(TrackingError::TokensDisabled)?;
        let claims = signer.verify(token, self.clock.now())?;

        self.suppression
            .unsubscribe(
                &claims.email,
                claims.organization_id,
                UnsubscribeSource::Token,
                claims.campaign_id,
                reason.clone(),
            )
            .await?;

        if let Some(campaign_id) = claims.campaign_id {
            let email = mailramp_common::types::normalize_email(&claims.email);
            if let Some(recipient) = self
                .recipients
                .get_by_campaign_email(campaign_id, &email)
                .await?
            {
                if self
                    .recipients
                    .record_unsubscribe(recipient.id, self.clock.now())
                    .await?
                {
                    self.append(
                        &recipient,
                        ActivityKind::Unsubscribed,
                        &RequestMeta::default(),
                        None,
                        reason.as_deref(),
                    )
                    .await?;
                }
            }
        }

        Ok(claims)
    }

    /// Recipient lookup for unsubscribe pages
    pub async fn recipient(&self, tracking_id: &str) -> Result<Option<CampaignRecipient>> {
        self.recipients.get_by_tracking_id(tracking_id).await
    }

    pub async fn campaign_stats(&self, campaign_id: CampaignId) -> Result<Option<CampaignStats>> {
        let Some(campaign) = self.campaigns.get(campaign_id).await? else {
            return Ok(None);
        };
        let queued_jobs = self.jobs.count_pending(None, Some(campaign_id)).await?;

        let sent = campaign.sent_count;
        Ok(Some(CampaignStats {
            campaign_id,
            status: campaign.status.clone(),
            total_recipients: campaign.total_recipients,
            sent,
            opened: campaign.opened_count,
            clicked: campaign.clicked_count,
            bounced: campaign.bounced_count,
            unsubscribed: campaign.unsubscribed_count,
            failed: campaign.failed_count,
            open_rate: rate(campaign.opened_count, sent),
            click_rate: rate(campaign.clicked_count, sent),
            bounce_rate: rate(campaign.bounced_count, sent),
            unsubscribe_rate: rate(campaign.unsubscribed_count, sent),
            progress: campaign.progress_percentage(),
            queued_jobs,
        }))
    }

    /// Delete activities older than the retention window
    pub async fn cleanup_activities(&self, retention_days: i64) -> Result<u64> {
        let cutoff = self.clock.now() - Duration::days(retention_days);
        let deleted = self.activities.delete_older_than(cutoff).await?;
        if deleted > 0 {
            info!(deleted, retention_days, "Old activities removed");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{monday_morning, seed_campaign};
    use mailramp_common::config::SuppressionConfig;
    use mailramp_common::ManualClock;
    use mailramp_storage::memory::MemoryStore;
    use mailramp_storage::models::RecipientStatus;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    struct Fixture {
        store: MemoryStore,
        suppression: Arc<SuppressionManager>,
        service: TrackingService,
    }

    fn fixture(tokens: Option<TokenSigner>) -> Fixture {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let suppression = Arc::new(SuppressionManager::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            clock.clone(),
            SuppressionConfig::default(),
        ));
        let service = TrackingService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            suppression.clone(),
            tokens,
            clock,
        );
        Fixture {
            store,
            suppression,
            service,
        }
    }

    /// Seed one recipient and mark it sent with `message_id`
    async fn sent_recipient(f: &Fixture, email: &str, message_id: &str) -> CampaignRecipient {
        let campaign = seed_campaign(&f.store, Uuid::new_v4(), &[email], monday_morning()).await;
        let recipient = f
            .store
            .get_by_campaign_email(campaign.id, email)
            .await
            .unwrap()
            .unwrap();
        f.store
            .claim_for_send(recipient.id, monday_morning())
            .await
            .unwrap();
        f.store
            .mark_sent(recipient.id, message_id, monday_morning())
            .await
            .unwrap()
            .unwrap()
    }

    fn event(message_id: Option<&str>, email: &str, kind: BounceKind) -> BounceEvent {
        BounceEvent {
            message_id: message_id.map(str::to_string),
            email: email.to_string(),
            kind,
            reason: Some("mailbox unavailable".into()),
            provider: "generic".into(),
        }
    }

    #[tokio::test]
    async fn test_open_is_counted_once() {
        let f = fixture(None);
        let recipient = sent_recipient(&f, "reader@example.com", "m1@shop.example").await;
        let meta = RequestMeta {
            ip_address: Some("198.51.100.4".into()),
            user_agent: Some("Mail/1.0".into()),
        };

        let first = f.service.track_open(&recipient.tracking_id, &meta).await.unwrap().unwrap();
        let second = f.service.track_open(&recipient.tracking_id, &meta).await.unwrap().unwrap();
        assert!(first.first);
        assert!(!second.first);

        let stats = f.service.campaign_stats(recipient.campaign_id).await.unwrap().unwrap();
        assert_eq!(stats.opened, 1);
        assert_eq!(stats.open_rate, 1.0);

        let activities = f.store.list_for_recipient(recipient.id).await.unwrap();
        assert_eq!(activities.len(), 2);
        assert_eq!(activities[0].ip_address.as_deref(), Some("198.51.100.4"));
    }

    #[tokio::test]
    async fn test_click_does_not_imply_open() {
        let f = fixture(None);
        let recipient = sent_recipient(&f, "reader@example.com", "m1@shop.example").await;

        for _ in 0..3 {
            f.service
                .track_click(&recipient.tracking_id, "https://shop.example/sale", &RequestMeta::default())
                .await
                .unwrap();
        }

        let stored = RecipientRepository::get(&f.store, recipient.id).await.unwrap().unwrap();
        assert!(stored.has_status(RecipientStatus::Clicked));
        assert!(stored.first_opened_at.is_none());

        let stats = f.service.campaign_stats(recipient.campaign_id).await.unwrap().unwrap();
        assert_eq!(stats.clicked, 1);
        assert_eq!(stats.opened, 0);
        assert_eq!(f.store.list_for_recipient(recipient.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_tracking_id() {
        let f = fixture(None);
        let meta = RequestMeta::default();
        assert!(f.service.track_open("missing", &meta).await.unwrap().is_none());
        assert!(f
            .service
            .track_click("missing", "https://shop.example", &meta)
            .await
            .unwrap()
            .is_none());
        assert!(f
            .service
            .track_unsubscribe("missing", None, &meta)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_bounce_matches_message_id() {
        let f = fixture(None);
        let recipient = sent_recipient(&f, "gone@example.com", "m1@shop.example").await;

        let outcome = f
            .service
            .track_bounce(&event(Some("m1@shop.example"), "gone@example.com", BounceKind::Hard))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.recipient_id, recipient.id);
        assert!(outcome.first);

        let stored = RecipientRepository::get(&f.store, recipient.id).await.unwrap().unwrap();
        assert!(stored.has_status(RecipientStatus::Bounced));

        // a repeated delivery of the same event is not counted again
        let again = f
            .service
            .track_bounce(&event(Some("m1@shop.example"), "gone@example.com", BounceKind::Hard))
            .await
            .unwrap()
            .unwrap();
        assert!(!again.first);

        let stats = f.service.campaign_stats(recipient.campaign_id).await.unwrap().unwrap();
        assert_eq!(stats.bounced, 1);

        let decision = f
            .suppression
            .should_skip_email("gone@example.com", None)
            .await
            .unwrap();
        assert!(decision.skip);
    }

    #[tokio::test]
    async fn test_bounce_without_recipient_still_suppresses() {
        let f = fixture(None);
        let outcome = f
            .service
            .track_bounce(&event(Some("unknown@relay"), "stranger@example.com", BounceKind::Hard))
            .await
            .unwrap();
        assert!(outcome.is_none());

        let decision = f
            .suppression
            .should_skip_email("stranger@example.com", Some(Uuid::new_v4()))
            .await
            .unwrap();
        assert!(decision.skip);
    }

    #[tokio::test]
    async fn test_complaint_unsubscribes_recipient() {
        let f = fixture(None);
        let recipient = sent_recipient(&f, "angry@example.com", "m2@shop.example").await;

        f.service
            .track_bounce(&event(Some("m2@shop.example"), "angry@example.com", BounceKind::Complaint))
            .await
            .unwrap();

        let stored = RecipientRepository::get(&f.store, recipient.id).await.unwrap().unwrap();
        assert!(stored.has_status(RecipientStatus::Unsubscribed));

        let stats = f.service.campaign_stats(recipient.campaign_id).await.unwrap().unwrap();
        assert_eq!(stats.unsubscribed, 1);
        assert_eq!(stats.bounced, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_link_is_tenant_scoped() {
        let f = fixture(None);
        let recipient = sent_recipient(&f, "reader@example.com", "m3@shop.example").await;

        let outcome = f
            .service
            .track_unsubscribe(&recipient.tracking_id, Some("too many".into()), &RequestMeta::default())
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.first);

        let own = f
            .suppression
            .should_skip_email("reader@example.com", Some(recipient.tenant_id))
            .await
            .unwrap();
        assert!(own.skip);

        let other = f
            .suppression
            .should_skip_email("reader@example.com", Some(Uuid::new_v4()))
            .await
            .unwrap();
        assert!(!other.skip);
    }

    #[tokio::test]
    async fn test_signed_token_unsubscribe() {
        let f = fixture(None);
        assert!(matches!(
            f.service.unsubscribe_with_token("anything", None).await,
            Err(TrackingError::TokensDisabled)
        ));

        let signer = TokenSigner::new("secret", Duration::hours(24));
        let f = fixture(Some(signer.clone()));
        let recipient = sent_recipient(&f, "reader@example.com", "m4@shop.example").await;
        let token = signer
            .sign(
                "Reader@Example.com",
                Some(recipient.tenant_id),
                Some(recipient.campaign_id),
                monday_morning(),
            )
            .unwrap();

        let claims = f.service.unsubscribe_with_token(&token, None).await.unwrap();
        assert_eq!(claims.campaign_id, Some(recipient.campaign_id));

        let stored = RecipientRepository::get(&f.store, recipient.id).await.unwrap().unwrap();
        assert!(stored.has_status(RecipientStatus::Unsubscribed));

        assert!(matches!(
            f.service.unsubscribe_with_token(&format!("{}x", token), None).await,
            Err(TrackingError::Token(_))
        ));
    }
}
