//! Suppression Manager - Bounce, complaint and unsubscribe lists

use crate::webhooks::BounceEvent;
use chrono::Duration;
use mailramp_common::config::SuppressionConfig;
use mailramp_common::types::{normalize_email, CampaignId, EmailAddress, TenantId};
use mailramp_common::{Clock, Result};
use mailramp_storage::models::{
    BounceKind, BounceRecord, CreateUnsubscribe, NewBounce, Unsubscribe, UnsubscribeSource,
};
use mailramp_storage::repository::{RecipientRepository, SuppressionRepository};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Why an address must not be contacted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InvalidAddress,
    HardBounce,
    Complaint,
    Unsubscribed,
    RepeatedSoftBounces,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InvalidAddress => "invalid_address",
            SkipReason::HardBounce => "hard_bounce",
            SkipReason::Complaint => "complaint",
            SkipReason::Unsubscribed => "unsubscribed",
            SkipReason::RepeatedSoftBounces => "repeated_soft_bounces",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SkipDecision {
    pub skip: bool,
    pub reason: Option<SkipReason>,
}

impl SkipDecision {
    fn allow() -> Self {
        Self {
            skip: false,
            reason: None,
        }
    }

    fn skip(reason: SkipReason) -> Self {
        Self {
            skip: true,
            reason: Some(reason),
        }
    }
}

/// Suppression Manager
pub struct SuppressionManager {
    suppressions: Arc<dyn SuppressionRepository>,
    recipients: Arc<dyn RecipientRepository>,
    clock: Arc<dyn Clock>,
    config: SuppressionConfig,
}

impl SuppressionManager {
    pub fn new(
        suppressions: Arc<dyn SuppressionRepository>,
        recipients: Arc<dyn RecipientRepository>,
        clock: Arc<dyn Clock>,
        config: SuppressionConfig,
    ) -> Self {
        Self {
            suppressions,
            recipients,
            clock,
            config,
        }
    }

    /// Record a bounce or complaint for the address in `event`.
    ///
    /// Hard bounces and complaints also cancel every waiting send to the
    /// address within the record's scope.
    pub async fn record_bounce(
        &self,
        event: &BounceEvent,
        tenant_id: Option<TenantId>,
    ) -> Result<BounceRecord> {
        let now = self.clock.now();
        let email = normalize_email(&event.email);

        let scope = match event.kind {
            BounceKind::Complaint => None,
            BounceKind::Hard if self.config.global_hard_bounces => None,
            BounceKind::Hard | BounceKind::Soft => tenant_id,
        };

        let record = self
            .suppressions
            .upsert_bounce(NewBounce {
                tenant_id: scope,
                email: email.clone(),
                kind: event.kind,
                reason: event.reason.clone(),
                source: Some(event.provider.clone()),
                occurred_at: now,
                window_start: now - Duration::days(self.config.soft_bounce_window_days),
            })
            .await?;

        if event.kind == BounceKind::Complaint {
            self.suppressions
                .upsert_unsubscribe(CreateUnsubscribe {
                    tenant_id: None,
                    email: email.clone(),
                    source: UnsubscribeSource::Complaint,
                    campaign_id: None,
                    reason: event.reason.clone(),
                    unsubscribed_at: now,
                })
                .await?;
        }

        if matches!(event.kind, BounceKind::Hard | BounceKind::Complaint) {
            let reason = match event.kind {
                BounceKind::Complaint => SkipReason::Complaint,
                _ => SkipReason::HardBounce,
            };
            let cancelled = self
                .recipients
                .cancel_pending_for_email(&email, scope, reason.as_str(), now)
                .await?;
            info!(
                email = %email,
                kind = %event.kind,
                provider = %event.provider,
                cancelled,
                "Address suppressed"
            );
        } else {
            debug!(
                email = %email,
                count = record.bounce_count,
                "Soft bounce recorded"
            );
        }

        Ok(record)
    }

    /// Add an unsubscribe entry; returns true when it did not exist yet
    pub async fn unsubscribe(
        &self,
        email: &str,
        tenant_id: Option<TenantId>,
        source: UnsubscribeSource,
        campaign_id: Option<CampaignId>,
        reason: Option<String>,
    ) -> Result<bool> {
        let email = normalize_email(email);
        let (_, created) = self
            .suppressions
            .upsert_unsubscribe(CreateUnsubscribe {
                tenant_id,
                email: email.clone(),
                source,
                campaign_id,
                reason,
                unsubscribed_at: self.clock.now(),
            })
            .await?;

        if created {
            info!(email = %email, tenant_id = ?tenant_id, source = %source, "Unsubscribed");
        }
        Ok(created)
    }

    /// Remove the tenant's own unsubscribe entry. Global complaints and
    /// bounce records are untouched.
    pub async fn resubscribe(&self, email: &str, tenant_id: TenantId) -> Result<bool> {
        let email = normalize_email(email);
        let removed = self.suppressions.delete_unsubscribe(&email, tenant_id).await?;
        if removed {
            info!(email = %email, tenant_id = %tenant_id, "Resubscribed");
        }
        Ok(removed)
    }

    /// Answer whether an address may be contacted. A tenant-less query only
    /// sees global entries.
    pub async fn should_skip_email(
        &self,
        email: &str,
        tenant_id: Option<TenantId>,
    ) -> Result<SkipDecision> {
        let Some(address) = EmailAddress::parse(email) else {
            return Ok(SkipDecision::skip(SkipReason::InvalidAddress));
        };
        let email = address.normalized();

        let bounces = self.suppressions.find_bounces(&email, tenant_id).await?;
        if bounces
            .iter()
            .any(|b| b.kind_enum() == Some(BounceKind::Complaint))
        {
            return Ok(SkipDecision::skip(SkipReason::Complaint));
        }
        if bounces.iter().any(|b| b.kind_enum() == Some(BounceKind::Hard)) {
            return Ok(SkipDecision::skip(SkipReason::HardBounce));
        }

        if !self
            .suppressions
            .find_unsubscribes(&email, tenant_id)
            .await?
            .is_empty()
        {
            return Ok(SkipDecision::skip(SkipReason::Unsubscribed));
        }

        let window_start = self.clock.now() - Duration::days(self.config.soft_bounce_window_days);
        let repeated = bounces.iter().any(|b| {
            b.kind_enum() == Some(BounceKind::Soft)
                && b.bounce_count >= self.config.soft_bounce_threshold
                && b.first_bounced_at >= window_start
        });
        if repeated {
            return Ok(SkipDecision::skip(SkipReason::RepeatedSoftBounces));
        }

        Ok(SkipDecision::allow())
    }

    pub async fn list_bounces(
        &self,
        tenant_id: TenantId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BounceRecord>> {
        self.suppressions.list_bounces(tenant_id, limit, offset).await
    }

    pub async fn list_unsubscribes(
        &self,
        tenant_id: TenantId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Unsubscribe>> {
        self.suppressions
            .list_unsubscribes(tenant_id, limit, offset)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{monday_morning, seed_campaign};
    use mailramp_common::ManualClock;
    use mailramp_storage::memory::MemoryStore;
    use mailramp_storage::models::RecipientStatus;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn manager(store: &MemoryStore, clock: Arc<ManualClock>) -> SuppressionManager {
        SuppressionManager::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            clock,
            SuppressionConfig::default(),
        )
    }

    fn event(email: &str, kind: BounceKind) -> BounceEvent {
        BounceEvent {
            message_id: None,
            email: email.to_string(),
            kind,
            reason: Some("550 5.1.1 user unknown".to_string()),
            provider: "generic".to_string(),
        }
    }

    #[tokio::test]
    async fn test_hard_bounce_is_global() {
        let store = MemoryStore::new();
        let manager = manager(&store, Arc::new(ManualClock::new(monday_morning())));
        let tenant = Uuid::new_v4();

        manager
            .record_bounce(&event("Gone@Example.com", BounceKind::Hard), Some(tenant))
            .await
            .unwrap();

        let same_tenant = manager
            .should_skip_email("gone@example.com", Some(tenant))
            .await
            .unwrap();
        assert_eq!(same_tenant, SkipDecision::skip(SkipReason::HardBounce));

        let tenantless = manager.should_skip_email("gone@example.com", None).await.unwrap();
        assert_eq!(tenantless.reason, Some(SkipReason::HardBounce));

        let other_tenant = manager
            .should_skip_email("gone@example.com", Some(Uuid::new_v4()))
            .await
            .unwrap();
        assert!(other_tenant.skip);
    }

    #[tokio::test]
    async fn test_hard_bounce_cancels_waiting_rows() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let manager = manager(&store, clock.clone());
        let tenant = Uuid::new_v4();
        let campaign = seed_campaign(&store, tenant, &["gone@example.com", "ok@example.com"], clock.now()).await;

        manager
            .record_bounce(&event("gone@example.com", BounceKind::Hard), None)
            .await
            .unwrap();

        let gone = store
            .get_by_campaign_email(campaign.id, "gone@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(gone.has_status(RecipientStatus::Cancelled));
        assert_eq!(gone.last_error.as_deref(), Some("hard_bounce"));

        let ok = store
            .get_by_campaign_email(campaign.id, "ok@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(ok.has_status(RecipientStatus::Pending));
    }

    #[tokio::test]
    async fn test_resubscribe_only_lifts_tenant_entry() {
        let store = MemoryStore::new();
        let manager = manager(&store, Arc::new(ManualClock::new(monday_morning())));
        let tenant = Uuid::new_v4();

        assert!(manager
            .unsubscribe("reader@example.com", Some(tenant), UnsubscribeSource::Link, None, None)
            .await
            .unwrap());
        // Idempotent
        assert!(!manager
            .unsubscribe("reader@example.com", Some(tenant), UnsubscribeSource::Link, None, None)
            .await
            .unwrap());

        let decision = manager
            .should_skip_email("reader@example.com", Some(tenant))
            .await
            .unwrap();
        assert_eq!(decision.reason, Some(SkipReason::Unsubscribed));
        assert!(!manager
            .should_skip_email("reader@example.com", None)
            .await
            .unwrap()
            .skip);

        assert!(manager.resubscribe("reader@example.com", tenant).await.unwrap());
        assert!(!manager
            .should_skip_email("reader@example.com", Some(tenant))
            .await
            .unwrap()
            .skip);
    }

    #[tokio::test]
    async fn test_complaint_survives_resubscribe() {
        let store = MemoryStore::new();
        let manager = manager(&store, Arc::new(ManualClock::new(monday_morning())));
        let tenant = Uuid::new_v4();

        manager
            .unsubscribe("angry@example.com", Some(tenant), UnsubscribeSource::Link, None, None)
            .await
            .unwrap();
        manager
            .record_bounce(&event("angry@example.com", BounceKind::Complaint), Some(tenant))
            .await
            .unwrap();

        manager.resubscribe("angry@example.com", tenant).await.unwrap();

        let decision = manager
            .should_skip_email("angry@example.com", Some(tenant))
            .await
            .unwrap();
        assert_eq!(decision.reason, Some(SkipReason::Complaint));
        let tenantless = manager.should_skip_email("angry@example.com", None).await.unwrap();
        assert_eq!(tenantless.reason, Some(SkipReason::Complaint));
    }

    #[tokio::test]
    async fn test_repeated_soft_bounces() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let manager = manager(&store, clock.clone());
        let tenant = Uuid::new_v4();

        for _ in 0..4 {
            manager
                .record_bounce(&event("full@example.com", BounceKind::Soft), Some(tenant))
                .await
                .unwrap();
        }
        assert!(!manager
            .should_skip_email("full@example.com", Some(tenant))
            .await
            .unwrap()
            .skip);

        manager
            .record_bounce(&event("full@example.com", BounceKind::Soft), Some(tenant))
            .await
            .unwrap();
        let decision = manager
            .should_skip_email("full@example.com", Some(tenant))
            .await
            .unwrap();
        assert_eq!(decision.reason, Some(SkipReason::RepeatedSoftBounces));

        // Once the window has passed the next bounce starts a new count
        clock.advance(Duration::days(31));
        let record = manager
            .record_bounce(&event("full@example.com", BounceKind::Soft), Some(tenant))
            .await
            .unwrap();
        assert_eq!(record.bounce_count, 1);
        assert!(!manager
            .should_skip_email("full@example.com", Some(tenant))
            .await
            .unwrap()
            .skip);
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let store = MemoryStore::new();
        let manager = manager(&store, Arc::new(ManualClock::new(monday_morning())));
        let decision = manager.should_skip_email("not an address", None).await.unwrap();
        assert_eq!(decision.reason, Some(SkipReason::InvalidAddress));
    }
}
