//! Campaign Manager - Campaign definitions and recipient lists

use super::CampaignError;
use crate::variation::VariationEngine;
use mailramp_common::config::SchedulerConfig;
use mailramp_common::types::{CampaignId, EmailAddress, TenantId};
use mailramp_common::Clock;
use mailramp_storage::models::{
    Campaign, CampaignStatus, CreateCampaign, NewRecipient, UpdateCampaign,
};
use mailramp_storage::repository::{CampaignRepository, RecipientRepository};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Campaign definition; omitted pacing values use the configured defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CampaignInput {
    pub name: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub from_name: Option<String>,
    pub from_email: String,
    pub reply_to: Option<String>,
    pub daily_limit: Option<i32>,
    pub hourly_limit: Option<i32>,
    pub delay_between_min_secs: Option<i32>,
    pub delay_between_max_secs: Option<i32>,
    pub batch_size: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecipientInput {
    pub email: String,
    pub name: Option<String>,
    #[serde(default)]
    pub fields: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AddRecipientsResult {
    pub added: u64,
    pub duplicates: u64,
    /// Inputs that are not valid addresses
    pub invalid: Vec<String>,
}

/// Campaign Manager
pub struct CampaignManager {
    campaigns: Arc<dyn CampaignRepository>,
    recipients: Arc<dyn RecipientRepository>,
    variations: Arc<VariationEngine>,
    clock: Arc<dyn Clock>,
    defaults: SchedulerConfig,
}

fn validate_pacing(
    daily_limit: i32,
    hourly_limit: i32,
    delay_min: i32,
    delay_max: i32,
    batch_size: i32,
) -> Result<(), CampaignError> {
    if daily_limit < 1 || hourly_limit < 1 {
        return Err(CampaignError::Validation(
            "Daily and hourly limits must be positive".into(),
        ));
    }
    if delay_min < 0 || delay_max < delay_min {
        return Err(CampaignError::Validation(
            "Delay bounds must satisfy 0 <= min <= max".into(),
        ));
    }
    if batch_size < 1 {
        return Err(CampaignError::Validation("Batch size must be positive".into()));
    }
    Ok(())
}

fn validate_address(value: &str, field: &str) -> Result<(), CampaignError> {
    EmailAddress::parse(value)
        .map(|_| ())
        .ok_or_else(|| CampaignError::Validation(format!("Invalid {} address", field)))
}

impl CampaignManager {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        recipients: Arc<dyn RecipientRepository>,
        variations: Arc<VariationEngine>,
        clock: Arc<dyn Clock>,
        defaults: SchedulerConfig,
    ) -> Self {
        Self {
            campaigns,
            recipients,
            variations,
            clock,
            defaults,
        }
    }

    /// Create a draft campaign
    pub async fn create(
        &self,
        tenant_id: TenantId,
        input: CampaignInput,
    ) -> Result<Campaign, CampaignError> {
        if input.name.trim().is_empty() {
            return Err(CampaignError::Validation("Name is required".into()));
        }
        if input.subject.trim().is_empty() {
            return Err(CampaignError::Validation("Subject is required".into()));
        }
        if input.html_body.trim().is_empty() {
            return Err(CampaignError::Validation("HTML body is required".into()));
        }
        validate_address(&input.from_email, "from")?;
        if let Some(reply_to) = &input.reply_to {
            validate_address(reply_to, "reply-to")?;
        }

        let create = CreateCampaign {
            tenant_id,
            name: input.name.trim().to_string(),
            subject: input.subject,
            html_body: input.html_body,
            text_body: input.text_body,
            from_name: input.from_name,
            from_email: input.from_email.trim().to_string(),
            reply_to: input.reply_to,
            daily_limit: input.daily_limit.unwrap_or(self.defaults.default_daily_limit),
            hourly_limit: input.hourly_limit.unwrap_or(self.defaults.default_hourly_limit),
            delay_min_secs: input
                .delay_between_min_secs
                .unwrap_or(self.defaults.default_delay_min_secs),
            delay_max_secs: input
                .delay_between_max_secs
                .unwrap_or(self.defaults.default_delay_max_secs),
            batch_size: input.batch_size.unwrap_or(self.defaults.batch_size),
        };
        validate_pacing(
            create.daily_limit,
            create.hourly_limit,
            create.delay_min_secs,
            create.delay_max_secs,
            create.batch_size,
        )?;

        let campaign = self.campaigns.create(create, self.clock.now()).await?;
        info!(campaign_id = %campaign.id, tenant_id = %tenant_id, "Campaign created");
        Ok(campaign)
    }

    pub async fn get(&self, tenant_id: TenantId, id: CampaignId) -> Result<Campaign, CampaignError> {
        self.campaigns
            .get_for_tenant(tenant_id, id)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    pub async fn list(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>, CampaignError> {
        Ok(self
            .campaigns
            .list_for_tenant(tenant_id, status, limit.clamp(1, 500), offset.max(0))
            .await?)
    }

    /// Update a draft or scheduled campaign
    pub async fn update(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
        input: UpdateCampaign,
    ) -> Result<Campaign, CampaignError> {
        let current = self.get(tenant_id, id).await?;
        if !current.status_enum().is_some_and(|s| s.is_editable()) {
            return Err(CampaignError::InvalidState {
                action: "update",
                status: current.status,
            });
        }

        if let Some(from) = &input.from_email {
            validate_address(from, "from")?;
        }
        if let Some(reply_to) = &input.reply_to {
            validate_address(reply_to, "reply-to")?;
        }
        validate_pacing(
            input.daily_limit.unwrap_or(current.daily_limit),
            input.hourly_limit.unwrap_or(current.hourly_limit),
            input.delay_min_secs.unwrap_or(current.delay_min_secs),
            input.delay_max_secs.unwrap_or(current.delay_max_secs),
            input.batch_size.unwrap_or(current.batch_size),
        )?;

        let updated = match self
            .campaigns
            .update(tenant_id, id, input, self.clock.now())
            .await?
        {
            Some(campaign) => campaign,
            None => {
                // status changed underneath us
                let status = self.get(tenant_id, id).await?.status;
                return Err(CampaignError::InvalidState {
                    action: "update",
                    status,
                });
            }
        };

        self.variations.invalidate(id);
        Ok(updated)
    }

    /// Add recipients, normalizing addresses and skipping duplicates
    pub async fn add_recipients(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
        inputs: Vec<RecipientInput>,
    ) -> Result<AddRecipientsResult, CampaignError> {
        let campaign = self.get(tenant_id, id).await?;
        if campaign.has_status(CampaignStatus::Sent) {
            return Err(CampaignError::InvalidState {
                action: "add recipients to",
                status: campaign.status,
            });
        }

        let mut result = AddRecipientsResult::default();
        let mut seen = HashSet::new();
        let mut batch = Vec::with_capacity(inputs.len());

        for input in inputs {
            let Some(address) = EmailAddress::parse(&input.email) else {
                result.invalid.push(input.email);
                continue;
            };
            let email = address.normalized();
            if !seen.insert(email.clone()) {
                result.duplicates += 1;
                continue;
            }
            let fields = if input.fields.is_object() {
                input.fields
            } else {
                serde_json::json!({})
            };
            batch.push(NewRecipient {
                email,
                name: input.name.filter(|n| !n.trim().is_empty()),
                fields,
            });
        }

        let submitted = batch.len() as u64;
        result.added = self
            .recipients
            .add(id, tenant_id, batch, self.clock.now())
            .await?;
        result.duplicates += submitted - result.added;

        info!(
            campaign_id = %id,
            added = result.added,
            duplicates = result.duplicates,
            invalid = result.invalid.len(),
            "Recipients added"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::monday_morning;
    use mailramp_common::config::VariationConfig;
    use mailramp_common::ManualClock;
    use mailramp_storage::memory::MemoryStore;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn manager(store: &MemoryStore) -> CampaignManager {
        CampaignManager::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(VariationEngine::new(VariationConfig::default())),
            Arc::new(ManualClock::new(monday_morning())),
            SchedulerConfig::default(),
        )
    }

    fn input() -> CampaignInput {
        CampaignInput {
            name: "Spring sale".into(),
            subject: "Hi {{first_name}}".into(),
            html_body: "<p>Sale</p>".into(),
            from_email: "news@shop.example".into(),
            ..CampaignInput::default()
        }
    }

    #[tokio::test]
    async fn test_create_applies_defaults() {
        let store = MemoryStore::new();
        let manager = manager(&store);
        let tenant = Uuid::new_v4();

        let campaign = manager.create(tenant, input()).await.unwrap();
        let defaults = SchedulerConfig::default();
        assert_eq!(campaign.status, "draft");
        assert_eq!(campaign.hourly_limit, defaults.default_hourly_limit);
        assert_eq!(campaign.daily_limit, defaults.default_daily_limit);
        assert_eq!(campaign.batch_size, defaults.batch_size);

        assert_eq!(manager.get(tenant, campaign.id).await.unwrap().id, campaign.id);
        assert!(matches!(
            manager.get(Uuid::new_v4(), campaign.id).await,
            Err(CampaignError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_create_validates() {
        let store = MemoryStore::new();
        let manager = manager(&store);
        let tenant = Uuid::new_v4();

        let bad_from = CampaignInput {
            from_email: "nope".into(),
            ..input()
        };
        assert!(matches!(
            manager.create(tenant, bad_from).await,
            Err(CampaignError::Validation(_))
        ));

        let bad_delays = CampaignInput {
            delay_between_min_secs: Some(60),
            delay_between_max_secs: Some(10),
            ..input()
        };
        assert!(matches!(
            manager.create(tenant, bad_delays).await,
            Err(CampaignError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_add_recipients_normalizes_and_dedupes() {
        let store = MemoryStore::new();
        let manager = manager(&store);
        let tenant = Uuid::new_v4();
        let campaign = manager.create(tenant, input()).await.unwrap();

        let recipients = vec![
            RecipientInput {
                email: "Ada@Example.COM".into(),
                name: Some("Ada".into()),
                fields: serde_json::json!({"plan": "pro"}),
            },
            RecipientInput {
                email: "ada@example.com".into(),
                name: None,
                fields: serde_json::Value::Null,
            },
            RecipientInput {
                email: "not-an-address".into(),
                name: None,
                fields: serde_json::Value::Null,
            },
        ];
        let result = manager
            .add_recipients(tenant, campaign.id, recipients)
            .await
            .unwrap();
        assert_eq!(
            result,
            AddRecipientsResult {
                added: 1,
                duplicates: 1,
                invalid: vec!["not-an-address".into()],
            }
        );

        // a second upload of the same address is a duplicate
        let again = manager
            .add_recipients(
                tenant,
                campaign.id,
                vec![RecipientInput {
                    email: "ADA@example.com".into(),
                    name: None,
                    fields: serde_json::Value::Null,
                }],
            )
            .await
            .unwrap();
        assert_eq!((again.added, again.duplicates), (0, 1));

        let stored = manager.get(tenant, campaign.id).await.unwrap();
        assert_eq!(stored.total_recipients, 1);
    }

    #[tokio::test]
    async fn test_update_only_while_editable() {
        let store = MemoryStore::new();
        let manager = manager(&store);
        let tenant = Uuid::new_v4();
        let campaign = manager.create(tenant, input()).await.unwrap();

        let updated = manager
            .update(
                tenant,
                campaign.id,
                UpdateCampaign {
                    subject: Some("Last chance".into()),
                    ..UpdateCampaign::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.subject, "Last chance");

        store
            .transition(
                campaign.id,
                &[CampaignStatus::Draft],
                CampaignStatus::Sending,
                monday_morning(),
            )
            .await
            .unwrap();
        let err = manager
            .update(tenant, campaign.id, UpdateCampaign::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::InvalidState { action: "update", .. }));
    }
}
