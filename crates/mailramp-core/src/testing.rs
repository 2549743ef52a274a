//! Shared fixtures for unit and scenario tests

use crate::campaign::{CampaignInput, RecipientInput};
use crate::delivery::{MailTransport, OutboundMessage, SendReceipt, TransportError};
use crate::engine::Engine;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mailramp_common::types::TenantId;
use mailramp_common::{Clock, Config, ManualClock};
use mailramp_storage::memory::MemoryStore;
use mailramp_storage::models::{
    Campaign, CampaignRecipient, CampaignStatus, CreateCampaign, NewRecipient,
    RecipientStatus, SenderConfiguration,
};
use mailramp_storage::repository::{CampaignRepository, JobRepository, RecipientRepository};
use mailramp_storage::Stores;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// 2024-03-04 is a Monday
pub fn monday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
}

pub fn campaign_fixture(hourly_limit: i32, daily_limit: i32) -> Campaign {
    let now = monday_morning();
    Campaign {
        id: Uuid::now_v7(),
        tenant_id: Uuid::new_v4(),
        name: "Spring sale".into(),
        subject: "Spring sale".into(),
        html_body: "<p>Hello {{first_name}}</p>".into(),
        text_body: None,
        from_name: Some("Shop".into()),
        from_email: "news@shop.example".into(),
        reply_to: None,
        daily_limit,
        hourly_limit,
        delay_min_secs: 10,
        delay_max_secs: 20,
        batch_size: 100,
        status: CampaignStatus::Sending.as_str().to_string(),
        scheduled_at: None,
        started_at: Some(now),
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
    }
}

pub fn recipient_fixture(campaign: &Campaign, email: &str, name: Option<&str>) -> CampaignRecipient {
    let now = monday_morning();
    CampaignRecipient {
        id: Uuid::now_v7(),
        campaign_id: campaign.id,
        tenant_id: campaign.tenant_id,
        email: email.to_string(),
        name: name.map(str::to_string),
        fields: serde_json::json!({}),
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
    }
}

pub fn sender_fixture(tenant_id: TenantId) -> SenderConfiguration {
    let now = monday_morning();
    SenderConfiguration {
        tenant_id,
        smtp_host: None,
        smtp_port: None,
        smtp_username: None,
        smtp_password: None,
        smtp_use_tls: false,
        from_email: "news@shop.example".into(),
        from_name: Some("Shop".into()),
        reply_to: None,
        max_per_day: 10_000,
        max_per_hour: 1_000,
        dedicated_ip: None,
        tracking_enabled: true,
        created_at: now,
        updated_at: now,
    }
}

/// Draft campaign with `emails` added as pending recipients
pub async fn seed_campaign(
    store: &MemoryStore,
    tenant_id: TenantId,
    emails: &[&str],
    now: DateTime<Utc>,
) -> Campaign {
    let campaign = store
        .create(
            CreateCampaign {
                tenant_id,
                name: "Seeded".into(),
                subject: "Hello".into(),
                html_body: "<p>Hello</p>".into(),
                text_body: None,
                from_name: None,
                from_email: "news@shop.example".into(),
                reply_to: None,
                daily_limit: 1000,
                hourly_limit: 100,
                delay_min_secs: 0,
                delay_max_secs: 0,
                batch_size: 100,
            },
            now,
        )
        .await
        .unwrap();

    let recipients = emails
        .iter()
        .map(|email| NewRecipient {
            email: email.to_string(),
            name: None,
            fields: serde_json::json!({}),
        })
        .collect();
    store
        .add(campaign.id, tenant_id, recipients, now)
        .await
        .unwrap();

    CampaignRepository::get(store, campaign.id)
        .await
        .unwrap()
        .unwrap()
}

/// Transport that records messages instead of sending them
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutboundMessage>>,
    failures: Mutex<HashMap<String, (TransportError, Option<usize>)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, email: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.to_email == email)
            .count()
    }

    /// Fail every send to `email`
    pub fn fail_for(&self, email: &str, error: TransportError) {
        self.failures
            .lock()
            .unwrap()
            .insert(email.to_string(), (error, None));
    }

    /// Fail the next `times` sends to `email`
    pub fn fail_times(&self, email: &str, error: TransportError, times: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(email.to_string(), (error, Some(times)));
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, TransportError> {
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some((error, remaining)) = failures.get_mut(&message.to_email) {
                let error = error.clone();
                match remaining {
                    None => return Err(error),
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        return Err(error);
                    }
                    Some(_) => {}
                }
            }
        }

        self.sent.lock().unwrap().push(message.clone());
        Ok(SendReceipt {
            message_id: message.message_id.clone(),
        })
    }
}

/// Engine on memory stores and a manual clock
pub struct Harness {
    pub engine: Engine,
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub transport: Arc<RecordingTransport>,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(monday_morning()));
        let transport = Arc::new(RecordingTransport::new());
        let engine = Engine::new(
            config,
            Stores::from_memory(store.clone()),
            transport.clone(),
            clock.clone(),
        )
        .unwrap();

        Self {
            engine,
            store,
            clock,
            transport,
        }
    }

    pub async fn campaign_with(
        &self,
        tenant_id: TenantId,
        input: CampaignInput,
        emails: &[String],
    ) -> Campaign {
        let campaign = self.engine.campaigns.create(tenant_id, input).await.unwrap();
        let recipients = emails
            .iter()
            .map(|email| RecipientInput {
                email: email.clone(),
                name: None,
                fields: serde_json::Value::Null,
            })
            .collect();
        self.engine
            .campaigns
            .add_recipients(tenant_id, campaign.id, recipients)
            .await
            .unwrap();
        self.reload(campaign.id).await
    }

    pub async fn reload(&self, id: mailramp_common::types::CampaignId) -> Campaign {
        CampaignRepository::get(&self.store, id)
            .await
            .unwrap()
            .unwrap()
    }

    /// Run both queues, jumping the clock to each due job, until nothing is
    /// due at or before `until`. Returns the number of jobs processed.
    pub async fn drive(&self, until: DateTime<Utc>) -> usize {
        let (batches, sends) = self.engine.workers();
        let mut processed = 0;

        loop {
            let ran = batches.run_once().await.unwrap() + sends.run_once().await.unwrap();
            processed += ran;
            if ran > 0 {
                continue;
            }

            let next = self
                .engine
                .stores
                .jobs
                .next_due_at(None)
                .await
                .unwrap();
            match next {
                Some(at) if at <= until && at > self.clock.now() => self.clock.set(at),
                _ => break,
            }
        }

        processed
    }
}
