//! Database models

use chrono::{DateTime, NaiveDate, Utc};
use mailramp_common::types::{CampaignId, JobId, RecipientId, TenantId, WarmupId};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Paused,
    Sent,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Sent => "sent",
        }
    }

    /// Draft and scheduled campaigns can still be edited or deleted
    pub fn is_editable(&self) -> bool {
        matches!(self, CampaignStatus::Draft | CampaignStatus::Scheduled)
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "sending" => Ok(CampaignStatus::Sending),
            "paused" => Ok(CampaignStatus::Paused),
            "sent" => Ok(CampaignStatus::Sent),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub tenant_id: TenantId,
    pub name: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub from_name: Option<String>,
    pub from_email: String,
    pub reply_to: Option<String>,
    pub daily_limit: i32,
    pub hourly_limit: i32,
    pub delay_min_secs: i32,
    pub delay_max_secs: i32,
    pub batch_size: i32,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub opened_count: i32,
    pub clicked_count: i32,
    pub bounced_count: i32,
    pub unsubscribed_count: i32,
    pub failed_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    pub fn has_status(&self, status: CampaignStatus) -> bool {
        self.status == status.as_str()
    }

    /// Calculate progress percentage
    pub fn progress_percentage(&self) -> f64 {
        if self.total_recipients == 0 {
            0.0
        } else {
            (self.sent_count as f64 / self.total_recipients as f64) * 100.0
        }
    }
}

/// Create campaign input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub tenant_id: TenantId,
    pub name: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub from_name: Option<String>,
    pub from_email: String,
    pub reply_to: Option<String>,
    pub daily_limit: i32,
    pub hourly_limit: i32,
    pub delay_min_secs: i32,
    pub delay_max_secs: i32,
    pub batch_size: i32,
}

/// Update campaign input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCampaign {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub from_name: Option<String>,
    pub from_email: Option<String>,
    pub reply_to: Option<String>,
    pub daily_limit: Option<i32>,
    pub hourly_limit: Option<i32>,
    #[serde(alias = "delay_between_min_secs")]
    pub delay_min_secs: Option<i32>,
    #[serde(alias = "delay_between_max_secs")]
    pub delay_max_secs: Option<i32>,
    pub batch_size: Option<i32>,
}

/// Recipient status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Scheduled,
    Sending,
    Sent,
    Opened,
    Clicked,
    Failed,
    Bounced,
    Unsubscribed,
    Cancelled,
}

impl RecipientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientStatus::Pending => "pending",
            RecipientStatus::Scheduled => "scheduled",
            RecipientStatus::Sending => "sending",
            RecipientStatus::Sent => "sent",
            RecipientStatus::Opened => "opened",
            RecipientStatus::Clicked => "clicked",
            RecipientStatus::Failed => "failed",
            RecipientStatus::Bounced => "bounced",
            RecipientStatus::Unsubscribed => "unsubscribed",
            RecipientStatus::Cancelled => "cancelled",
        }
    }

    pub const ALL: [RecipientStatus; 10] = [
        RecipientStatus::Pending,
        RecipientStatus::Scheduled,
        RecipientStatus::Sending,
        RecipientStatus::Sent,
        RecipientStatus::Opened,
        RecipientStatus::Clicked,
        RecipientStatus::Failed,
        RecipientStatus::Bounced,
        RecipientStatus::Unsubscribed,
        RecipientStatus::Cancelled,
    ];
}

impl std::fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecipientStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecipientStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid recipient status: {}", s))
    }
}

/// Campaign recipient model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignRecipient {
    pub id: RecipientId,
    pub campaign_id: CampaignId,
    pub tenant_id: TenantId,
    pub email: String,
    pub name: Option<String>,
    pub fields: serde_json::Value,
    pub tracking_id: String,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub first_opened_at: Option<DateTime<Utc>>,
    pub first_clicked_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignRecipient {
    /// Get status enum
    pub fn status_enum(&self) -> Option<RecipientStatus> {
        self.status.parse().ok()
    }

    pub fn has_status(&self, status: RecipientStatus) -> bool {
        self.status == status.as_str()
    }

    /// A failed row with a pending retry
    pub fn is_retryable(&self) -> bool {
        self.has_status(RecipientStatus::Failed) && self.next_attempt_at.is_some()
    }

    /// Rows that have not been handed to the transport yet
    pub fn is_pre_send(&self) -> bool {
        self.has_status(RecipientStatus::Pending)
            || self.has_status(RecipientStatus::Scheduled)
            || self.is_retryable()
    }
}

/// New recipient input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRecipient {
    pub email: String,
    pub name: Option<String>,
    #[serde(default)]
    pub fields: serde_json::Value,
}

/// Recipients that still keep a campaign open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutstandingCounts {
    pub pending: i64,
    /// Scheduled, sending, or failed with a retry pending
    pub in_flight: i64,
}

impl OutstandingCounts {
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.in_flight == 0
    }
}

/// Activity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Opened,
    Clicked,
    Bounced,
    Unsubscribed,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Opened => "opened",
            ActivityKind::Clicked => "clicked",
            ActivityKind::Bounced => "bounced",
            ActivityKind::Unsubscribed => "unsubscribed",
        }
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Campaign activity model (append-only)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignActivity {
    pub id: uuid::Uuid,
    pub campaign_id: CampaignId,
    pub recipient_id: RecipientId,
    pub kind: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub url: Option<String>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// New activity input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewActivity {
    pub campaign_id: CampaignId,
    pub recipient_id: RecipientId,
    pub kind: ActivityKind,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub url: Option<String>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Bounce kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BounceKind {
    Hard,
    Soft,
    Complaint,
}

impl BounceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BounceKind::Hard => "hard",
            BounceKind::Soft => "soft",
            BounceKind::Complaint => "complaint",
        }
    }

    /// Stronger kinds replace weaker ones on the same record
    pub fn rank(&self) -> u8 {
        match self {
            BounceKind::Soft => 0,
            BounceKind::Hard => 1,
            BounceKind::Complaint => 2,
        }
    }
}

impl std::fmt::Display for BounceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BounceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hard" | "permanent" => Ok(BounceKind::Hard),
            "soft" | "transient" => Ok(BounceKind::Soft),
            "complaint" | "spam" => Ok(BounceKind::Complaint),
            _ => Err(format!("Invalid bounce kind: {}", s)),
        }
    }
}

/// Bounce record; `tenant_id = None` is global
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BounceRecord {
    pub id: uuid::Uuid,
    pub tenant_id: Option<TenantId>,
    pub email: String,
    pub kind: String,
    pub reason: Option<String>,
    pub source: Option<String>,
    pub bounce_count: i32,
    pub first_bounced_at: DateTime<Utc>,
    pub last_bounced_at: DateTime<Utc>,
}

impl BounceRecord {
    pub fn kind_enum(&self) -> Option<BounceKind> {
        self.kind.parse().ok()
    }
}

/// Bounce input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBounce {
    pub tenant_id: Option<TenantId>,
    pub email: String,
    pub kind: BounceKind,
    pub reason: Option<String>,
    pub source: Option<String>,
    pub occurred_at: DateTime<Utc>,
    /// Soft counts restart when the first bounce is older than this
    pub window_start: DateTime<Utc>,
}

/// Unsubscribe source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsubscribeSource {
    Manual,
    Link,
    Token,
    Bounce,
    Complaint,
}

impl UnsubscribeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnsubscribeSource::Manual => "manual",
            UnsubscribeSource::Link => "link",
            UnsubscribeSource::Token => "token",
            UnsubscribeSource::Bounce => "bounce",
            UnsubscribeSource::Complaint => "complaint",
        }
    }
}

impl std::fmt::Display for UnsubscribeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unsubscribe model; `tenant_id = None` is global
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Unsubscribe {
    pub id: uuid::Uuid,
    pub tenant_id: Option<TenantId>,
    pub email: String,
    pub source: String,
    pub campaign_id: Option<CampaignId>,
    pub reason: Option<String>,
    pub unsubscribed_at: DateTime<Utc>,
}

/// Create unsubscribe input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUnsubscribe {
    pub tenant_id: Option<TenantId>,
    pub email: String,
    pub source: UnsubscribeSource,
    pub campaign_id: Option<CampaignId>,
    pub reason: Option<String>,
    pub unsubscribed_at: DateTime<Utc>,
}

/// Warm-up curve shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupPattern {
    Linear,
    Exponential,
    Conservative,
}

impl WarmupPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarmupPattern::Linear => "linear",
            WarmupPattern::Exponential => "exponential",
            WarmupPattern::Conservative => "conservative",
        }
    }
}

impl std::fmt::Display for WarmupPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WarmupPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(WarmupPattern::Linear),
            "exponential" => Ok(WarmupPattern::Exponential),
            "conservative" => Ok(WarmupPattern::Conservative),
            _ => Err(format!("Invalid warm-up pattern: {}", s)),
        }
    }
}

/// Warm-up schedule status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupStatus {
    Scheduled,
    Active,
    Paused,
    Completed,
}

impl WarmupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarmupStatus::Scheduled => "scheduled",
            WarmupStatus::Active => "active",
            WarmupStatus::Paused => "paused",
            WarmupStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for WarmupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mailbox provider buckets used for warm-up distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailboxProvider {
    Gmail,
    Outlook,
    Yahoo,
    Other,
}

impl MailboxProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailboxProvider::Gmail => "gmail",
            MailboxProvider::Outlook => "outlook",
            MailboxProvider::Yahoo => "yahoo",
            MailboxProvider::Other => "other",
        }
    }
}

impl std::fmt::Display for MailboxProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Percentage of a day's volume per provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDistribution {
    pub gmail: i32,
    pub outlook: i32,
    pub yahoo: i32,
    pub other: i32,
}

impl ProviderDistribution {
    pub fn percent(&self, provider: MailboxProvider) -> i32 {
        match provider {
            MailboxProvider::Gmail => self.gmail,
            MailboxProvider::Outlook => self.outlook,
            MailboxProvider::Yahoo => self.yahoo,
            MailboxProvider::Other => self.other,
        }
    }
}

/// One day of a warm-up plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupDay {
    pub day: i32,
    pub max_emails: i32,
    pub distribution: ProviderDistribution,
}

/// Warm-up schedule model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WarmupSchedule {
    pub id: WarmupId,
    pub tenant_id: TenantId,
    pub ip_address: String,
    pub start_date: NaiveDate,
    pub total_days: i32,
    pub target_volume: i32,
    pub pattern: String,
    pub days: Json<Vec<WarmupDay>>,
    pub current_day: i32,
    pub emails_sent_today: i32,
    pub gmail_sent_today: i32,
    pub outlook_sent_today: i32,
    pub yahoo_sent_today: i32,
    pub other_sent_today: i32,
    pub total_emails_sent: i64,
    pub counters_date: NaiveDate,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WarmupSchedule {
    pub fn has_status(&self, status: WarmupStatus) -> bool {
        self.status == status.as_str()
    }

    pub fn plan_for_day(&self, day: i32) -> Option<&WarmupDay> {
        self.days.0.iter().find(|d| d.day == day)
    }

    pub fn provider_sent_today(&self, provider: MailboxProvider) -> i32 {
        match provider {
            MailboxProvider::Gmail => self.gmail_sent_today,
            MailboxProvider::Outlook => self.outlook_sent_today,
            MailboxProvider::Yahoo => self.yahoo_sent_today,
            MailboxProvider::Other => self.other_sent_today,
        }
    }

    /// Zero the per-day counters for a new calendar day
    pub fn roll_to(&mut self, date: NaiveDate, day: i32) {
        self.counters_date = date;
        self.current_day = day;
        self.emails_sent_today = 0;
        self.gmail_sent_today = 0;
        self.outlook_sent_today = 0;
        self.yahoo_sent_today = 0;
        self.other_sent_today = 0;
    }
}

/// Sender configuration model (one per tenant)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SenderConfiguration {
    pub tenant_id: TenantId,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<i32>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_use_tls: bool,
    pub from_email: String,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub max_per_day: i32,
    pub max_per_hour: i32,
    pub dedicated_ip: Option<String>,
    pub tracking_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rate counter scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateScope {
    Tenant,
    Campaign,
}

impl RateScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateScope::Tenant => "tenant",
            RateScope::Campaign => "campaign",
        }
    }
}

/// Rate counter window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateWindow {
    Hour,
    Day,
}

impl RateWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateWindow::Hour => "hour",
            RateWindow::Day => "day",
        }
    }
}

/// Rate limit counter model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RateCounter {
    pub scope: String,
    pub scope_id: uuid::Uuid,
    pub window_type: String,
    pub window_start: DateTime<Utc>,
    pub count: i32,
}

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// Job queue model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub payload: serde_json::Value,
    pub campaign_id: Option<CampaignId>,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub run_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// New job input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub queue: String,
    pub payload: serde_json::Value,
    pub campaign_id: Option<CampaignId>,
    pub run_at: DateTime<Utc>,
    pub max_attempts: i32,
}
