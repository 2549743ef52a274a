//! Warm-Up Governor - Enforces the daily ceiling of a sending IP

use super::{curve, provider, WarmupError};
use crate::business_hours::{next_hour, BusinessHours};
use chrono::{DateTime, NaiveDate, Utc};
use mailramp_common::config::WarmupConfig;
use mailramp_common::types::{TenantId, WarmupId};
use mailramp_common::{Clock, Error};
use mailramp_storage::models::{MailboxProvider, WarmupPattern, WarmupSchedule, WarmupStatus};
use mailramp_storage::repository::WarmupRepository;
use mailramp_storage::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Parameters for a new warm-up schedule; omitted values use the configured defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateWarmup {
    pub ip_address: String,
    pub start_date: Option<NaiveDate>,
    pub total_days: Option<i32>,
    pub target_volume: Option<i32>,
    pub pattern: Option<WarmupPattern>,
}

/// Why the governor refused a send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    NotStarted,
    Paused,
    DailyLimitReached,
    OutsideBusinessHours,
}

/// Admission answer for an IP at an instant
#[derive(Debug, Clone)]
pub enum WarmupDecision {
    /// No schedule governs the IP
    Unconstrained,
    Allowed {
        schedule: Box<WarmupSchedule>,
        remaining_today: i32,
    },
    Denied {
        reason: DenyReason,
        retry_at: DateTime<Utc>,
    },
}

impl WarmupDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, WarmupDecision::Denied { .. })
    }
}

/// Warm-Up Governor
pub struct WarmupGovernor {
    warmups: Arc<dyn WarmupRepository>,
    clock: Arc<dyn Clock>,
    business_hours: BusinessHours,
    defaults: WarmupConfig,
}

impl WarmupGovernor {
    pub fn new(
        warmups: Arc<dyn WarmupRepository>,
        clock: Arc<dyn Clock>,
        business_hours: BusinessHours,
        defaults: WarmupConfig,
    ) -> Self {
        Self {
            warmups,
            clock,
            business_hours,
            defaults,
        }
    }

    /// Create a schedule for an IP
    pub async fn create_schedule(
        &self,
        tenant_id: TenantId,
        input: CreateWarmup,
    ) -> Result<WarmupSchedule, WarmupError> {
        let ip_address = input.ip_address.trim().to_string();
        if ip_address.is_empty() {
            return Err(WarmupError::Validation("ip_address is required".into()));
        }

        let pattern = match input.pattern {
            Some(pattern) => pattern,
            None => self
                .defaults
                .default_pattern
                .parse()
                .map_err(WarmupError::Validation)?,
        };
        let total_days = input.total_days.unwrap_or(self.defaults.default_total_days);
        let target_volume = input
            .target_volume
            .unwrap_or(self.defaults.default_target_volume);
        if total_days < 1 || target_volume < 1 {
            return Err(WarmupError::Validation(
                "total_days and target_volume must be positive".into(),
            ));
        }

        let now = self.clock.now();
        let today = self.business_hours.local_date(now);
        let start_date = input.start_date.unwrap_or(today);
        let (status, current_day) = if start_date <= today {
            (WarmupStatus::Active, day_number(start_date, today))
        } else {
            (WarmupStatus::Scheduled, 0)
        };

        let schedule = WarmupSchedule {
            id: Uuid::new_v4(),
            tenant_id,
            ip_address,
            start_date,
            total_days,
            target_volume,
            pattern: pattern.as_str().to_string(),
            days: Json(curve::build_days(pattern, total_days, target_volume)),
            current_day,
            emails_sent_today: 0,
            gmail_sent_today: 0,
            outlook_sent_today: 0,
            yahoo_sent_today: 0,
            other_sent_today: 0,
            total_emails_sent: 0,
            counters_date: today,
            status: status.as_str().to_string(),
            created_at: now,
            updated_at: now,
        };

        let schedule = self.warmups.create(schedule).await.map_err(|e| match e {
            Error::Conflict(msg) => WarmupError::Conflict(msg),
            other => WarmupError::Storage(other),
        })?;

        info!(
            tenant_id = %tenant_id,
            warmup_id = %schedule.id,
            ip = %schedule.ip_address,
            pattern = %schedule.pattern,
            "Warm-up schedule created"
        );

        Ok(schedule)
    }

    /// Check whether the IP may send at `now`, rolling counters to the current day
    pub async fn can_send(
        &self,
        tenant_id: TenantId,
        ip_address: &str,
        now: DateTime<Utc>,
    ) -> Result<WarmupDecision, WarmupError> {
        let Some(mut schedule) = self.warmups.find_current(tenant_id, ip_address).await? else {
            return Ok(WarmupDecision::Unconstrained);
        };

        if schedule.has_status(WarmupStatus::Paused) {
            return Ok(WarmupDecision::Denied {
                reason: DenyReason::Paused,
                retry_at: next_hour(now),
            });
        }

        let today = self.business_hours.local_date(now);
        let mut changed = false;

        if schedule.has_status(WarmupStatus::Scheduled) {
            if schedule.start_date > today {
                let opening = self.business_hours.opening_on(schedule.start_date);
                return Ok(WarmupDecision::Denied {
                    reason: DenyReason::NotStarted,
                    retry_at: self.business_hours.next_open(opening),
                });
            }
            schedule.status = WarmupStatus::Active.as_str().to_string();
            changed = true;
            info!(warmup_id = %schedule.id, "Warm-up schedule started");
        }

        let day = day_number(schedule.start_date, today);
        if day > schedule.total_days {
            schedule.status = WarmupStatus::Completed.as_str().to_string();
            schedule.updated_at = now;
            self.warmups.save(&schedule).await?;
            info!(warmup_id = %schedule.id, "Warm-up schedule completed");
            return Ok(WarmupDecision::Unconstrained);
        }

        if schedule.counters_date != today {
            schedule.roll_to(today, day);
            changed = true;
        } else if schedule.current_day != day {
            schedule.current_day = day;
            changed = true;
        }

        if changed {
            schedule.updated_at = now;
            self.warmups.save(&schedule).await?;
        }

        let target = self.target_for(&schedule, day);
        if schedule.emails_sent_today >= target {
            debug!(
                warmup_id = %schedule.id,
                sent = schedule.emails_sent_today,
                target,
                "Warm-up daily limit reached"
            );
            return Ok(WarmupDecision::Denied {
                reason: DenyReason::DailyLimitReached,
                retry_at: self.business_hours.next_day_opening(now),
            });
        }

        if !self.business_hours.is_open(now) {
            return Ok(WarmupDecision::Denied {
                reason: DenyReason::OutsideBusinessHours,
                retry_at: self.business_hours.next_open(now),
            });
        }

        let remaining_today = target - schedule.emails_sent_today;
        Ok(WarmupDecision::Allowed {
            schedule: Box::new(schedule),
            remaining_today,
        })
    }

    /// Remaining sends today for one provider
    pub fn provider_allowance(&self, schedule: &WarmupSchedule, provider: MailboxProvider) -> i32 {
        let day = schedule.current_day.max(1);
        let (max_emails, percent) = match schedule.plan_for_day(day) {
            Some(plan) => (plan.max_emails, plan.distribution.percent(provider)),
            None => (
                self.target_for(schedule, day),
                curve::provider_distribution(day).percent(provider),
            ),
        };

        let share = (max_emails as i64 * percent as i64 + 99) / 100;
        (share as i32 - schedule.provider_sent_today(provider)).max(0)
    }

    /// Count a send against the schedule governing the IP
    pub async fn record_email_sent(
        &self,
        tenant_id: TenantId,
        ip_address: &str,
        recipient_email: &str,
    ) -> Result<Option<WarmupSchedule>, WarmupError> {
        let now = self.clock.now();
        let Some(mut schedule) = self.warmups.find_current(tenant_id, ip_address).await? else {
            return Ok(None);
        };
        if !schedule.has_status(WarmupStatus::Active) {
            return Ok(None);
        }

        let today = self.business_hours.local_date(now);
        if schedule.counters_date != today {
            schedule.roll_to(today, day_number(schedule.start_date, today));
            schedule.updated_at = now;
            self.warmups.save(&schedule).await?;
        }

        let provider = provider::classify(recipient_email);
        Ok(self.warmups.record_send(schedule.id, provider, now).await?)
    }

    pub async fn pause(
        &self,
        tenant_id: TenantId,
        id: WarmupId,
    ) -> Result<WarmupSchedule, WarmupError> {
        let mut schedule = self.get(tenant_id, id).await?;
        if !(schedule.has_status(WarmupStatus::Active)
            || schedule.has_status(WarmupStatus::Scheduled))
        {
            return Err(WarmupError::InvalidState {
                action: "pause",
                status: schedule.status,
            });
        }

        schedule.status = WarmupStatus::Paused.as_str().to_string();
        schedule.updated_at = self.clock.now();
        self.warmups.save(&schedule).await?;
        info!(warmup_id = %id, "Warm-up schedule paused");
        Ok(schedule)
    }

    pub async fn resume(
        &self,
        tenant_id: TenantId,
        id: WarmupId,
    ) -> Result<WarmupSchedule, WarmupError> {
        let mut schedule = self.get(tenant_id, id).await?;
        if !schedule.has_status(WarmupStatus::Paused) {
            return Err(WarmupError::InvalidState {
                action: "resume",
                status: schedule.status,
            });
        }

        if let Some(other) = self
            .warmups
            .find_current(tenant_id, &schedule.ip_address)
            .await?
            .filter(|other| other.id != id && !other.has_status(WarmupStatus::Paused))
        {
            return Err(WarmupError::Conflict(format!(
                "Schedule {} already governs {}",
                other.id, schedule.ip_address
            )));
        }

        let now = self.clock.now();
        let today = self.business_hours.local_date(now);
        let status = if schedule.start_date <= today {
            WarmupStatus::Active
        } else {
            WarmupStatus::Scheduled
        };
        schedule.status = status.as_str().to_string();
        schedule.updated_at = now;
        self.warmups.save(&schedule).await?;
        info!(warmup_id = %id, status = %status, "Warm-up schedule resumed");
        Ok(schedule)
    }

    pub async fn get(&self, tenant_id: TenantId, id: WarmupId) -> Result<WarmupSchedule, WarmupError> {
        self.warmups
            .get_for_tenant(tenant_id, id)
            .await?
            .ok_or(WarmupError::NotFound)
    }

    pub async fn list(&self, tenant_id: TenantId) -> Result<Vec<WarmupSchedule>, WarmupError> {
        Ok(self.warmups.list_for_tenant(tenant_id).await?)
    }

    fn target_for(&self, schedule: &WarmupSchedule, day: i32) -> i32 {
        match schedule.plan_for_day(day) {
            Some(plan) => plan.max_emails,
            None => {
                let pattern = schedule
                    .pattern
                    .parse()
                    .unwrap_or(WarmupPattern::Conservative);
                curve::daily_target(pattern, day, schedule.total_days, schedule.target_volume)
            }
        }
    }
}

/// 1-based day of a schedule starting on `start`
fn day_number(start: NaiveDate, today: NaiveDate) -> i32 {
    ((today - start).num_days() + 1).max(1) as i32
}
