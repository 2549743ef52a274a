//! Rate Limiter - Hourly and daily send ceilings per campaign and tenant

use crate::business_hours::BusinessHours;
use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use mailramp_common::types::TenantId;
use mailramp_common::Result;
use mailramp_storage::models::{Campaign, RateScope, RateWindow, SenderConfiguration};
use mailramp_storage::repository::{RateCounterRepository, SenderConfigRepository};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Rate limiter for controlling send rates per campaign and tenant
pub struct RateLimiter {
    counters: Arc<dyn RateCounterRepository>,
    sender_configs: Arc<dyn SenderConfigRepository>,
    business_hours: BusinessHours,
    default_hourly_limit: i32,
    default_daily_limit: i32,
    /// Cache of sender configuration per tenant
    cache: Arc<RwLock<HashMap<TenantId, Option<SenderConfiguration>>>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(
        counters: Arc<dyn RateCounterRepository>,
        sender_configs: Arc<dyn SenderConfigRepository>,
        business_hours: BusinessHours,
    ) -> Self {
        Self {
            counters,
            sender_configs,
            business_hours,
            default_hourly_limit: 100,
            default_daily_limit: 1000,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Tenant limits used when no sender configuration exists
    pub fn with_default_limits(mut self, per_hour: i32, per_day: i32) -> Self {
        self.default_hourly_limit = per_hour;
        self.default_daily_limit = per_day;
        self
    }

    /// Start of the hour window containing `at`, in the local offset
    pub fn hour_window(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let local = at.with_timezone(&self.business_hours.offset());
        local
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .and_then(|t| t.with_minute(0))
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(at)
    }

    /// Start of the hour window after the one containing `at`
    pub fn next_hour_window(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        self.hour_window(at) + Duration::hours(1)
    }

    /// Start of the local day containing `at`
    pub fn day_window(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = self.business_hours.local_date(at);
        let midnight = date.and_time(NaiveTime::MIN);
        let offset = self.business_hours.offset().local_minus_utc() as i64;
        DateTime::from_naive_utc_and_offset(midnight - Duration::seconds(offset), Utc)
    }

    /// Sender configuration for a tenant (with caching)
    pub async fn sender_config(&self, tenant_id: TenantId) -> Result<Option<SenderConfiguration>> {
        {
            let cache = self.cache.read().await;
            if let Some(config) = cache.get(&tenant_id) {
                return Ok(config.clone());
            }
        }

        let config = self.sender_configs.get(tenant_id).await?;

        {
            let mut cache = self.cache.write().await;
            cache.insert(tenant_id, config.clone());
        }

        Ok(config)
    }

    /// Get remaining quota for a campaign at `now`.
    ///
    /// Each window is the smaller of what the campaign and its tenant have left.
    pub async fn remaining(&self, campaign: &Campaign, now: DateTime<Utc>) -> Result<RemainingQuota> {
        let sender = self.sender_config(campaign.tenant_id).await?;
        let (tenant_hourly, tenant_daily) = match &sender {
            Some(config) => (config.max_per_hour, config.max_per_day),
            None => (self.default_hourly_limit, self.default_daily_limit),
        };

        let hour_start = self.hour_window(now);
        let day_start = self.day_window(now);

        let campaign_hour = self
            .counters
            .get(RateScope::Campaign, campaign.id, RateWindow::Hour, hour_start)
            .await?;
        let campaign_day = self
            .counters
            .get(RateScope::Campaign, campaign.id, RateWindow::Day, day_start)
            .await?;
        let tenant_hour = self
            .counters
            .get(RateScope::Tenant, campaign.tenant_id, RateWindow::Hour, hour_start)
            .await?;
        let tenant_day = self
            .counters
            .get(RateScope::Tenant, campaign.tenant_id, RateWindow::Day, day_start)
            .await?;

        let per_hour = (campaign.hourly_limit as i64 - campaign_hour)
            .min(tenant_hourly as i64 - tenant_hour)
            .max(0);
        let per_day = (campaign.daily_limit as i64 - campaign_day)
            .min(tenant_daily as i64 - tenant_day)
            .max(0);

        debug!(
            campaign_id = %campaign.id,
            per_hour, per_day, "Remaining send quota"
        );

        Ok(RemainingQuota {
            per_hour: per_hour as i32,
            per_day: per_day as i32,
        })
    }

    /// Increment the counters after sending
    pub async fn record_send(&self, campaign: &Campaign, now: DateTime<Utc>) -> Result<()> {
        let hour_start = self.hour_window(now);
        let day_start = self.day_window(now);

        for (scope, id) in [
            (RateScope::Campaign, campaign.id),
            (RateScope::Tenant, campaign.tenant_id),
        ] {
            self.counters
                .increment(scope, id, RateWindow::Hour, hour_start)
                .await?;
            self.counters
                .increment(scope, id, RateWindow::Day, day_start)
                .await?;
        }

        Ok(())
    }

    /// Clear the sender configuration cache for a tenant
    pub async fn clear_cache(&self, tenant_id: TenantId) {
        let mut cache = self.cache.write().await;
        cache.remove(&tenant_id);
    }

    /// Cleanup old counters (run periodically by maintenance)
    pub async fn cleanup_old_counters(&self, now: DateTime<Utc>) -> Result<u64> {
        // Delete counters older than 2 days
        self.counters.delete_before(now - Duration::days(2)).await
    }
}

/// Remaining quota for a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingQuota {
    pub per_hour: i32,
    pub per_day: i32,
}

impl RemainingQuota {
    /// Get the minimum remaining across both windows
    pub fn min(&self) -> i32 {
        self.per_hour.min(self.per_day)
    }
}
