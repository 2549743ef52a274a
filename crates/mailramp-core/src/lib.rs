//! MailRamp Core - Campaign sending engine
//!
//! This crate provides the campaign scheduler, warm-up governor, suppression
//! lists, event tracking, webhook parsing and the SMTP delivery adapter.

pub mod business_hours;
pub mod campaign;
pub mod delivery;
pub mod engine;
pub mod metrics;
pub mod queue;
pub mod rate_limiter;
pub mod suppression;
pub mod tracking;
pub mod variation;
pub mod warmup;
pub mod webhooks;

#[cfg(test)]
mod testing;

pub use business_hours::BusinessHours;
pub use campaign::{CampaignError, CampaignManager, CampaignScheduler};
pub use delivery::{DeliveryAdapter, MailTransport, SmtpTransport};
pub use engine::Engine;
pub use metrics::Metrics;
pub use queue::{JobQueue, QueueWorker};
pub use rate_limiter::RateLimiter;
pub use suppression::SuppressionManager;
pub use tracking::{TrackingError, TrackingService};
pub use variation::VariationEngine;
pub use warmup::{WarmupError, WarmupGovernor};
pub use webhooks::{BounceEvent, WebhookError, WebhookNormalizer};
