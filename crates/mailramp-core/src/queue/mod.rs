//! Durable delayed job queue and its workers

pub mod jobs;
pub mod worker;

pub use jobs::{calculate_backoff, CampaignJob, JobQueue, QueueStats, CAMPAIGN_QUEUE, EMAIL_QUEUE};
pub use worker::{JobHandler, QueueWorker};
