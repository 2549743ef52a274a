//! Repository layer for data access

pub mod activities;
pub mod campaigns;
pub mod jobs;
pub mod rate_counters;
pub mod recipients;
pub mod sender_configs;
pub mod suppressions;
pub mod warmups;

// Repository traits
pub use activities::ActivityRepository;
pub use campaigns::CampaignRepository;
pub use jobs::JobRepository;
pub use rate_counters::RateCounterRepository;
pub use recipients::RecipientRepository;
pub use sender_configs::SenderConfigRepository;
pub use suppressions::SuppressionRepository;
pub use warmups::WarmupRepository;

// PostgreSQL implementations
pub use activities::DbActivityRepository;
pub use campaigns::DbCampaignRepository;
pub use jobs::DbJobRepository;
pub use rate_counters::DbRateCounterRepository;
pub use recipients::DbRecipientRepository;
pub use sender_configs::DbSenderConfigRepository;
pub use suppressions::DbSuppressionRepository;
pub use warmups::DbWarmupRepository;
