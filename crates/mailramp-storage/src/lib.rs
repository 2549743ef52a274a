//! MailRamp Storage - Persistence for campaigns, suppression and queues
//!
//! This crate provides the repository traits used by the engine, with a
//! PostgreSQL implementation and an in-memory one.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use repository::*;
pub use sqlx::types::Json;

use std::sync::Arc;

/// The full set of stores the engine runs against
#[derive(Clone)]
pub struct Stores {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub recipients: Arc<dyn RecipientRepository>,
    pub activities: Arc<dyn ActivityRepository>,
    pub suppressions: Arc<dyn SuppressionRepository>,
    pub warmups: Arc<dyn WarmupRepository>,
    pub rate_counters: Arc<dyn RateCounterRepository>,
    pub sender_configs: Arc<dyn SenderConfigRepository>,
    pub jobs: Arc<dyn JobRepository>,
}

impl Stores {
    /// PostgreSQL-backed stores sharing one pool
    pub fn postgres(pool: DatabasePool) -> Self {
        Self {
            campaigns: Arc::new(DbCampaignRepository::new(pool.clone())),
            recipients: Arc::new(DbRecipientRepository::new(pool.clone())),
            activities: Arc::new(DbActivityRepository::new(pool.clone())),
            suppressions: Arc::new(DbSuppressionRepository::new(pool.clone())),
            warmups: Arc::new(DbWarmupRepository::new(pool.clone())),
            rate_counters: Arc::new(DbRateCounterRepository::new(pool.clone())),
            sender_configs: Arc::new(DbSenderConfigRepository::new(pool.clone())),
            jobs: Arc::new(DbJobRepository::new(pool)),
        }
    }

    /// In-memory stores sharing one state
    pub fn memory() -> Self {
        Self::from_memory(MemoryStore::new())
    }

    pub fn from_memory(store: MemoryStore) -> Self {
        Self {
            campaigns: Arc::new(store.clone()),
            recipients: Arc::new(store.clone()),
            activities: Arc::new(store.clone()),
            suppressions: Arc::new(store.clone()),
            warmups: Arc::new(store.clone()),
            rate_counters: Arc::new(store.clone()),
            sender_configs: Arc::new(store.clone()),
            jobs: Arc::new(store),
        }
    }
}
