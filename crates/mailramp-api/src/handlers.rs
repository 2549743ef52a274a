//! API request handlers

pub mod campaigns;
pub mod health;
pub mod metrics;
pub mod queue;
pub mod senders;
pub mod suppressions;
pub mod tracking;
pub mod unsubscribe;
pub mod warmups;
pub mod webhooks;

pub use health::*;
