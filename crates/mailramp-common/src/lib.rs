//! MailRamp Common - Shared types and utilities
//!
//! This crate provides configuration, the error type, identifiers and
//! the clock abstraction shared across all MailRamp components.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
