//! Campaign lifecycle, pacing and batch scheduling

pub mod manager;
pub mod pacing;
pub mod scheduler;

pub use manager::{AddRecipientsResult, CampaignInput, CampaignManager, RecipientInput};
pub use scheduler::{BatchOutcome, CampaignScheduler, SendOutcome};

use crate::warmup::WarmupError;
use thiserror::Error;

/// Campaign errors
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Campaign not found")]
    NotFound,

    #[error("Cannot {action} a campaign in {status} status")]
    InvalidState { action: &'static str, status: String },

    #[error("Campaign has no recipients")]
    NoRecipients,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Warmup(#[from] WarmupError),

    #[error(transparent)]
    Storage(#[from] mailramp_common::Error),
}

impl CampaignError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CampaignError::NotFound => 404,
            CampaignError::InvalidState { .. } | CampaignError::NoRecipients => 409,
            CampaignError::Validation(_) => 422,
            CampaignError::Warmup(e) => e.status_code(),
            CampaignError::Storage(e) => e.status_code(),
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            CampaignError::NotFound => "NOT_FOUND",
            CampaignError::InvalidState { .. } => "INVALID_STATE",
            CampaignError::NoRecipients => "NO_RECIPIENTS",
            CampaignError::Validation(_) => "VALIDATION_ERROR",
            CampaignError::Warmup(e) => e.code(),
            CampaignError::Storage(e) => e.code(),
        }
    }
}
