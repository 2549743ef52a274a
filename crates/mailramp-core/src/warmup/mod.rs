//! IP warm-up: volume curves, provider mix and admission

pub mod curve;
pub mod governor;
pub mod provider;

pub use governor::{CreateWarmup, DenyReason, WarmupDecision, WarmupGovernor};
pub use provider::classify;

use thiserror::Error;

/// Warm-up errors
#[derive(Error, Debug)]
pub enum WarmupError {
    #[error("Warm-up schedule not found")]
    NotFound,

    #[error("Warm-up conflict: {0}")]
    Conflict(String),

    #[error("Cannot {action} a warm-up schedule in status {status}")]
    InvalidState {
        action: &'static str,
        status: String,
    },

    #[error("Invalid warm-up schedule: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] mailramp_common::Error),
}

impl WarmupError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            WarmupError::NotFound => 404,
            WarmupError::Conflict(_) | WarmupError::InvalidState { .. } => 409,
            WarmupError::Validation(_) => 422,
            WarmupError::Storage(e) => e.status_code(),
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            WarmupError::NotFound => "NOT_FOUND",
            WarmupError::Conflict(_) => "CONFLICT",
            WarmupError::InvalidState { .. } => "INVALID_STATE",
            WarmupError::Validation(_) => "VALIDATION_ERROR",
            WarmupError::Storage(e) => e.code(),
        }
    }
}
