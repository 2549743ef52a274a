//! Event tracking and signed unsubscribe tokens

pub mod service;
pub mod token;

pub use service::{CampaignStats, RequestMeta, TrackOutcome, TrackingService};
pub use token::{TokenError, TokenSigner, UnsubscribeClaims};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Signed unsubscribe tokens are not configured")]
    TokensDisabled,

    #[error(transparent)]
    Storage(#[from] mailramp_common::Error),
}
