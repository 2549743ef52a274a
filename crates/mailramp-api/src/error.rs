//! Error responses

use axum::{http::StatusCode, Json};
use mailramp_core::{CampaignError, WarmupError};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message: message.into(),
        }),
    )
}

fn from_parts(status: u16, code: &str, message: String) -> ApiError {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("Request failed: {}", message);
        return api_error(status, code, "Internal server error");
    }
    api_error(status, code, message)
}

pub fn storage_error(e: mailramp_common::Error) -> ApiError {
    from_parts(e.status_code(), e.code(), e.to_string())
}

pub fn campaign_error(e: CampaignError) -> ApiError {
    from_parts(e.status_code(), e.code(), e.to_string())
}

pub fn warmup_error(e: WarmupError) -> ApiError {
    from_parts(e.status_code(), e.code(), e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_campaign_errors_map_to_status() {
        let (status, body) = campaign_error(CampaignError::NoRecipients);
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.error, "NO_RECIPIENTS");

        let (status, body) = campaign_error(CampaignError::InvalidState {
            action: "pause",
            status: "draft".into(),
        });
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.message, "Cannot pause a campaign in draft status");
    }

    #[test]
    fn test_server_errors_hide_details() {
        let (status, body) = storage_error(mailramp_common::Error::Database(
            "connection reset by peer".into(),
        ));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error, "DATABASE_ERROR");
        assert_eq!(body.message, "Internal server error");
    }
}
