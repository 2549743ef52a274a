//! Provider bounce and complaint webhooks

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use mailramp_core::WebhookError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::AppState;
use crate::error::{api_error, storage_error, ApiError, ApiResult};

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Events in the payload
    pub received: usize,
    /// Events matched to a campaign recipient
    pub matched: usize,
}

fn webhook_error(e: WebhookError) -> ApiError {
    warn!("Webhook rejected: {}", e);
    match e {
        WebhookError::Unauthorized(_) => {
            api_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", e.to_string())
        }
        WebhookError::Malformed(_) => {
            api_error(StatusCode::BAD_REQUEST, "MALFORMED_PAYLOAD", e.to_string())
        }
        WebhookError::UnknownProvider(_) => {
            api_error(StatusCode::NOT_FOUND, "UNKNOWN_PROVIDER", e.to_string())
        }
    }
}

fn lowercase_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

/// POST /webhooks/:provider
///
/// The whole payload is verified and parsed before any event is applied.
pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookResponse> {
    let events = state
        .engine
        .webhooks
        .normalize(&provider, &lowercase_headers(&headers), &body)
        .map_err(webhook_error)?;

    let mut matched = 0;
    for event in &events {
        if state
            .engine
            .tracking
            .track_bounce(event)
            .await
            .map_err(storage_error)?
            .is_some()
        {
            matched += 1;
        }
        state
            .engine
            .metrics
            .webhook_events
            .with_label_values(&[event.provider.as_str()])
            .inc();
    }

    info!(
        provider = %provider,
        received = events.len(),
        matched,
        "Webhook processed"
    );
    Ok(Json(WebhookResponse {
        received: events.len(),
        matched,
    }))
}
