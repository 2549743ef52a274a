//! Sender configuration handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use mailramp_common::types::EmailAddress;
use mailramp_storage::models::SenderConfiguration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::AppState;
use crate::error::{api_error, storage_error, ApiResult};

/// Sender configuration response (password is never returned)
#[derive(Debug, Serialize)]
pub struct SenderResponse {
    pub tenant_id: Uuid,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<i32>,
    pub smtp_username: Option<String>,
    pub smtp_password_set: bool,
    pub smtp_use_tls: bool,
    pub from_email: String,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub max_per_day: i32,
    pub max_per_hour: i32,
    pub dedicated_ip: Option<String>,
    pub tracking_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SenderConfiguration> for SenderResponse {
    fn from(s: SenderConfiguration) -> Self {
        Self {
            tenant_id: s.tenant_id,
            smtp_host: s.smtp_host,
            smtp_port: s.smtp_port,
            smtp_username: s.smtp_username,
            smtp_password_set: s.smtp_password.is_some(),
            smtp_use_tls: s.smtp_use_tls,
            from_email: s.from_email,
            from_name: s.from_name,
            reply_to: s.reply_to,
            max_per_day: s.max_per_day,
            max_per_hour: s.max_per_hour,
            dedicated_ip: s.dedicated_ip,
            tracking_enabled: s.tracking_enabled,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

/// Request body for the sender configuration
#[derive(Debug, Deserialize)]
pub struct UpdateSenderRequest {
    pub smtp_host: Option<String>,
    pub smtp_port: Option<i32>,
    pub smtp_username: Option<String>,
    /// Omit to keep the stored password
    pub smtp_password: Option<String>,
    #[serde(default = "default_true")]
    pub smtp_use_tls: bool,
    pub from_email: String,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub max_per_day: i32,
    pub max_per_hour: i32,
    pub dedicated_ip: Option<String>,
    #[serde(default = "default_true")]
    pub tracking_enabled: bool,
}

fn default_true() -> bool {
    true
}

pub async fn get_sender(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> ApiResult<SenderResponse> {
    let sender = state
        .engine
        .stores
        .sender_configs
        .get(tenant_id)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "Sender configuration not found",
            )
        })?;
    Ok(Json(sender.into()))
}

/// Create or replace the tenant's sender configuration
pub async fn put_sender(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Json(req): Json<UpdateSenderRequest>,
) -> ApiResult<SenderResponse> {
    if EmailAddress::parse(&req.from_email).is_none() {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            "Invalid from address",
        ));
    }
    if req.max_per_day < 1 || req.max_per_hour < 1 {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            "Sending limits must be positive",
        ));
    }

    let repo = &state.engine.stores.sender_configs;
    let existing = repo.get(tenant_id).await.map_err(storage_error)?;
    let now = state.engine.clock.now();

    let smtp_password = req
        .smtp_password
        .or_else(|| existing.as_ref().and_then(|e| e.smtp_password.clone()));
    let created_at = existing.as_ref().map_or(now, |e| e.created_at);

    let saved = repo
        .upsert(SenderConfiguration {
            tenant_id,
            smtp_host: req.smtp_host,
            smtp_port: req.smtp_port,
            smtp_username: req.smtp_username,
            smtp_password,
            smtp_use_tls: req.smtp_use_tls,
            from_email: req.from_email,
            from_name: req.from_name,
            reply_to: req.reply_to,
            max_per_day: req.max_per_day,
            max_per_hour: req.max_per_hour,
            dedicated_ip: req.dedicated_ip,
            tracking_enabled: req.tracking_enabled,
            created_at,
            updated_at: now,
        })
        .await
        .map_err(storage_error)?;

    state.engine.rate_limiter.clear_cache(tenant_id).await;
    info!("Sender configuration updated for tenant {}", tenant_id);
    Ok(Json(saved.into()))
}
