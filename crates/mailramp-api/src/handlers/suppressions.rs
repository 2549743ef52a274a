//! Suppression list handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use mailramp_common::types::EmailAddress;
use mailramp_core::suppression::SkipDecision;
use mailramp_storage::models::{BounceRecord, Unsubscribe, UnsubscribeSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AppState;
use crate::error::{api_error, storage_error, ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub email: String,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UnsubscribeResponse {
    pub email: String,
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct ResubscribeResponse {
    pub email: String,
    pub removed: bool,
}

/// Tenant and global bounce records
pub async fn list_bounces(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Vec<BounceRecord>> {
    let bounces = state
        .engine
        .suppression
        .list_bounces(tenant_id, query.limit.clamp(1, 1000), query.offset.max(0))
        .await
        .map_err(storage_error)?;
    Ok(Json(bounces))
}

pub async fn list_unsubscribes(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Vec<Unsubscribe>> {
    let unsubscribes = state
        .engine
        .suppression
        .list_unsubscribes(tenant_id, query.limit.clamp(1, 1000), query.offset.max(0))
        .await
        .map_err(storage_error)?;
    Ok(Json(unsubscribes))
}

/// Add a tenant-scoped unsubscribe entry
pub async fn create_unsubscribe(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Json(req): Json<UnsubscribeRequest>,
) -> Result<(StatusCode, Json<UnsubscribeResponse>), ApiError> {
    let Some(address) = EmailAddress::parse(&req.email) else {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            "Invalid email address",
        ));
    };
    let email = address.normalized();

    let created = state
        .engine
        .suppression
        .unsubscribe(
            &email,
            Some(tenant_id),
            UnsubscribeSource::Manual,
            None,
            req.reason,
        )
        .await
        .map_err(storage_error)?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(UnsubscribeResponse { email, created })))
}

/// Remove the tenant's unsubscribe entry for an address
pub async fn resubscribe(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, email)): Path<(Uuid, String)>,
) -> ApiResult<ResubscribeResponse> {
    let removed = state
        .engine
        .suppression
        .resubscribe(&email, tenant_id)
        .await
        .map_err(storage_error)?;

    if !removed {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "No tenant unsubscribe entry for this address",
        ));
    }
    Ok(Json(ResubscribeResponse { email, removed }))
}

/// Would a send to this address be skipped
pub async fn check_address(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<CheckQuery>,
) -> ApiResult<SkipDecision> {
    let decision = state
        .engine
        .suppression
        .should_skip_email(&query.email, Some(tenant_id))
        .await
        .map_err(storage_error)?;
    Ok(Json(decision))
}
