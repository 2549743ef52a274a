//! Warm-up schedule handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use mailramp_core::warmup::CreateWarmup;
use mailramp_storage::models::WarmupSchedule;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AppState;
use crate::error::{warmup_error, ApiError, ApiResult};

pub async fn create_warmup(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Json(req): Json<CreateWarmup>,
) -> Result<(StatusCode, Json<WarmupSchedule>), ApiError> {
    let schedule = state
        .engine
        .warmup
        .create_schedule(tenant_id, req)
        .await
        .map_err(warmup_error)?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

pub async fn list_warmups(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> ApiResult<Vec<WarmupSchedule>> {
    let schedules = state
        .engine
        .warmup
        .list(tenant_id)
        .await
        .map_err(warmup_error)?;
    Ok(Json(schedules))
}

pub async fn get_warmup(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> ApiResult<WarmupSchedule> {
    let schedule = state
        .engine
        .warmup
        .get(tenant_id, id)
        .await
        .map_err(warmup_error)?;
    Ok(Json(schedule))
}

pub async fn pause_warmup(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> ApiResult<WarmupSchedule> {
    let schedule = state
        .engine
        .warmup
        .pause(tenant_id, id)
        .await
        .map_err(warmup_error)?;
    Ok(Json(schedule))
}

pub async fn resume_warmup(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> ApiResult<WarmupSchedule> {
    let schedule = state
        .engine
        .warmup
        .resume(tenant_id, id)
        .await
        .map_err(warmup_error)?;
    Ok(Json(schedule))
}
