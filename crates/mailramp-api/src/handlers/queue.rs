//! Queue depth

use axum::{extract::State, Json};
use mailramp_core::queue::QueueStats;
use std::sync::Arc;

use crate::auth::AppState;
use crate::error::{storage_error, ApiResult};

/// GET /api/v1/queue
pub async fn queue_stats(State(state): State<Arc<AppState>>) -> ApiResult<QueueStats> {
    let stats = state.engine.queue.stats().await.map_err(storage_error)?;
    Ok(Json(stats))
}
