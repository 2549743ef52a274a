//! Campaign handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use mailramp_core::campaign::{AddRecipientsResult, CampaignInput, RecipientInput};
use mailramp_core::tracking::CampaignStats;
use mailramp_storage::models::{
    Campaign, CampaignRecipient, CampaignStatus, RecipientStatus, UpdateCampaign,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::AppState;
use crate::error::{api_error, campaign_error, storage_error, ApiError, ApiResult};

/// Query parameters for listing campaigns
#[derive(Debug, Deserialize)]
pub struct ListCampaignsQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// Query parameters for listing recipients
#[derive(Debug, Deserialize)]
pub struct ListRecipientsQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Campaign list response
#[derive(Debug, Serialize)]
pub struct CampaignListResponse {
    pub data: Vec<CampaignResponse>,
    pub limit: i64,
    pub offset: i64,
}

/// Campaign response
#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub subject: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub status: String,
    pub daily_limit: i32,
    pub hourly_limit: i32,
    pub delay_min_secs: i32,
    pub delay_max_secs: i32,
    pub batch_size: i32,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub opened_count: i32,
    pub clicked_count: i32,
    pub bounced_count: i32,
    pub unsubscribed_count: i32,
    pub failed_count: i32,
    pub progress_percentage: f64,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Campaign> for CampaignResponse {
    fn from(c: Campaign) -> Self {
        let progress = c.progress_percentage();
        Self {
            id: c.id,
            tenant_id: c.tenant_id,
            name: c.name,
            subject: c.subject,
            from_email: c.from_email,
            from_name: c.from_name,
            reply_to: c.reply_to,
            status: c.status,
            daily_limit: c.daily_limit,
            hourly_limit: c.hourly_limit,
            delay_min_secs: c.delay_min_secs,
            delay_max_secs: c.delay_max_secs,
            batch_size: c.batch_size,
            total_recipients: c.total_recipients,
            sent_count: c.sent_count,
            opened_count: c.opened_count,
            clicked_count: c.clicked_count,
            bounced_count: c.bounced_count,
            unsubscribed_count: c.unsubscribed_count,
            failed_count: c.failed_count,
            progress_percentage: progress,
            scheduled_at: c.scheduled_at,
            started_at: c.started_at,
            paused_at: c.paused_at,
            completed_at: c.completed_at,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Request body for scheduling a campaign
#[derive(Debug, Deserialize)]
pub struct ScheduleCampaignRequest {
    pub scheduled_at: DateTime<Utc>,
}

/// Request body for adding recipients
#[derive(Debug, Deserialize)]
pub struct AddRecipientsRequest {
    pub recipients: Vec<RecipientInput>,
}

/// Recipient response; rendering fields stay internal
#[derive(Debug, Serialize)]
pub struct RecipientResponse {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub first_opened_at: Option<DateTime<Utc>>,
    pub first_clicked_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

impl From<CampaignRecipient> for RecipientResponse {
    fn from(r: CampaignRecipient) -> Self {
        Self {
            id: r.id,
            email: r.email,
            name: r.name,
            status: r.status,
            attempts: r.attempts,
            last_error: r.last_error,
            scheduled_at: r.scheduled_at,
            sent_at: r.sent_at,
            first_opened_at: r.first_opened_at,
            first_clicked_at: r.first_clicked_at,
            bounced_at: r.bounced_at,
            unsubscribed_at: r.unsubscribed_at,
        }
    }
}

fn parse_status<T: std::str::FromStr<Err = String>>(raw: Option<&str>) -> Result<Option<T>, ApiError> {
    raw.map(|s| s.parse::<T>())
        .transpose()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e))
}

/// List campaigns
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<ListCampaignsQuery>,
) -> ApiResult<CampaignListResponse> {
    let status = parse_status::<CampaignStatus>(query.status.as_deref())?;
    let campaigns = state
        .engine
        .campaigns
        .list(tenant_id, status, query.limit, query.offset)
        .await
        .map_err(campaign_error)?;

    Ok(Json(CampaignListResponse {
        data: campaigns.into_iter().map(CampaignResponse::from).collect(),
        limit: query.limit,
        offset: query.offset,
    }))
}

/// Create a draft campaign
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Json(req): Json<CampaignInput>,
) -> Result<(StatusCode, Json<CampaignResponse>), ApiError> {
    let campaign = state
        .engine
        .campaigns
        .create(tenant_id, req)
        .await
        .map_err(campaign_error)?;

    Ok((StatusCode::CREATED, Json(campaign.into())))
}

pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> ApiResult<CampaignResponse> {
    let campaign = state
        .engine
        .campaigns
        .get(tenant_id, id)
        .await
        .map_err(campaign_error)?;
    Ok(Json(campaign.into()))
}

/// Update a draft or scheduled campaign
pub async fn update_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateCampaign>,
) -> ApiResult<CampaignResponse> {
    let campaign = state
        .engine
        .campaigns
        .update(tenant_id, id, req)
        .await
        .map_err(campaign_error)?;
    Ok(Json(campaign.into()))
}

pub async fn delete_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .scheduler
        .delete(tenant_id, id)
        .await
        .map_err(campaign_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start sending immediately
pub async fn send_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> ApiResult<CampaignResponse> {
    let campaign = state
        .engine
        .scheduler
        .start(tenant_id, id)
        .await
        .map_err(campaign_error)?;
    info!("Campaign {} send requested", id);
    Ok(Json(campaign.into()))
}

pub async fn schedule_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ScheduleCampaignRequest>,
) -> ApiResult<CampaignResponse> {
    if req.scheduled_at <= state.engine.clock.now() {
        return Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            "scheduled_at must be in the future",
        ));
    }

    let campaign = state
        .engine
        .scheduler
        .schedule(tenant_id, id, req.scheduled_at)
        .await
        .map_err(campaign_error)?;
    Ok(Json(campaign.into()))
}

pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> ApiResult<CampaignResponse> {
    let campaign = state
        .engine
        .scheduler
        .pause(tenant_id, id)
        .await
        .map_err(campaign_error)?;
    Ok(Json(campaign.into()))
}

pub async fn resume_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> ApiResult<CampaignResponse> {
    let campaign = state
        .engine
        .scheduler
        .resume(tenant_id, id)
        .await
        .map_err(campaign_error)?;
    Ok(Json(campaign.into()))
}

/// Campaign statistics from rollup counters
pub async fn get_campaign_stats(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
) -> ApiResult<CampaignStats> {
    // tenant check
    state
        .engine
        .campaigns
        .get(tenant_id, id)
        .await
        .map_err(campaign_error)?;

    let stats = state
        .engine
        .tracking
        .campaign_stats(id)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "NOT_FOUND", "Campaign not found"))?;
    Ok(Json(stats))
}

pub async fn list_recipients(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
    Query(query): Query<ListRecipientsQuery>,
) -> ApiResult<Vec<RecipientResponse>> {
    let status = parse_status::<RecipientStatus>(query.status.as_deref())?;
    state
        .engine
        .campaigns
        .get(tenant_id, id)
        .await
        .map_err(campaign_error)?;

    let recipients = state
        .engine
        .stores
        .recipients
        .list_for_campaign(id, status, query.limit.clamp(1, 1000), query.offset.max(0))
        .await
        .map_err(storage_error)?;

    Ok(Json(recipients.into_iter().map(RecipientResponse::from).collect()))
}

/// Add recipients; duplicates and invalid addresses are reported, not fatal
pub async fn add_recipients(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, id)): Path<(Uuid, Uuid)>,
    Json(req): Json<AddRecipientsRequest>,
) -> ApiResult<AddRecipientsResult> {
    let result = state
        .engine
        .campaigns
        .add_recipients(tenant_id, id, req.recipients)
        .await
        .map_err(campaign_error)?;
    Ok(Json(result))
}
