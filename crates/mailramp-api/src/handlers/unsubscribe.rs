//! Unsubscribe pages and RFC 8058 one-click handling

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
};
use mailramp_core::tracking::TokenError;
use mailramp_core::TrackingError;
use std::sync::Arc;
use tracing::{error, info};

use crate::auth::AppState;
use crate::handlers::tracking::request_meta;

/// Fields posted by the confirmation form or a one-click client
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UnsubscribeForm {
    pub reason: Option<String>,
    pub one_click: bool,
}

impl UnsubscribeForm {
    pub fn parse(body: &[u8]) -> Self {
        let mut form = Self::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            match key.as_ref() {
                "reason" => {
                    let reason = value.trim();
                    if !reason.is_empty() {
                        form.reason = Some(reason.to_string());
                    }
                }
                "List-Unsubscribe" => form.one_click = value == "One-Click",
                _ => {}
            }
        }
        form
    }
}

fn page(status: StatusCode, rendered: Result<String, minijinja::Error>) -> Response {
    match rendered {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            error!("Failed to render unsubscribe page: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn invalid(state: &AppState, status: StatusCode, message: &str) -> Response {
    page(status, state.pages.invalid(message))
}

/// GET /unsubscribe/:tracking_id
pub async fn unsubscribe_form(
    State(state): State<Arc<AppState>>,
    Path(tracking_id): Path<String>,
) -> Response {
    match state.engine.tracking.recipient(&tracking_id).await {
        Ok(Some(recipient)) => {
            let action = format!("/unsubscribe/{}", tracking_id);
            page(StatusCode::OK, state.pages.confirm(&recipient.email, &action))
        }
        Ok(None) => invalid(&state, StatusCode::NOT_FOUND, "This unsubscribe link is not valid."),
        Err(e) => {
            error!("Failed to load recipient for {}: {}", tracking_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /unsubscribe/:tracking_id
pub async fn unsubscribe_submit(
    State(state): State<Arc<AppState>>,
    Path(tracking_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let form = UnsubscribeForm::parse(&body);
    let meta = request_meta(&headers);

    let outcome = match state
        .engine
        .tracking
        .track_unsubscribe(&tracking_id, form.reason, &meta)
        .await
    {
        Ok(Some(outcome)) => outcome,
        Ok(None) => {
            return invalid(&state, StatusCode::NOT_FOUND, "This unsubscribe link is not valid.")
        }
        Err(e) => {
            error!("Failed to unsubscribe {}: {}", tracking_id, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if outcome.first {
        state
            .engine
            .metrics
            .tracking_events
            .with_label_values(&["unsubscribe"])
            .inc();
    }
    info!(
        recipient_id = %outcome.recipient_id,
        one_click = form.one_click,
        "Unsubscribe applied"
    );

    if form.one_click {
        return StatusCode::OK.into_response();
    }

    let email = match state.engine.tracking.recipient(&tracking_id).await {
        Ok(Some(recipient)) => recipient.email,
        _ => String::new(),
    };
    page(StatusCode::OK, state.pages.done(&email))
}

fn token_rejection(state: &AppState, e: &TrackingError) -> Response {
    match e {
        TrackingError::Token(TokenError::Expired) => invalid(
            state,
            StatusCode::BAD_REQUEST,
            "This unsubscribe link has expired.",
        ),
        TrackingError::Token(_) => invalid(
            state,
            StatusCode::BAD_REQUEST,
            "This unsubscribe link is not valid.",
        ),
        TrackingError::TokensDisabled => StatusCode::NOT_FOUND.into_response(),
        TrackingError::Storage(e) => {
            error!("Token unsubscribe failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /unsubscribe/t/:token
pub async fn token_form(State(state): State<Arc<AppState>>, Path(token): Path<String>) -> Response {
    let Some(signer) = state.engine.tracking.tokens() else {
        return token_rejection(&state, &TrackingError::TokensDisabled);
    };

    match signer.verify(&token, state.engine.clock.now()) {
        Ok(claims) => {
            let action = format!("/unsubscribe/t/{}", token);
            page(StatusCode::OK, state.pages.confirm(&claims.email, &action))
        }
        Err(e) => token_rejection(&state, &TrackingError::Token(e)),
    }
}

/// POST /unsubscribe/t/:token
pub async fn token_submit(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    body: Bytes,
) -> Response {
    let form = UnsubscribeForm::parse(&body);

    match state
        .engine
        .tracking
        .unsubscribe_with_token(&token, form.reason)
        .await
    {
        Ok(claims) => {
            state
                .engine
                .metrics
                .tracking_events
                .with_label_values(&["unsubscribe"])
                .inc();
            if form.one_click {
                return StatusCode::OK.into_response();
            }
            page(StatusCode::OK, state.pages.done(&claims.email))
        }
        Err(e) => token_rejection(&state, &e),
    }
}
