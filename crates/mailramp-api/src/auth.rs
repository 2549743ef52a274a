//! Authentication module

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use mailramp_core::Engine;
use mailramp_storage::DatabasePool;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

use crate::pages::Pages;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Present when running on PostgreSQL
    pub db_pool: Option<DatabasePool>,
    pub pages: Arc<Pages>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, db_pool: Option<DatabasePool>) -> Self {
        Self {
            engine,
            db_pool,
            pages: Arc::new(Pages::new()),
        }
    }
}

/// Extract the control token from request
pub fn extract_api_key(req: &Request) -> Option<&str> {
    // Check Authorization header
    if let Some(auth) = req.headers().get("authorization") {
        if let Ok(auth_str) = auth.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token);
            }
        }
    }

    // Check X-API-Key header
    if let Some(key) = req.headers().get("x-api-key") {
        if let Ok(key_str) = key.to_str() {
            return Some(key_str);
        }
    }

    None
}

fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify a presented token against the configured one.
///
/// The configured value may be an Argon2 hash (`$argon2...`), a SHA-256 hex
/// digest, or the token itself.
pub fn verify_api_key(api_key: &str, configured: &str) -> bool {
    if configured.starts_with("$argon2") {
        return PasswordHash::new(configured)
            .ok()
            .and_then(|parsed_hash| {
                Argon2::default()
                    .verify_password(api_key.as_bytes(), &parsed_hash)
                    .ok()
            })
            .is_some();
    }

    let presented = hash_api_key(api_key);
    if configured.len() == 64 && configured.chars().all(|c| c.is_ascii_hexdigit()) {
        return presented == configured.to_ascii_lowercase();
    }
    presented == hash_api_key(configured)
}

/// Authentication middleware for the control surface
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(configured) = state.engine.config.api.control_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let api_key = extract_api_key(&request).ok_or_else(|| {
        warn!("Missing control token in request to {}", request.uri().path());
        StatusCode::UNAUTHORIZED
    })?;

    if !verify_api_key(api_key, configured) {
        warn!("Invalid control token for {}", request.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
