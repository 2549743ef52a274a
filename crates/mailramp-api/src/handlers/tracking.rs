//! Open pixel and click redirect

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use mailramp_core::tracking::RequestMeta;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use crate::auth::AppState;

/// 1x1 transparent GIF
pub const PIXEL_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

#[derive(Debug, Deserialize)]
pub struct ClickQuery {
    pub url: Option<String>,
}

/// The decoded `url` parameter when it is an absolute http(s) URL that
/// can be sent back unchanged in a `Location` header
pub fn redirect_target(raw: Option<String>) -> Option<String> {
    raw.filter(|raw| !raw.chars().any(char::is_control))
        .filter(|raw| {
            Url::parse(raw).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
        })
}

/// Client address and user agent, honoring proxy headers
pub fn request_meta(headers: &HeaderMap) -> RequestMeta {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
    };

    RequestMeta {
        ip_address: forwarded.or_else(real_ip),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

/// GET /tracking/open/:tracking_id
///
/// The pixel is served whether or not the id is known.
pub async fn track_open(
    State(state): State<Arc<AppState>>,
    Path(tracking_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let meta = request_meta(&headers);
    match state.engine.tracking.track_open(&tracking_id, &meta).await {
        Ok(Some(_)) => {
            state
                .engine
                .metrics
                .tracking_events
                .with_label_values(&["open"])
                .inc();
        }
        Ok(None) => {}
        Err(e) => warn!("Failed to record open for {}: {}", tracking_id, e),
    }

    (
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        PIXEL_GIF,
    )
        .into_response()
}

/// GET /tracking/click/:tracking_id?url=...
pub async fn track_click(
    State(state): State<Arc<AppState>>,
    Path(tracking_id): Path<String>,
    Query(query): Query<ClickQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(target) = redirect_target(query.url) else {
        return (StatusCode::BAD_REQUEST, "Invalid redirect target").into_response();
    };

    let meta = request_meta(&headers);
    match state
        .engine
        .tracking
        .track_click(&tracking_id, &target, &meta)
        .await
    {
        Ok(Some(_)) => {
            state
                .engine
                .metrics
                .tracking_events
                .with_label_values(&["click"])
                .inc();
        }
        Ok(None) => {}
        Err(e) => warn!("Failed to record click for {}: {}", tracking_id, e),
    }

    (StatusCode::FOUND, [(header::LOCATION, target)]).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_meta_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("Mail/1.0"));

        let meta = request_meta(&headers);
        assert_eq!(meta.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(meta.user_agent.as_deref(), Some("Mail/1.0"));

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(request_meta(&headers).ip_address.as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn test_redirect_target_is_kept_verbatim() {
        let target = |raw: &str| redirect_target(Some(raw.to_string()));

        assert_eq!(
            target("https://Shop.Example.com").as_deref(),
            Some("https://Shop.Example.com")
        );
        assert_eq!(
            target("http://example.com/a%20b?x=1#top").as_deref(),
            Some("http://example.com/a%20b?x=1#top")
        );
        assert_eq!(target("javascript:alert(1)"), None);
        assert_eq!(target("ftp://example.com/file"), None);
        assert_eq!(target("/relative/path"), None);
        assert_eq!(target("https://example.com/\r\nSet-Cookie: a=b"), None);
        assert_eq!(redirect_target(None), None);
    }
}
