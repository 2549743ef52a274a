//! API routes

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{auth_middleware, AppState};
use crate::handlers::{
    campaigns, health, metrics, queue, senders, suppressions, tracking, unsubscribe, warmups,
    webhooks,
};

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness));

    // Recipient-facing routes
    let tracking_routes = Router::new()
        .route("/open/:tracking_id", get(tracking::track_open))
        .route("/click/:tracking_id", get(tracking::track_click));

    let unsubscribe_routes = Router::new()
        .route(
            "/:tracking_id",
            get(unsubscribe::unsubscribe_form).post(unsubscribe::unsubscribe_submit),
        )
        .route(
            "/t/:token",
            get(unsubscribe::token_form).post(unsubscribe::token_submit),
        );

    // Campaign routes
    let campaign_routes = Router::new()
        .route(
            "/",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        )
        .route(
            "/:campaign_id",
            get(campaigns::get_campaign)
                .patch(campaigns::update_campaign)
                .delete(campaigns::delete_campaign),
        )
        .route("/:campaign_id/send", post(campaigns::send_campaign))
        .route("/:campaign_id/schedule", post(campaigns::schedule_campaign))
        .route("/:campaign_id/pause", post(campaigns::pause_campaign))
        .route("/:campaign_id/resume", post(campaigns::resume_campaign))
        .route("/:campaign_id/stats", get(campaigns::get_campaign_stats))
        .route(
            "/:campaign_id/recipients",
            get(campaigns::list_recipients).post(campaigns::add_recipients),
        );

    // Warm-up routes
    let warmup_routes = Router::new()
        .route("/", get(warmups::list_warmups).post(warmups::create_warmup))
        .route("/:warmup_id", get(warmups::get_warmup))
        .route("/:warmup_id/pause", post(warmups::pause_warmup))
        .route("/:warmup_id/resume", post(warmups::resume_warmup));

    // Suppression routes
    let suppression_routes = Router::new()
        .route("/bounces", get(suppressions::list_bounces))
        .route(
            "/unsubscribes",
            get(suppressions::list_unsubscribes).post(suppressions::create_unsubscribe),
        )
        .route("/unsubscribes/:email", delete(suppressions::resubscribe))
        .route("/check", get(suppressions::check_address));

    let tenant_routes = Router::new()
        .nest("/campaigns", campaign_routes)
        .nest("/warmups", warmup_routes)
        .nest("/suppressions", suppression_routes)
        .route("/sender", get(senders::get_sender).put(senders::put_sender));

    // Control surface (auth required when a token is configured)
    let control_routes = Router::new()
        .nest("/tenants/:tenant_id", tenant_routes)
        .route("/queue", get(queue::queue_stats))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .nest("/health", health_routes)
        .route("/metrics", get(metrics::metrics))
        .nest("/tracking", tracking_routes)
        .nest("/unsubscribe", unsubscribe_routes)
        .route("/webhooks/:provider", post(webhooks::receive_webhook))
        .nest("/api/v1", control_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use chrono::{TimeZone, Utc};
    use mailramp_common::{Config, ManualClock};
    use mailramp_core::delivery::{MailTransport, OutboundMessage, SendReceipt, TransportError};
    use mailramp_core::webhooks::{signature::sign_hex, SIGNATURE_HEADER};
    use mailramp_core::Engine;
    use mailramp_storage::models::CampaignRecipient;
    use mailramp_storage::Stores;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tower::ServiceExt;
    use uuid::Uuid;

    #[derive(Default)]
    struct CapturingTransport {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MailTransport for CapturingTransport {
        async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, TransportError> {
            self.sent.lock().unwrap().push(message.to_email.clone());
            Ok(SendReceipt {
                message_id: message.message_id.clone(),
            })
        }
    }

    struct TestApp {
        router: Router,
        engine: Arc<Engine>,
        tenant: Uuid,
    }

    fn app_with(config: Config) -> TestApp {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap(),
        ));
        let engine = Arc::new(
            Engine::new(
                config,
                Stores::memory(),
                Arc::new(CapturingTransport::default()),
                clock,
            )
            .unwrap(),
        );
        TestApp {
            router: create_router(AppState::new(engine.clone(), None)),
            engine,
            tenant: Uuid::new_v4(),
        }
    }

    fn app() -> TestApp {
        app_with(Config::default())
    }

    async fn call(router: &Router, request: Request<Body>) -> Response {
        router.clone().oneshot(request).await.unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Create a campaign with recipients through the API; returns its id
    async fn create_campaign(app: &TestApp, emails: &[&str]) -> String {
        let response = call(
            &app.router,
            json_request(
                "POST",
                &format!("/api/v1/tenants/{}/campaigns", app.tenant),
                json!({
                    "name": "Spring launch",
                    "subject": "Hello {{name}}",
                    "html_body": "<p>Hi <a href=\"https://example.com/offer\">offer</a></p>",
                    "from_email": "news@sender.example",
                }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        if !emails.is_empty() {
            let recipients: Vec<Value> = emails.iter().map(|e| json!({ "email": e })).collect();
            let response = call(
                &app.router,
                json_request(
                    "POST",
                    &format!("/api/v1/tenants/{}/campaigns/{}/recipients", app.tenant, id),
                    json!({ "recipients": recipients }),
                ),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        id
    }

    async fn first_recipient(app: &TestApp, campaign_id: &str) -> CampaignRecipient {
        let id: Uuid = campaign_id.parse().unwrap();
        app.engine
            .stores
            .recipients
            .list_for_campaign(id, None, 10, 0)
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let app = app();

        let response = call(&app.router, get_request("/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");

        let response = call(&app.router, get_request("/health/ready")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = call(&app.router, get_request("/metrics")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("mailramp_emails_sent_total"));
    }

    #[tokio::test]
    async fn test_control_token_required_when_configured() {
        let mut config = Config::default();
        config.api.control_token = Some("secret-token".to_string());
        let app = app_with(config);
        let uri = format!("/api/v1/tenants/{}/campaigns", app.tenant);

        let response = call(&app.router, get_request(&uri)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri(&uri)
            .header(header::AUTHORIZATION, "Bearer secret-token")
            .body(Body::empty())
            .unwrap();
        let response = call(&app.router, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        // recipient-facing routes stay open
        let response = call(&app.router, get_request("/tracking/open/unknown")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_campaign_lifecycle() {
        let app = app();
        let id = create_campaign(&app, &["a@example.com", "b@example.com"]).await;
        let base = format!("/api/v1/tenants/{}/campaigns/{}", app.tenant, id);

        let response = call(&app.router, get_request(&base)).await;
        let body = body_json(response).await;
        assert_eq!(body["status"], "draft");
        assert_eq!(body["total_recipients"], 2);

        let response = call(
            &app.router,
            json_request("PATCH", &base, json!({ "hourly_limit": 5 })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["hourly_limit"], 5);

        let response = call(&app.router, json_request("POST", &format!("{}/send", base), json!({}))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "sending");

        // a sending campaign is no longer editable
        let response = call(
            &app.router,
            json_request("PATCH", &base, json!({ "name": "Renamed" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["error"], "INVALID_STATE");

        let response = call(&app.router, json_request("POST", &format!("{}/pause", base), json!({}))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "paused");

        let response = call(&app.router, get_request(&format!("{}/stats", base))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["total_recipients"], 2);

        let response = call(&app.router, get_request("/api/v1/queue")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_campaign_errors() {
        let app = app();
        let id = create_campaign(&app, &[]).await;
        let base = format!("/api/v1/tenants/{}/campaigns/{}", app.tenant, id);

        let response = call(&app.router, json_request("POST", &format!("{}/send", base), json!({}))).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["error"], "NO_RECIPIENTS");

        // other tenants cannot see the campaign
        let other = format!("/api/v1/tenants/{}/campaigns/{}", Uuid::new_v4(), id);
        let response = call(&app.router, get_request(&other)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = call(
            &app.router,
            json_request(
                "POST",
                &format!("/api/v1/tenants/{}/campaigns", app.tenant),
                json!({
                    "name": "Bad",
                    "subject": "s",
                    "html_body": "b",
                    "from_email": "not-an-address",
                }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = call(
            &app.router,
            Request::builder()
                .method("DELETE")
                .uri(&base)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_tracking_pixel_and_click() {
        let app = app();
        let id = create_campaign(&app, &["reader@example.com"]).await;
        let recipient = first_recipient(&app, &id).await;

        let response = call(
            &app.router,
            get_request(&format!("/tracking/open/{}", recipient.tracking_id)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/gif");
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "no-store, no-cache, must-revalidate"
        );
        assert_eq!(response.headers()[header::PRAGMA], "no-cache");
        assert_eq!(response.headers()[header::EXPIRES], "0");

        let response = call(
            &app.router,
            get_request(&format!(
                "/tracking/click/{}?url=https%3A%2F%2Fexample.com%2Foffer%3Fa%3D1",
                recipient.tracking_id
            )),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://example.com/offer?a=1"
        );

        // unknown ids still redirect, to the target exactly as given
        let response = call(
            &app.router,
            get_request("/tracking/click/unknown?url=https%3A%2F%2FShop.Example.com"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "https://Shop.Example.com");

        let response = call(
            &app.router,
            get_request(&format!(
                "/tracking/click/{}?url=javascript%3Aalert(1)",
                recipient.tracking_id
            )),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unsubscribe_link_flow() {
        let app = app();
        let id = create_campaign(&app, &["reader@example.com"]).await;
        let recipient = first_recipient(&app, &id).await;
        let uri = format!("/unsubscribe/{}", recipient.tracking_id);

        let response = call(&app.router, get_request(&uri)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("reader@example.com"));

        let request = Request::builder()
            .method("POST")
            .uri(&uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("List-Unsubscribe=One-Click"))
            .unwrap();
        let response = call(&app.router, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = call(
            &app.router,
            get_request(&format!(
                "/api/v1/tenants/{}/suppressions/check?email=reader@example.com",
                app.tenant
            )),
        )
        .await;
        let body = body_json(response).await;
        assert_eq!(body["skip"], true);
        assert_eq!(body["reason"], "unsubscribed");

        let response = call(&app.router, get_request("/unsubscribe/unknown")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_signed_token_unsubscribe() {
        let mut config = Config::default();
        config.tracking.unsubscribe_secret = Some("token-secret".to_string());
        let app = app_with(config);

        let signer = app.engine.tracking.tokens().unwrap();
        let token = signer
            .sign("reader@example.com", Some(app.tenant), None, app.engine.clock.now())
            .unwrap();

        let response = call(&app.router, get_request(&format!("/unsubscribe/t/{}", token))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let request = Request::builder()
            .method("POST")
            .uri(format!("/unsubscribe/t/{}", token))
            .body(Body::from("reason=no+longer+interested"))
            .unwrap();
        let response = call(&app.router, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let decision = app
            .engine
            .suppression
            .should_skip_email("reader@example.com", Some(app.tenant))
            .await
            .unwrap();
        assert!(decision.skip);

        let tampered = format!("{}x", token);
        let response = call(&app.router, get_request(&format!("/unsubscribe/t/{}", tampered))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_generic_webhook_signature_and_suppression() {
        let mut config = Config::default();
        config.webhooks.generic_secret = Some("hook-secret".to_string());
        let app = app_with(config);

        let body = json!({
            "messageId": "<missing@sender.example>",
            "email": "gone@example.com",
            "bounceType": "hard",
            "reason": "550 5.1.1 user unknown",
        })
        .to_string();

        let unsigned = Request::builder()
            .method("POST")
            .uri("/webhooks/generic")
            .body(Body::from(body.clone()))
            .unwrap();
        let response = call(&app.router, unsigned).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let signed = Request::builder()
            .method("POST")
            .uri("/webhooks/generic")
            .header(SIGNATURE_HEADER, sign_hex("hook-secret", body.as_bytes()))
            .body(Body::from(body))
            .unwrap();
        let response = call(&app.router, signed).await;
        assert_eq!(response.status(), StatusCode::OK);
        let result = body_json(response).await;
        assert_eq!(result["received"], 1);
        assert_eq!(result["matched"], 0);

        // suppressed even without a matching recipient
        let decision = app
            .engine
            .suppression
            .should_skip_email("gone@example.com", Some(app.tenant))
            .await
            .unwrap();
        assert!(decision.skip);

        let response = call(
            &app.router,
            Request::builder()
                .method("POST")
                .uri("/webhooks/carrier-pigeon")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sender_configuration_hides_password() {
        let app = app();
        let uri = format!("/api/v1/tenants/{}/sender", app.tenant);

        let response = call(&app.router, get_request(&uri)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = call(
            &app.router,
            json_request(
                "PUT",
                &uri,
                json!({
                    "smtp_host": "smtp.sender.example",
                    "smtp_port": 587,
                    "smtp_username": "relay",
                    "smtp_password": "hunter2",
                    "from_email": "news@sender.example",
                    "max_per_day": 500,
                    "max_per_hour": 50,
                }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["smtp_password_set"], true);
        assert!(body.get("smtp_password").is_none());
        assert_eq!(body["max_per_hour"], 50);
    }

    #[tokio::test]
    async fn test_warmup_routes() {
        let app = app();
        let base = format!("/api/v1/tenants/{}/warmups", app.tenant);

        let response = call(
            &app.router,
            json_request(
                "POST",
                &base,
                json!({ "ip_address": "192.0.2.10", "total_days": 10, "target_volume": 1000 }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = call(
            &app.router,
            json_request("POST", &format!("{}/{}/pause", base, id), json!({})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "paused");

        let response = call(
            &app.router,
            json_request("POST", &format!("{}/{}/pause", base, id), json!({})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = call(&app.router, get_request(&base)).await;
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
    }
}
