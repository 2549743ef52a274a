//! Provider webhooks normalized into bounce and complaint events

pub mod payload;
pub mod signature;

pub use payload::WebhookPayload;

use mailramp_common::config::WebhookConfig;
use mailramp_storage::models::BounceKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

/// Canonical bounce or complaint event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BounceEvent {
    /// Message id without angle brackets
    pub message_id: Option<String>,
    pub email: String,
    pub kind: BounceKind,
    pub reason: Option<String>,
    pub provider: String,
}

impl BounceEvent {
    pub fn new(
        provider: WebhookProvider,
        email: String,
        kind: BounceKind,
        message_id: Option<String>,
        reason: Option<String>,
    ) -> Result<Self, WebhookError> {
        let email = email.trim().to_string();
        if email.is_empty() {
            return Err(WebhookError::Malformed("event without recipient".into()));
        }

        Ok(Self {
            message_id: message_id
                .map(|id| bare_message_id(&id))
                .filter(|id| !id.is_empty()),
            email,
            kind,
            reason,
            provider: provider.as_str().to_string(),
        })
    }
}

/// Strip surrounding whitespace and angle brackets from a Message-ID
pub fn bare_message_id(id: &str) -> String {
    id.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookProvider {
    Generic,
    Sendgrid,
    Ses,
    Mailgun,
    Postfix,
}

impl WebhookProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookProvider::Generic => "generic",
            WebhookProvider::Sendgrid => "sendgrid",
            WebhookProvider::Ses => "ses",
            WebhookProvider::Mailgun => "mailgun",
            WebhookProvider::Postfix => "postfix",
        }
    }
}

impl std::str::FromStr for WebhookProvider {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(WebhookProvider::Generic),
            "sendgrid" => Ok(WebhookProvider::Sendgrid),
            "ses" => Ok(WebhookProvider::Ses),
            "mailgun" => Ok(WebhookProvider::Mailgun),
            "postfix" => Ok(WebhookProvider::Postfix),
            other => Err(WebhookError::UnknownProvider(other.to_string())),
        }
    }
}

/// Webhook errors
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Webhook signature rejected: {0}")]
    Unauthorized(String),

    #[error("Malformed webhook payload: {0}")]
    Malformed(String),

    #[error("Unknown webhook provider: {0}")]
    UnknownProvider(String),
}

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const SENDGRID_SIGNATURE_HEADER: &str = "x-twilio-email-event-webhook-signature";
pub const SENDGRID_TIMESTAMP_HEADER: &str = "x-twilio-email-event-webhook-timestamp";

/// Verifies and parses provider webhooks
pub struct WebhookNormalizer {
    config: WebhookConfig,
}

impl WebhookNormalizer {
    pub fn new(config: WebhookConfig) -> Self {
        Self { config }
    }

    /// Verify and parse one request. `headers` keys are lowercase.
    /// Nothing is returned unless the whole payload verifies and parses.
    pub fn normalize(
        &self,
        provider: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<Vec<BounceEvent>, WebhookError> {
        let provider: WebhookProvider = provider.parse()?;

        match provider {
            WebhookProvider::Generic => {
                self.check_hex(self.config.generic_secret.as_deref(), headers, body)?
            }
            WebhookProvider::Ses => {
                self.check_hex(self.config.ses_secret.as_deref(), headers, body)?
            }
            WebhookProvider::Postfix => {
                self.check_hex(self.config.postfix_secret.as_deref(), headers, body)?
            }
            WebhookProvider::Sendgrid => {
                if let Some(secret) = self.config.sendgrid_secret.as_deref() {
                    let signature = header(headers, SENDGRID_SIGNATURE_HEADER)?;
                    let timestamp = header(headers, SENDGRID_TIMESTAMP_HEADER)?;
                    if !signature::verify_timestamped_base64(secret, timestamp, body, signature) {
                        return Err(reject(provider));
                    }
                }
            }
            // Mailgun signs fields inside the body
            WebhookProvider::Mailgun => {}
        }

        let payload = WebhookPayload::parse(provider, body)?;

        if let (WebhookPayload::Mailgun(mailgun), Some(key)) =
            (&payload, self.config.mailgun_signing_key.as_deref())
        {
            let sig = &mailgun.signature;
            if !signature::verify_token_hex(key, &sig.timestamp, &sig.token, &sig.signature) {
                return Err(reject(provider));
            }
        }

        payload.into_events()
    }

    fn check_hex(
        &self,
        secret: Option<&str>,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<(), WebhookError> {
        let Some(secret) = secret else {
            return Ok(());
        };
        let value = header(headers, SIGNATURE_HEADER)?;
        if signature::verify_hex(secret, body, value) {
            Ok(())
        } else {
            Err(WebhookError::Unauthorized("signature mismatch".into()))
        }
    }
}

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Result<&'a str, WebhookError> {
    headers
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| WebhookError::Unauthorized(format!("missing {} header", name)))
}

fn reject(provider: WebhookProvider) -> WebhookError {
    warn!(provider = provider.as_str(), "Webhook signature rejected");
    WebhookError::Unauthorized("signature mismatch".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn no_secrets() -> WebhookNormalizer {
        WebhookNormalizer::new(WebhookConfig::default())
    }

    #[test]
    fn test_generic_payload() {
        let body = json!({
            "messageId": "<abc.1@mail.example.com>",
            "email": "gone@example.com",
            "bounceType": "hard",
            "reason": "550 5.1.1"
        })
        .to_string();

        let events = no_secrets()
            .normalize("generic", &HashMap::new(), body.as_bytes())
            .unwrap();
        assert_eq!(
            events,
            vec![BounceEvent {
                message_id: Some("abc.1@mail.example.com".into()),
                email: "gone@example.com".into(),
                kind: BounceKind::Hard,
                reason: Some("550 5.1.1".into()),
                provider: "generic".into(),
            }]
        );
    }

    #[test]
    fn test_generic_signature_required_when_configured() {
        let normalizer = WebhookNormalizer::new(WebhookConfig {
            generic_secret: Some("s3cret".into()),
            ..Default::default()
        });
        let body = br#"{"email":"a@example.com","bounceType":"soft"}"#;

        let err = normalizer.normalize("generic", &HashMap::new(), body).unwrap_err();
        assert!(matches!(err, WebhookError::Unauthorized(_)));

        let mut headers = HashMap::new();
        headers.insert(SIGNATURE_HEADER.to_string(), signature::sign_hex("wrong", body));
        assert!(matches!(
            normalizer.normalize("generic", &headers, body),
            Err(WebhookError::Unauthorized(_))
        ));

        headers.insert(SIGNATURE_HEADER.to_string(), signature::sign_hex("s3cret", body));
        let events = normalizer.normalize("generic", &headers, body).unwrap();
        assert_eq!(events[0].kind, BounceKind::Soft);
    }

    #[test]
    fn test_sendgrid_batch() {
        let body = json!([
            {"email": "a@example.com", "event": "bounce", "smtp-id": "<m1@x>", "reason": "550"},
            {"email": "b@example.com", "event": "delivered"},
            {"email": "c@example.com", "event": "spamreport", "sg_message_id": "m3"},
            {"email": "d@example.com", "event": "deferred"},
            {"email": "e@example.com", "event": "bounce", "type": "blocked"}
        ])
        .to_string();

        let events = no_secrets()
            .normalize("sendgrid", &HashMap::new(), body.as_bytes())
            .unwrap();
        let kinds: Vec<_> = events.iter().map(|e| (e.email.as_str(), e.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("a@example.com", BounceKind::Hard),
                ("c@example.com", BounceKind::Complaint),
                ("d@example.com", BounceKind::Soft),
                ("e@example.com", BounceKind::Soft),
            ]
        );
        assert_eq!(events[0].message_id.as_deref(), Some("m1@x"));
    }

    #[test]
    fn test_sendgrid_signature() {
        let normalizer = WebhookNormalizer::new(WebhookConfig {
            sendgrid_secret: Some("sg".into()),
            ..Default::default()
        });
        let body = br#"[{"email":"a@example.com","event":"dropped"}]"#;
        let mut headers = HashMap::new();
        headers.insert(SENDGRID_TIMESTAMP_HEADER.to_string(), "1700000000".to_string());
        headers.insert(
            SENDGRID_SIGNATURE_HEADER.to_string(),
            signature::sign_timestamped_base64("sg", "1700000000", body),
        );
        assert_eq!(normalizer.normalize("sendgrid", &headers, body).unwrap().len(), 1);

        headers.insert(SENDGRID_TIMESTAMP_HEADER.to_string(), "1700000099".to_string());
        assert!(matches!(
            normalizer.normalize("sendgrid", &headers, body),
            Err(WebhookError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_ses_bounce_and_confirmation() {
        let message = json!({
            "notificationType": "Bounce",
            "bounce": {
                "bounceType": "Permanent",
                "bounceSubType": "General",
                "bouncedRecipients": [
                    {"emailAddress": "x@example.com", "diagnosticCode": "smtp; 550 5.1.1"},
                    {"emailAddress": "y@example.com"}
                ]
            },
            "mail": {"messageId": "ses-1"}
        })
        .to_string();
        let body = json!({"Type": "Notification", "Message": message}).to_string();

        let events = no_secrets()
            .normalize("ses", &HashMap::new(), body.as_bytes())
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == BounceKind::Hard));
        assert_eq!(events[0].reason.as_deref(), Some("smtp; 550 5.1.1"));
        assert_eq!(events[1].reason.as_deref(), Some("General"));

        let confirm = json!({
            "Type": "SubscriptionConfirmation",
            "SubscribeURL": "https://sns.example.com/confirm"
        })
        .to_string();
        assert!(no_secrets()
            .normalize("ses", &HashMap::new(), confirm.as_bytes())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_ses_complaint() {
        let message = json!({
            "notificationType": "Complaint",
            "complaint": {
                "complainedRecipients": [{"emailAddress": "angry@example.com"}],
                "complaintFeedbackType": "abuse"
            },
            "mail": {"messageId": "ses-2"}
        })
        .to_string();
        let body = json!({"Type": "Notification", "Message": message}).to_string();
        let events = no_secrets()
            .normalize("ses", &HashMap::new(), body.as_bytes())
            .unwrap();
        assert_eq!(events[0].kind, BounceKind::Complaint);
        assert_eq!(events[0].reason.as_deref(), Some("abuse"));
    }

    fn mailgun_body(key: &str, event: &str, severity: &str) -> String {
        json!({
            "signature": {
                "timestamp": "1700000000",
                "token": "tok",
                "signature": signature::sign_token_hex(key, "1700000000", "tok")
            },
            "event-data": {
                "event": event,
                "severity": severity,
                "recipient": "m@example.com",
                "message": {"headers": {"message-id": "abc@mail.example.com"}},
                "delivery-status": {"code": 550, "description": "", "message": "No such user"}
            }
        })
        .to_string()
    }

    #[test]
    fn test_mailgun() {
        let normalizer = WebhookNormalizer::new(WebhookConfig {
            mailgun_signing_key: Some("key-1".into()),
            ..Default::default()
        });

        let events = normalizer
            .normalize("mailgun", &HashMap::new(), mailgun_body("key-1", "failed", "permanent").as_bytes())
            .unwrap();
        assert_eq!(events[0].kind, BounceKind::Hard);
        assert_eq!(events[0].reason.as_deref(), Some("No such user"));
        assert_eq!(events[0].message_id.as_deref(), Some("abc@mail.example.com"));

        let events = normalizer
            .normalize("mailgun", &HashMap::new(), mailgun_body("key-1", "failed", "temporary").as_bytes())
            .unwrap();
        assert_eq!(events[0].kind, BounceKind::Soft);

        let err = normalizer
            .normalize("mailgun", &HashMap::new(), mailgun_body("forged", "failed", "permanent").as_bytes())
            .unwrap_err();
        assert!(matches!(err, WebhookError::Unauthorized(_)));
    }

    #[test]
    fn test_postfix_dsn_classes() {
        let hard = br#"{"recipient":"p@example.com","status":"5.1.1","diagnostic":"user unknown","queue_id":"4F1A2"}"#;
        let events = no_secrets().normalize("postfix", &HashMap::new(), hard).unwrap();
        assert_eq!(events[0].kind, BounceKind::Hard);
        assert_eq!(events[0].reason.as_deref(), Some("5.1.1 user unknown"));

        let soft = br#"{"recipient":"p@example.com","status":"4.2.2"}"#;
        let events = no_secrets().normalize("postfix", &HashMap::new(), soft).unwrap();
        assert_eq!(events[0].kind, BounceKind::Soft);

        let bad = br#"{"recipient":"p@example.com","status":"delivered"}"#;
        assert!(matches!(
            no_secrets().normalize("postfix", &HashMap::new(), bad),
            Err(WebhookError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_provider_and_garbage() {
        assert!(matches!(
            no_secrets().normalize("carrier-pigeon", &HashMap::new(), b"{}"),
            Err(WebhookError::UnknownProvider(_))
        ));
        assert!(matches!(
            no_secrets().normalize("generic", &HashMap::new(), b"not json"),
            Err(WebhookError::Malformed(_))
        ));
    }
}
