//! Provider webhook payload shapes

use super::{BounceEvent, WebhookError, WebhookProvider};
use mailramp_storage::models::BounceKind;
use serde::Deserialize;

/// `{messageId, email, bounceType, reason}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericEvent {
    pub message_id: Option<String>,
    pub email: String,
    pub bounce_type: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendgridEvent {
    pub email: String,
    pub event: String,
    pub sg_message_id: Option<String>,
    #[serde(rename = "smtp-id")]
    pub smtp_id: Option<String>,
    pub reason: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub bounce_type: Option<String>,
}

/// SNS envelope carrying an SES notification
#[derive(Debug, Clone, Deserialize)]
pub struct SnsEnvelope {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Message")]
    pub message: Option<String>,
    #[serde(rename = "SubscribeURL")]
    pub subscribe_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesNotification {
    pub notification_type: String,
    pub bounce: Option<SesBounce>,
    pub complaint: Option<SesComplaint>,
    pub mail: Option<SesMail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesBounce {
    pub bounce_type: String,
    pub bounce_sub_type: Option<String>,
    pub bounced_recipients: Vec<SesRecipient>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesComplaint {
    pub complained_recipients: Vec<SesRecipient>,
    pub complaint_feedback_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesRecipient {
    pub email_address: String,
    pub diagnostic_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesMail {
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailgunPayload {
    pub signature: MailgunSignature,
    #[serde(rename = "event-data")]
    pub event_data: MailgunEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailgunSignature {
    pub timestamp: String,
    pub token: String,
    pub signature: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailgunEventData {
    pub event: String,
    pub severity: Option<String>,
    pub recipient: String,
    pub reason: Option<String>,
    pub message: Option<MailgunMessage>,
    #[serde(rename = "delivery-status")]
    pub delivery_status: Option<MailgunDeliveryStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailgunMessage {
    pub headers: Option<MailgunHeaders>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailgunHeaders {
    #[serde(rename = "message-id")]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailgunDeliveryStatus {
    pub code: Option<i64>,
    pub message: Option<String>,
    pub description: Option<String>,
}

/// `{recipient, status, diagnostic, queue_id, message_id}`
#[derive(Debug, Clone, Deserialize)]
pub struct PostfixEvent {
    pub recipient: String,
    pub status: String,
    pub diagnostic: Option<String>,
    pub queue_id: Option<String>,
    pub message_id: Option<String>,
}

/// Parsed body of a webhook request
#[derive(Debug, Clone)]
pub enum WebhookPayload {
    Generic(GenericEvent),
    Sendgrid(Vec<SendgridEvent>),
    Ses(SnsEnvelope),
    Mailgun(Box<MailgunPayload>),
    Postfix(PostfixEvent),
}

impl WebhookPayload {
    pub fn parse(provider: WebhookProvider, body: &[u8]) -> Result<Self, WebhookError> {
        let malformed = |e: serde_json::Error| WebhookError::Malformed(e.to_string());
        Ok(match provider {
            WebhookProvider::Generic => {
                WebhookPayload::Generic(serde_json::from_slice(body).map_err(malformed)?)
            }
            WebhookProvider::Sendgrid => {
                WebhookPayload::Sendgrid(serde_json::from_slice(body).map_err(malformed)?)
            }
            WebhookProvider::Ses => {
                WebhookPayload::Ses(serde_json::from_slice(body).map_err(malformed)?)
            }
            WebhookProvider::Mailgun => {
                WebhookPayload::Mailgun(Box::new(serde_json::from_slice(body).map_err(malformed)?))
            }
            WebhookProvider::Postfix => {
                WebhookPayload::Postfix(serde_json::from_slice(body).map_err(malformed)?)
            }
        })
    }

    /// Canonical events; notifications that are not bounces or complaints yield none
    pub fn into_events(self) -> Result<Vec<BounceEvent>, WebhookError> {
        match self {
            WebhookPayload::Generic(event) => {
                let kind = event
                    .bounce_type
                    .parse::<BounceKind>()
                    .map_err(WebhookError::Malformed)?;
                Ok(vec![BounceEvent::new(
                    WebhookProvider::Generic,
                    event.email,
                    kind,
                    event.message_id,
                    event.reason,
                )?])
            }

            WebhookPayload::Sendgrid(events) => events
                .into_iter()
                .filter_map(|event| {
                    let kind = match (event.event.as_str(), event.bounce_type.as_deref()) {
                        ("bounce", Some("blocked")) => BounceKind::Soft,
                        ("bounce", _) | ("dropped", _) => BounceKind::Hard,
                        ("spamreport", _) => BounceKind::Complaint,
                        ("deferred", _) | ("blocked", _) => BounceKind::Soft,
                        _ => return None,
                    };
                    let message_id = event.smtp_id.or(event.sg_message_id);
                    let reason = event.reason.or(event.status);
                    Some(BounceEvent::new(
                        WebhookProvider::Sendgrid,
                        event.email,
                        kind,
                        message_id,
                        reason,
                    ))
                })
                .collect(),

            WebhookPayload::Ses(envelope) => {
                if envelope.kind == "SubscriptionConfirmation" {
                    return Ok(Vec::new());
                }
                let message = envelope
                    .message
                    .ok_or_else(|| WebhookError::Malformed("SNS Message field missing".into()))?;
                let notification: SesNotification = serde_json::from_str(&message)
                    .map_err(|e| WebhookError::Malformed(e.to_string()))?;
                let message_id = notification.mail.and_then(|m| m.message_id);

                match notification.notification_type.as_str() {
                    "Bounce" => {
                        let bounce = notification.bounce.ok_or_else(|| {
                            WebhookError::Malformed("Bounce notification missing bounce".into())
                        })?;
                        let kind = if bounce.bounce_type == "Permanent" {
                            BounceKind::Hard
                        } else {
                            BounceKind::Soft
                        };
                        bounce
                            .bounced_recipients
                            .into_iter()
                            .map(|r| {
                                let reason = r.diagnostic_code.or(bounce.bounce_sub_type.clone());
                                BounceEvent::new(
                                    WebhookProvider::Ses,
                                    r.email_address,
                                    kind,
                                    message_id.clone(),
                                    reason,
                                )
                            })
                            .collect()
                    }
                    "Complaint" => {
                        let complaint = notification.complaint.ok_or_else(|| {
                            WebhookError::Malformed("Complaint notification missing complaint".into())
                        })?;
                        complaint
                            .complained_recipients
                            .into_iter()
                            .map(|r| {
                                BounceEvent::new(
                                    WebhookProvider::Ses,
                                    r.email_address,
                                    BounceKind::Complaint,
                                    message_id.clone(),
                                    complaint.complaint_feedback_type.clone(),
                                )
                            })
                            .collect()
                    }
                    _ => Ok(Vec::new()),
                }
            }

            WebhookPayload::Mailgun(payload) => {
                let data = payload.event_data;
                let kind = match (data.event.as_str(), data.severity.as_deref()) {
                    ("failed", Some("permanent")) => BounceKind::Hard,
                    ("failed", _) => BounceKind::Soft,
                    ("complained", _) => BounceKind::Complaint,
                    _ => return Ok(Vec::new()),
                };
                let message_id = data
                    .message
                    .and_then(|m| m.headers)
                    .and_then(|h| h.message_id);
                let reason = data
                    .delivery_status
                    .and_then(|s| s.description.filter(|d| !d.is_empty()).or(s.message))
                    .or(data.reason);
                Ok(vec![BounceEvent::new(
                    WebhookProvider::Mailgun,
                    data.recipient,
                    kind,
                    message_id,
                    reason,
                )?])
            }

            WebhookPayload::Postfix(event) => {
                let kind = match event.status.trim().chars().next() {
                    Some('5') => BounceKind::Hard,
                    Some('4') => BounceKind::Soft,
                    Some('2') => return Ok(Vec::new()),
                    _ => {
                        return Err(WebhookError::Malformed(format!(
                            "Unrecognised DSN status: {}",
                            event.status
                        )))
                    }
                };
                let reason = Some(match event.diagnostic {
                    Some(diagnostic) => format!("{} {}", event.status, diagnostic),
                    None => event.status.clone(),
                });
                Ok(vec![BounceEvent::new(
                    WebhookProvider::Postfix,
                    event.recipient,
                    kind,
                    event.message_id.or(event.queue_id),
                    reason,
                )?])
            }
        }
    }
}
