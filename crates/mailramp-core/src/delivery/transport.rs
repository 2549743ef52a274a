//! Outbound SMTP transport

use async_trait::async_trait;
use lettre::{
    message::{
        header::{ContentType, Header, HeaderName, HeaderValue},
        Mailbox, MultiPart, SinglePart,
    },
    transport::smtp::authentication::Credentials,
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use mailramp_common::config::SmtpConfig;
use mailramp_storage::models::SenderConfiguration;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Relay connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub use_starttls: bool,
    pub timeout: Duration,
}

impl RelaySettings {
    pub fn from_config(config: &SmtpConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            use_tls: config.use_tls,
            use_starttls: config.use_starttls,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Tenant relay override, if the sender configures one
    pub fn for_sender(sender: &SenderConfiguration, fallback: &RelaySettings) -> Option<Self> {
        let host = sender.smtp_host.as_ref().filter(|h| !h.is_empty())?;
        let port = sender
            .smtp_port
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(if sender.smtp_use_tls { 465 } else { 587 });

        Some(Self {
            host: host.clone(),
            port,
            username: sender.smtp_username.clone(),
            password: sender.smtp_password.clone(),
            use_tls: sender.smtp_use_tls,
            use_starttls: !sender.smtp_use_tls,
            timeout: fallback.timeout,
        })
    }
}

/// A fully rendered message ready for the wire
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub from_email: String,
    pub from_name: Option<String>,
    pub to_email: String,
    pub to_name: Option<String>,
    pub reply_to: Option<String>,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    /// Message-ID without angle brackets
    pub message_id: String,
    pub list_unsubscribe: Option<String>,
    /// Advertise RFC 8058 one-click unsubscribe
    pub one_click_unsubscribe: bool,
    /// Relay override; the transport default is used when unset
    pub relay: Option<RelaySettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Worth retrying later
    #[error("Temporary delivery failure: {0}")]
    Transient(String),

    #[error("Permanent delivery failure: {0}")]
    Permanent(String),

    /// The receiving server rejected the recipient address
    #[error("Recipient rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) | Self::Rejected(m) => m,
        }
    }
}

/// Map an SMTP failure onto a delivery outcome
pub fn classify_smtp_error(message: &str, permanent: bool) -> TransportError {
    let lower = message.to_lowercase();
    if message.contains("5.1.1")
        || message.contains("550")
        || lower.contains("user unknown")
        || lower.contains("does not exist")
        || lower.contains("no such user")
    {
        TransportError::Rejected(message.to_string())
    } else if permanent {
        TransportError::Permanent(message.to_string())
    } else {
        TransportError::Transient(message.to_string())
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, TransportError>;
}

#[derive(Debug, Clone)]
struct ListUnsubscribe(String);

impl Header for ListUnsubscribe {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("List-Unsubscribe")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

#[derive(Debug, Clone)]
struct ListUnsubscribePost;

impl Header for ListUnsubscribePost {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("List-Unsubscribe-Post")
    }

    fn parse(_s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self)
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), "List-Unsubscribe=One-Click".to_string())
    }
}

fn mailbox(email: &str, name: Option<&str>, role: &str) -> Result<Mailbox, TransportError> {
    let address: Address = email
        .parse()
        .map_err(|e| TransportError::Permanent(format!("Invalid {} address: {}", role, e)))?;
    Ok(Mailbox::new(name.map(str::to_string), address))
}

/// Build the MIME message
pub fn build_message(message: &OutboundMessage) -> Result<Message, TransportError> {
    let from = mailbox(&message.from_email, message.from_name.as_deref(), "from")?;
    let to = mailbox(&message.to_email, message.to_name.as_deref(), "to")?;

    let mut builder = Message::builder()
        .from(from)
        .to(to)
        .subject(&message.subject)
        .message_id(Some(format!("<{}>", message.message_id)));

    if let Some(reply_to) = &message.reply_to {
        builder = builder.reply_to(mailbox(reply_to, None, "reply-to")?);
    }
    if let Some(list_unsubscribe) = &message.list_unsubscribe {
        builder = builder.header(ListUnsubscribe(list_unsubscribe.clone()));
        if message.one_click_unsubscribe {
            builder = builder.header(ListUnsubscribePost);
        }
    }

    let email = if message.text_body.is_empty() {
        builder
            .header(ContentType::TEXT_HTML)
            .body(message.html_body.clone())
    } else {
        builder.multipart(
            MultiPart::alternative()
                .singlepart(SinglePart::plain(message.text_body.clone()))
                .singlepart(SinglePart::html(message.html_body.clone())),
        )
    };

    email.map_err(|e| TransportError::Permanent(format!("Failed to build email: {}", e)))
}

/// SMTP relay transport backed by lettre
pub struct SmtpTransport {
    default_relay: RelaySettings,
}

impl SmtpTransport {
    pub fn new(default_relay: RelaySettings) -> Self {
        Self { default_relay }
    }

    pub fn default_relay(&self) -> &RelaySettings {
        &self.default_relay
    }

    fn mailer(relay: &RelaySettings) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        let mut transport = if relay.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&relay.host)
                .map_err(|e| {
                    TransportError::Transient(format!("Failed to create SMTP transport: {}", e))
                })?
        } else if relay.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&relay.host).map_err(|e| {
                TransportError::Transient(format!("Failed to create SMTP transport: {}", e))
            })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&relay.host)
        }
        .port(relay.port);

        if let (Some(username), Some(password)) = (&relay.username, &relay.password) {
            transport = transport.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(transport.timeout(Some(relay.timeout)).build())
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, TransportError> {
        let email = build_message(message)?;
        let relay = message.relay.as_ref().unwrap_or(&self.default_relay);
        let mailer = Self::mailer(relay)?;

        match mailer.send(email).await {
            Ok(response) => {
                debug!(
                    message_id = %message.message_id,
                    relay = %relay.host,
                    code = %response.code(),
                    "Email accepted by relay"
                );
                Ok(SendReceipt {
                    message_id: message.message_id.clone(),
                })
            }
            Err(e) => Err(classify_smtp_error(&e.to_string(), e.is_permanent())),
        }
    }
}
