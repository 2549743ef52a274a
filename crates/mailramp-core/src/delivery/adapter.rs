//! Delivery Adapter - Renders one recipient's message and hands it to the transport

use super::links;
use super::template::TemplateRenderer;
use super::transport::{MailTransport, OutboundMessage, RelaySettings, SendReceipt, TransportError};
use crate::tracking::TokenSigner;
use crate::variation::VariationEngine;
use mailramp_common::{Clock, Config};
use mailramp_storage::models::{Campaign, CampaignRecipient, SenderConfiguration};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct DeliveryAdapter {
    transport: Arc<dyn MailTransport>,
    variations: Arc<VariationEngine>,
    renderer: TemplateRenderer,
    tokens: Option<TokenSigner>,
    clock: Arc<dyn Clock>,
    public_url: String,
    hostname: String,
    tracking_enabled: bool,
    default_relay: RelaySettings,
}

impl DeliveryAdapter {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        variations: Arc<VariationEngine>,
        tokens: Option<TokenSigner>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        Self {
            transport,
            variations,
            renderer: TemplateRenderer::new(),
            tokens,
            clock,
            public_url: config.api.public_url.trim_end_matches('/').to_string(),
            hostname: config.server.hostname.clone(),
            tracking_enabled: config.tracking.enabled,
            default_relay: RelaySettings::from_config(&config.smtp),
        }
    }

    /// Unsubscribe link for a recipient; signed when a secret is configured
    pub fn unsubscribe_url(&self, recipient: &CampaignRecipient) -> String {
        if let Some(signer) = &self.tokens {
            match signer.sign(
                &recipient.email,
                Some(recipient.tenant_id),
                Some(recipient.campaign_id),
                self.clock.now(),
            ) {
                Ok(token) => return format!("{}/unsubscribe/t/{}", self.public_url, token),
                Err(e) => warn!(recipient_id = %recipient.id, error = %e, "Failed to sign unsubscribe token"),
            }
        }
        format!("{}/unsubscribe/{}", self.public_url, recipient.tracking_id)
    }

    fn message_id(&self, from_email: &str) -> String {
        let domain = from_email
            .rsplit_once('@')
            .map(|(_, d)| d)
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.hostname);
        format!(
            "{}.{}@{}",
            Uuid::new_v4(),
            self.clock.now().timestamp(),
            domain
        )
    }

    /// Render the message a recipient will receive
    pub fn prepare(
        &self,
        campaign: &Campaign,
        recipient: &CampaignRecipient,
        sender: Option<&SenderConfiguration>,
    ) -> OutboundMessage {
        let variant = self.variations.pick(campaign);
        let unsubscribe_url = self.unsubscribe_url(recipient);

        let subject = self.renderer.render_subject(&variant.subject, recipient);
        let mut html = self.renderer.render(&variant.html_body, recipient, &unsubscribe_url);
        let text = match &variant.text_body {
            Some(text) => self.renderer.render(text, recipient, &unsubscribe_url),
            None => links::html_to_text(&html),
        };

        let tracking = self.tracking_enabled && sender.map_or(true, |s| s.tracking_enabled);
        if tracking {
            html = links::rewrite_links(&html, &self.public_url, &recipient.tracking_id);
            html = links::inject_pixel(
                &html,
                &links::pixel_url(&self.public_url, &recipient.tracking_id),
            );
        }

        debug!(
            campaign_id = %campaign.id,
            recipient_id = %recipient.id,
            variant = variant.index,
            tracking,
            "Message rendered"
        );

        OutboundMessage {
            from_email: campaign.from_email.clone(),
            from_name: campaign
                .from_name
                .clone()
                .or_else(|| sender.and_then(|s| s.from_name.clone())),
            to_email: recipient.email.clone(),
            to_name: recipient.name.clone(),
            reply_to: campaign
                .reply_to
                .clone()
                .or_else(|| sender.and_then(|s| s.reply_to.clone())),
            subject,
            html_body: html,
            text_body: text,
            message_id: self.message_id(&campaign.from_email),
            list_unsubscribe: Some(
                self.renderer
                    .generate_list_unsubscribe_header(&unsubscribe_url, None),
            ),
            one_click_unsubscribe: true,
            relay: sender.and_then(|s| RelaySettings::for_sender(s, &self.default_relay)),
        }
    }

    /// Render and send
    pub async fn deliver(
        &self,
        campaign: &Campaign,
        recipient: &CampaignRecipient,
        sender: Option<&SenderConfiguration>,
    ) -> Result<SendReceipt, TransportError> {
        let message = self.prepare(campaign, recipient, sender);
        self.transport.send(&message).await
    }
}
