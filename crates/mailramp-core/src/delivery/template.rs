//! Template Renderer - Handles personalization of email content

use mailramp_storage::models::CampaignRecipient;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{[^}]+\}\}").expect("static placeholder regex"))
}

/// Template renderer for personalizing email content
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render a body template with recipient data
    pub fn render(
        &self,
        template: &str,
        recipient: &CampaignRecipient,
        unsubscribe_url: &str,
    ) -> String {
        let mut result = self.substitute(template, recipient);
        result = result.replace("{{unsubscribe_url}}", unsubscribe_url);

        // Clean up any remaining placeholders
        self.remove_unused_placeholders(&result)
    }

    /// Render subject line with recipient data
    pub fn render_subject(&self, subject: &str, recipient: &CampaignRecipient) -> String {
        let result = self.substitute(subject, recipient);
        self.remove_unused_placeholders(&result)
    }

    fn substitute(&self, template: &str, recipient: &CampaignRecipient) -> String {
        let mut result = template.to_string();

        result = result.replace("{{email}}", &recipient.email);
        result = result.replace("{{name}}", recipient.name.as_deref().unwrap_or(""));

        // Split name into first/last
        let (first_name, last_name) = match &recipient.name {
            Some(name) => {
                let parts: Vec<&str> = name.split_whitespace().collect();
                let first = parts.first().copied().unwrap_or("").to_string();
                let last = if parts.len() > 1 {
                    parts[1..].join(" ")
                } else {
                    String::new()
                };
                (first, last)
            }
            None => (String::new(), String::new()),
        };
        result = result.replace("{{first_name}}", &first_name);
        result = result.replace("{{last_name}}", &last_name);

        // Custom fields
        if let Some(fields) = recipient.fields.as_object() {
            for (key, value) in fields {
                let placeholder = format!("{{{{fields.{}}}}}", key);
                let value_str = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Null => String::new(),
                    _ => value.to_string(),
                };
                result = result.replace(&placeholder, &value_str);
            }
        }

        result
    }

    /// Remove unused placeholder variables
    fn remove_unused_placeholders(&self, content: &str) -> String {
        placeholder_regex().replace_all(content, "").to_string()
    }

    /// Generate List-Unsubscribe header value
    pub fn generate_list_unsubscribe_header(
        &self,
        unsubscribe_url: &str,
        mailto_address: Option<&str>,
    ) -> String {
        if let Some(mailto) = mailto_address {
            format!(
                "<mailto:{}?subject=unsubscribe>, <{}>",
                mailto, unsubscribe_url
            )
        } else {
            format!("<{}>", unsubscribe_url)
        }
    }
}
