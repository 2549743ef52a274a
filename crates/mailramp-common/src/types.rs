//! Common types for MailRamp

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for tenants (organizations)
pub type TenantId = Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for campaign recipients
pub type RecipientId = Uuid;

/// Unique identifier for warm-up schedules
pub type WarmupId = Uuid;

/// Unique identifier for queued jobs
pub type JobId = Uuid;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string.
    ///
    /// The domain is lowercased; the local part is kept as written.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.chars().any(|c| c.is_whitespace() || c == '<' || c == '>') {
            return None;
        }

        let (local, domain) = s.rsplit_once('@')?;
        if local.is_empty() || local.contains('@') || local.len() > 64 {
            return None;
        }
        if domain.is_empty()
            || !domain.contains('.')
            || domain.starts_with('.')
            || domain.ends_with('.')
            || domain.contains("..")
        {
            return None;
        }

        Some(Self::new(local, domain.to_ascii_lowercase()))
    }

    /// Canonical lowercase form used as the suppression key
    pub fn normalized(&self) -> String {
        format!("{}@{}", self.local.to_lowercase(), self.domain)
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation("Invalid email address".to_string()))
    }
}

/// Lowercase and trim an address for lookups, even when it does not parse.
pub fn normalize_email(s: &str) -> String {
    match EmailAddress::parse(s) {
        Some(addr) => addr.normalized(),
        None => s.trim().to_lowercase(),
    }
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub limit: i64,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_email_address_parse() {
        let email = EmailAddress::parse("User@Example.COM").unwrap();
        assert_eq!(email.local, "User");
        assert_eq!(email.domain, "example.com");
        assert_eq!(email.to_string(), "User@example.com");
        assert_eq!(email.normalized(), "user@example.com");
    }

    #[test]
    fn test_email_address_invalid() {
        assert!(EmailAddress::parse("invalid").is_none());
        assert!(EmailAddress::parse("@example.com").is_none());
        assert!(EmailAddress::parse("user@").is_none());
        assert!(EmailAddress::parse("user@localhost").is_none());
        assert!(EmailAddress::parse("us er@example.com").is_none());
        assert!(EmailAddress::parse("user@example..com").is_none());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Jane@Mail.Example.org "), "jane@mail.example.org");
        assert_eq!(normalize_email("Not An Address"), "not an address");
    }
}
