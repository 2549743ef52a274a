//! Signed unsubscribe tokens

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use mailramp_common::types::{CampaignId, TenantId};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeClaims {
    pub email: String,
    pub organization_id: Option<TenantId>,
    pub campaign_id: Option<CampaignId>,
    /// Issue time, seconds since the epoch
    pub timestamp: i64,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token signature")]
    BadSignature,

    #[error("Token expired")]
    Expired,
}

/// Issues and checks `base64url(json).base64url(hmac)` tokens
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            ttl,
        }
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256, TokenError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::Malformed)?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    pub fn sign(
        &self,
        email: &str,
        tenant_id: Option<TenantId>,
        campaign_id: Option<CampaignId>,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = UnsubscribeClaims {
            email: email.to_string(),
            organization_id: tenant_id,
            campaign_id,
            timestamp: now.timestamp(),
        };
        let json = serde_json::to_vec(&claims).map_err(|_| TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(&payload)?.finalize().into_bytes());
        Ok(format!("{}.{}", payload, signature))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<UnsubscribeClaims, TokenError> {
        let (payload, signature) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;

        self.mac(payload)?
            .verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: UnsubscribeClaims =
            serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)?;

        let issued = DateTime::from_timestamp(claims.timestamp, 0).ok_or(TokenError::Malformed)?;
        if now - issued > self.ttl {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}
