//! Signed anonymous cart identity.
//!
//! A guest cart token has the form `{uuid}.{expires_at}.{signature}` where
//! `signature` is hex HMAC-SHA256 over `{uuid}.{expires_at}`. The uuid keys
//! the guest cart row; nothing else about the shopper is stored.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

use super::AuthError;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const GUEST_CART_HEADER: &str = "x-guest-cart";

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GuestCartToken {
    pub token: String,
    pub guest_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct GuestCartTokens {
    secret: String,
    ttl: Duration,
}

impl GuestCartTokens {
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256, AuthError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| AuthError::TokenCreation(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    pub fn issue(&self, now: DateTime<Utc>) -> Result<GuestCartToken, AuthError> {
        let guest_id = Uuid::new_v4();
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| AuthError::TokenCreation(e.to_string()))?;
        let expires_at = now + ttl;

        let payload = format!("{}.{}", guest_id, expires_at.timestamp());
        let signature = hex::encode(self.mac(&payload)?.finalize().into_bytes());

        Ok(GuestCartToken {
            token: format!("{payload}.{signature}"),
            guest_id,
            expires_at,
        })
    }

    /// Returns the guest id of a well-formed, unexpired token signed with our
    /// secret. The signature comparison is constant-time.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Uuid, AuthError> {
        let mut parts = token.trim().splitn(3, '.');
        let (Some(id), Some(expiry), Some(signature)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::InvalidGuestToken);
        };

        let signature = hex::decode(signature).map_err(|_| AuthError::InvalidGuestToken)?;
        self.mac(&format!("{id}.{expiry}"))?
            .verify_slice(&signature)
            .map_err(|_| AuthError::InvalidGuestToken)?;

        let expires_at = expiry
            .parse::<i64>()
            .ok()
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .ok_or(AuthError::InvalidGuestToken)?;
        if expires_at <= now {
            return Err(AuthError::TokenExpired);
        }

        Uuid::parse_str(id).map_err(|_| AuthError::InvalidGuestToken)
    }
}

/// Extractor for the verified guest id carried in the `X-Guest-Cart` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestCart(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for GuestCart {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(GUEST_CART_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthError::MissingToken)?;
        state
            .guest_tokens
            .verify(token, Utc::now())
            .map(GuestCart)
    }
}
