//! Bearer-token verification boundary
//!
//! Token issuance, refresh, and user identity live in an external
//! service; the match engine only verifies the signature and expiry of
//! the token presented on the WebSocket upgrade.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::current_timestamp;
use crate::error::{MatchError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Identity carried by a verified token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub username: String,
    pub is_guest: bool,
    /// Unix seconds; zero means no expiry
    #[serde(default)]
    pub expires_at: u64,
}

/// Verifies bearer tokens presented on the upgrade request
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims>;
}

/// HMAC-SHA256 compact tokens: `hex(claims json) "." hex(mac)`
pub struct HmacTokenVerifier {
    key: Vec<u8>,
}

impl HmacTokenVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }

    /// Produce a token for the given claims. The production issuer is
    /// external; this exists for local development and tests.
    pub fn sign(&self, claims: &Claims) -> Result<String> {
        let body = serde_json::to_vec(claims)?;
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| MatchError::internal(format!("hmac key: {}", e)))?;
        mac.update(&body);
        let tag = mac.finalize().into_bytes();
        Ok(format!("{}.{}", hex::encode(&body), hex::encode(tag)))
    }
}

impl TokenVerifier for HmacTokenVerifier {
    fn verify(&self, token: &str) -> Result<Claims> {
        let (body_hex, tag_hex) = token
            .split_once('.')
            .ok_or_else(|| MatchError::unauthorized("malformed token"))?;

        let body = hex::decode(body_hex)
            .map_err(|_| MatchError::unauthorized("malformed token"))?;
        let tag = hex::decode(tag_hex)
            .map_err(|_| MatchError::unauthorized("malformed token"))?;

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| MatchError::internal(format!("hmac key: {}", e)))?;
        mac.update(&body);
        mac.verify_slice(&tag)
            .map_err(|_| MatchError::unauthorized("invalid token signature"))?;

        let claims: Claims = serde_json::from_slice(&body)
            .map_err(|_| MatchError::unauthorized("malformed token claims"))?;

        let now_secs = current_timestamp() / 1000;
        if claims.expires_at != 0 && now_secs > claims.expires_at {
            return Err(MatchError::unauthorized("token expired"));
        }

        Ok(claims)
    }
}
