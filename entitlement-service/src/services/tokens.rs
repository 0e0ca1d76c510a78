//! Capability token issuance and verification rules.
//!
//! Tokens are 256-bit random bearer secrets, hex-encoded. Only the SHA-256
//! digest is stored; lookup at verification is by exact digest match, never
//! by scanning or comparing plaintext.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{CapabilityToken, Module};

/// Mints launch tokens with a fixed lifetime.
#[derive(Clone)]
pub struct TokenService {
    ttl: Duration,
}

/// A freshly minted token. `plaintext` is returned to the caller exactly
/// once and must never be logged or persisted.
pub struct IssuedToken {
    pub plaintext: String,
    pub record: CapabilityToken,
}

impl TokenService {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    /// Generate a token bound to (user, module) and the claims captured at
    /// issuance.
    pub fn mint(
        &self,
        user_id: Uuid,
        module_id: Uuid,
        user_display_name: &str,
        now: DateTime<Utc>,
    ) -> IssuedToken {
        let mut secret = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret);
        let plaintext = hex::encode(secret);

        let record = CapabilityToken {
            token_hash: Self::hash(&plaintext),
            user_id,
            module_id,
            user_display_name: user_display_name.to_string(),
            issued_utc: now,
            expires_utc: now + self.ttl,
        };

        IssuedToken { plaintext, record }
    }

    /// Irreversible digest of the bearer secret.
    pub fn hash(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }
}

/// Why a presented token was rejected. Logged internally with full detail;
/// every variant surfaces to the caller as the same opaque 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyFailure {
    InvalidToken,
    TokenExpired,
    ModuleMismatch,
}

impl VerifyFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyFailure::InvalidToken => "invalid_token",
            VerifyFailure::TokenExpired => "token_expired",
            VerifyFailure::ModuleMismatch => "module_mismatch",
        }
    }
}

/// Validate a consumed token record against the caller's claimed module.
///
/// A token issued for module A must be rejected when presented by module B,
/// even though both call the same endpoint.
pub fn check_claims(
    record: &CapabilityToken,
    module: Option<&Module>,
    claimed_slug: &str,
    now: DateTime<Utc>,
) -> Result<(), VerifyFailure> {
    if record.is_expired(now) {
        return Err(VerifyFailure::TokenExpired);
    }

    match module {
        Some(module) if module.slug == claimed_slug => Ok(()),
        Some(_) => Err(VerifyFailure::ModuleMismatch),
        // The stored module no longer resolves; treat like a bad token.
        None => Err(VerifyFailure::InvalidToken),
    }
}
