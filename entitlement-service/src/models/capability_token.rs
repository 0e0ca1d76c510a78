//! Capability token record.
//!
//! Ephemeral: created at launch, deleted on first successful verification or
//! swept after expiry. Only the SHA-256 digest of the bearer secret is kept;
//! the plaintext exists solely in the issuing HTTP response and the launch
//! URL handed to the module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CapabilityToken {
    pub token_hash: String,
    pub user_id: Uuid,
    pub module_id: Uuid,
    /// Captured from the verified identity at issuance so verification can
    /// return claims without a round trip to the identity provider.
    pub user_display_name: String,
    pub issued_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
}

impl CapabilityToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_utc <= now
    }
}
