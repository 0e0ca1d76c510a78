//! Module catalog entry.
//!
//! Owned by catalog management; the gateway only reads modules on its
//! authorization paths. The upsert exists for seeding and ops tooling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An add-on module a user can purchase and launch.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Module {
    pub module_id: Uuid,
    /// Stable external name, used in URLs and token verification.
    pub slug: String,
    pub name: String,
    pub launch_url: String,
    pub is_enabled: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating or updating a catalog entry.
#[derive(Debug, Clone)]
pub struct UpsertModule {
    pub slug: String,
    pub name: String,
    pub launch_url: String,
    pub is_enabled: bool,
}
