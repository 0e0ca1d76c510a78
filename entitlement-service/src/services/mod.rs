//! Services module for entitlement-service.

pub mod billing;
pub mod catalog;
pub mod database;
pub mod metrics;
pub mod reconciliation;
pub mod store;
pub mod tokens;

pub use billing::BillingClient;
pub use catalog::CatalogCache;
pub use database::Database;
pub use metrics::{
    get_metrics, init_metrics, record_checkout_session, record_error, record_token_issued,
    record_token_verification, record_webhook_event,
};
pub use store::{GatewayStore, MemoryStore};
pub use tokens::TokenService;
