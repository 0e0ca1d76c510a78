//! Billing provider webhook event shapes.
//!
//! The provider delivers events at-least-once and in no guaranteed order;
//! normalization into a [`SubscriptionChange`] happens in
//! `services::reconciliation`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

/// Envelope of a billing provider webhook event.
#[derive(Debug, Deserialize)]
pub struct BillingEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Provider-asserted creation time, unix seconds. The ordering key for
    /// reconciliation; arrival order is meaningless.
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// Metadata attached at checkout-session creation; how an event is traced
/// back to a local (user, module) pair.
#[derive(Debug, Default, Deserialize)]
pub struct EventMetadata {
    pub user_id: Option<String>,
    pub module_id: Option<String>,
}

/// `checkout.session.completed` payload.
#[derive(Debug, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub customer: String,
    pub subscription: String,
    #[serde(default)]
    pub metadata: EventMetadata,
}

/// `customer.subscription.*` payload.
#[derive(Debug, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: String,
    pub status: String,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub metadata: EventMetadata,
}

/// A billing event normalized into the store's vocabulary.
#[derive(Debug, Clone)]
pub struct SubscriptionChange {
    pub user_id: Uuid,
    pub module_id: Uuid,
    pub status: String,
    pub billing_customer_ref: String,
    pub billing_subscription_ref: String,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    /// Provider-asserted event time.
    pub occurred_utc: DateTime<Utc>,
}
