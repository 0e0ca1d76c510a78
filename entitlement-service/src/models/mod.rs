//! Domain models for the entitlement gateway.

mod billing_event;
mod capability_token;
mod module;
mod subscription;

pub use billing_event::{
    BillingEvent, CheckoutSessionObject, EventData, EventMetadata, SubscriptionChange,
    SubscriptionObject,
};
pub use capability_token::CapabilityToken;
pub use module::{Module, UpsertModule};
pub use subscription::{Subscription, SubscriptionStatus, UpsertOutcome};
