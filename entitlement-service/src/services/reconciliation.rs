//! Billing event normalization.
//!
//! Turns provider webhook payloads into [`SubscriptionChange`]s the store can
//! apply. Ordering and idempotence are enforced at the store layer via the
//! provider-asserted timestamp; this module only maps shapes and resolves the
//! (user, module) pair from event metadata.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    BillingEvent, CheckoutSessionObject, EventMetadata, SubscriptionChange, SubscriptionObject,
};

/// A webhook event mapped into gateway terms.
#[derive(Debug)]
pub enum NormalizedEvent {
    /// Subscription lifecycle change to apply to the store.
    Subscription(SubscriptionChange),
    /// Provider catalog changed; cached price metadata is no longer valid.
    CatalogChanged,
    /// Event type the gateway does not care about.
    Ignored,
}

pub fn normalize(event: &BillingEvent) -> Result<NormalizedEvent> {
    let occurred_utc = DateTime::<Utc>::from_timestamp(event.created, 0)
        .ok_or_else(|| anyhow!("invalid event timestamp: {}", event.created))?;

    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let object: CheckoutSessionObject =
                serde_json::from_value(event.data.object.clone())
                    .context("malformed checkout session object")?;
            let (user_id, module_id) = resolve_pair(&object.metadata)?;

            // The completed checkout is the provider confirming conversion;
            // the subscription starts active. Any trial/past-due nuance
            // arrives on the follow-up subscription lifecycle events.
            Ok(NormalizedEvent::Subscription(SubscriptionChange {
                user_id,
                module_id,
                status: "active".to_string(),
                billing_customer_ref: object.customer,
                billing_subscription_ref: object.subscription,
                current_period_end: None,
                cancel_at_period_end: false,
                occurred_utc,
            }))
        }
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted" => {
            let object: SubscriptionObject = serde_json::from_value(event.data.object.clone())
                .context("malformed subscription object")?;
            let (user_id, module_id) = resolve_pair(&object.metadata)?;

            let status = if event.event_type == "customer.subscription.deleted" {
                "canceled".to_string()
            } else {
                object.status
            };

            let current_period_end = object
                .current_period_end
                .map(|ts| {
                    DateTime::<Utc>::from_timestamp(ts, 0)
                        .ok_or_else(|| anyhow!("invalid current_period_end: {}", ts))
                })
                .transpose()?;

            Ok(NormalizedEvent::Subscription(SubscriptionChange {
                user_id,
                module_id,
                status,
                billing_customer_ref: object.customer,
                billing_subscription_ref: object.id,
                current_period_end,
                cancel_at_period_end: object.cancel_at_period_end,
                occurred_utc,
            }))
        }
        t if t.starts_with("price.") || t.starts_with("product.") => {
            Ok(NormalizedEvent::CatalogChanged)
        }
        _ => Ok(NormalizedEvent::Ignored),
    }
}

/// Resolve the local (user, module) pair from metadata attached at
/// checkout-session creation. Events without it cannot be reconciled and are
/// dead-lettered by the caller.
fn resolve_pair(metadata: &EventMetadata) -> Result<(Uuid, Uuid)> {
    let user_id = metadata
        .user_id
        .as_deref()
        .ok_or_else(|| anyhow!("event metadata missing user_id"))?;
    let module_id = metadata
        .module_id
        .as_deref()
        .ok_or_else(|| anyhow!("event metadata missing module_id"))?;

    Ok((
        Uuid::parse_str(user_id).context("event metadata user_id is not a uuid")?,
        Uuid::parse_str(module_id).context("event metadata module_id is not a uuid")?,
    ))
}
