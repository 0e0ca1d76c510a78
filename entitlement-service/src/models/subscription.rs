//! Subscription model: the local mirror of billing-provider state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription status, mirroring the billing provider's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    Incomplete,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Incomplete => "incomplete",
        }
    }

    /// Unrecognized provider states map to Incomplete: an unknown status
    /// must never grant access.
    pub fn from_string(s: &str) -> Self {
        match s {
            "trialing" => SubscriptionStatus::Trialing,
            "active" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            "incomplete" => SubscriptionStatus::Incomplete,
            _ => SubscriptionStatus::Incomplete,
        }
    }

    /// Entitlement tracks status alone: `current_period_end` and
    /// `cancel_at_period_end` never extend access past a status change.
    pub fn is_entitled(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Trialing | SubscriptionStatus::Active
        )
    }
}

/// One row per (user, module) pair that has ever been purchased. Mutated by
/// reconciliation, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub module_id: Uuid,
    pub status: String,
    pub billing_customer_ref: String,
    pub billing_subscription_ref: String,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    /// Provider-asserted event time of the last applied change; the ordering
    /// key for out-of-order webhook delivery.
    pub provider_updated_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Subscription {
    pub fn is_entitled(&self) -> bool {
        SubscriptionStatus::from_string(&self.status).is_entitled()
    }
}

/// Result of applying a billing event to the store.
#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    /// The event was newer than stored state and was applied.
    Applied(Subscription),
    /// The event was at or behind stored state and was discarded.
    Stale(Subscription),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Incomplete,
        ] {
            assert_eq!(SubscriptionStatus::from_string(status.as_str()), status);
        }
    }

    #[test]
    fn unknown_status_is_not_entitled() {
        assert!(!SubscriptionStatus::from_string("paused").is_entitled());
        assert!(!SubscriptionStatus::from_string("").is_entitled());
    }

    #[test]
    fn only_active_and_trialing_are_entitled() {
        assert!(SubscriptionStatus::Active.is_entitled());
        assert!(SubscriptionStatus::Trialing.is_entitled());
        assert!(!SubscriptionStatus::PastDue.is_entitled());
        assert!(!SubscriptionStatus::Canceled.is_entitled());
        assert!(!SubscriptionStatus::Incomplete.is_entitled());
    }

    #[test]
    fn canceled_with_future_period_end_is_not_entitled() {
        let sub = Subscription {
            subscription_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            module_id: Uuid::new_v4(),
            status: "canceled".to_string(),
            billing_customer_ref: "cus_1".to_string(),
            billing_subscription_ref: "sub_1".to_string(),
            current_period_end: Some(Utc::now() + chrono::Duration::days(20)),
            cancel_at_period_end: false,
            provider_updated_utc: Utc::now(),
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        };
        assert!(!sub.is_entitled());
    }
}
