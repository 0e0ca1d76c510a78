//! Store abstraction for gateway state.
//!
//! The production store is PostgreSQL (`services::database`). `MemoryStore`
//! backs local runs and the integration test suite when no database URL is
//! configured; it honors the same invariants (unique (user, module) row,
//! atomic token consume, exclusive checkout intents).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    CapabilityToken, Module, Subscription, SubscriptionChange, UpsertModule, UpsertOutcome,
};

/// How long a checkout intent may be held before a crashed request's claim
/// can be taken over.
pub const CHECKOUT_INTENT_STALE_AFTER_MINUTES: i64 = 10;

#[async_trait]
pub trait GatewayStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // Module catalog (read-mostly; upsert for seeding/ops tooling)
    async fn get_module_by_slug(&self, slug: &str) -> Result<Option<Module>, AppError>;
    async fn get_module(&self, module_id: Uuid) -> Result<Option<Module>, AppError>;
    async fn list_modules(&self) -> Result<Vec<Module>, AppError>;
    async fn upsert_module(&self, input: &UpsertModule) -> Result<Module, AppError>;

    // Subscription store
    async fn get_subscription(
        &self,
        user_id: Uuid,
        module_id: Uuid,
    ) -> Result<Option<Subscription>, AppError>;

    /// Apply a normalized billing event. Keyed on (user_id, module_id);
    /// applied only when the event's provider-asserted timestamp is strictly
    /// newer than the stored one, which makes redelivery idempotent and
    /// out-of-order delivery safe.
    async fn upsert_from_billing_event(
        &self,
        change: &SubscriptionChange,
    ) -> Result<UpsertOutcome, AppError>;

    // Billing customer references
    async fn get_billing_customer(&self, user_id: Uuid) -> Result<Option<String>, AppError>;
    async fn put_billing_customer(
        &self,
        user_id: Uuid,
        customer_ref: &str,
    ) -> Result<(), AppError>;

    // Checkout intents: store-level mutual exclusion for check-then-create
    async fn claim_checkout_intent(
        &self,
        user_id: Uuid,
        module_id: Uuid,
    ) -> Result<bool, AppError>;
    async fn release_checkout_intent(
        &self,
        user_id: Uuid,
        module_id: Uuid,
    ) -> Result<(), AppError>;

    // Capability tokens
    async fn insert_token(&self, token: &CapabilityToken) -> Result<(), AppError>;
    /// Atomic consume-on-read: delete the row and return it, or return None.
    /// First successful verification wins; a replayed token finds nothing.
    async fn consume_token(&self, token_hash: &str)
        -> Result<Option<CapabilityToken>, AppError>;
    async fn sweep_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError>;

    // Reconciliation dead letters
    async fn record_dead_letter(
        &self,
        event_id: &str,
        payload: &str,
        reason: &str,
    ) -> Result<(), AppError>;
    async fn dead_letter_count(&self) -> Result<i64, AppError>;
}

// Retained for replay tooling; only counted from inside the process.
#[derive(Debug)]
#[allow(dead_code)]
struct DeadLetter {
    event_id: String,
    payload: String,
    reason: String,
}

#[derive(Default)]
struct MemoryInner {
    modules: HashMap<Uuid, Module>,
    subscriptions: HashMap<(Uuid, Uuid), Subscription>,
    customers: HashMap<Uuid, String>,
    intents: HashMap<(Uuid, Uuid), DateTime<Utc>>,
    tokens: HashMap<String, CapabilityToken>,
    dead_letters: Vec<DeadLetter>,
}

/// In-memory store for dev runs and tests. All state is process-local.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // Lock poisoning only happens if a holder panicked; the data itself
        // is still consistent for these single-map operations.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl GatewayStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn get_module_by_slug(&self, slug: &str) -> Result<Option<Module>, AppError> {
        let inner = self.lock();
        Ok(inner.modules.values().find(|m| m.slug == slug).cloned())
    }

    async fn get_module(&self, module_id: Uuid) -> Result<Option<Module>, AppError> {
        let inner = self.lock();
        Ok(inner.modules.get(&module_id).cloned())
    }

    async fn list_modules(&self) -> Result<Vec<Module>, AppError> {
        let inner = self.lock();
        let mut modules: Vec<Module> = inner.modules.values().cloned().collect();
        modules.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(modules)
    }

    async fn upsert_module(&self, input: &UpsertModule) -> Result<Module, AppError> {
        let mut inner = self.lock();
        let now = Utc::now();

        if let Some(module) = inner.modules.values_mut().find(|m| m.slug == input.slug) {
            module.name = input.name.clone();
            module.launch_url = input.launch_url.clone();
            module.is_enabled = input.is_enabled;
            module.updated_utc = now;
            return Ok(module.clone());
        }

        let module = Module {
            module_id: Uuid::new_v4(),
            slug: input.slug.clone(),
            name: input.name.clone(),
            launch_url: input.launch_url.clone(),
            is_enabled: input.is_enabled,
            created_utc: now,
            updated_utc: now,
        };
        inner.modules.insert(module.module_id, module.clone());
        Ok(module)
    }

    async fn get_subscription(
        &self,
        user_id: Uuid,
        module_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let inner = self.lock();
        Ok(inner.subscriptions.get(&(user_id, module_id)).cloned())
    }

    async fn upsert_from_billing_event(
        &self,
        change: &SubscriptionChange,
    ) -> Result<UpsertOutcome, AppError> {
        let mut inner = self.lock();
        let key = (change.user_id, change.module_id);
        let now = Utc::now();

        if let Some(existing) = inner.subscriptions.get_mut(&key) {
            if change.occurred_utc <= existing.provider_updated_utc {
                return Ok(UpsertOutcome::Stale(existing.clone()));
            }
            existing.status = change.status.clone();
            existing.billing_customer_ref = change.billing_customer_ref.clone();
            existing.billing_subscription_ref = change.billing_subscription_ref.clone();
            existing.current_period_end = change.current_period_end;
            existing.cancel_at_period_end = change.cancel_at_period_end;
            existing.provider_updated_utc = change.occurred_utc;
            existing.updated_utc = now;
            return Ok(UpsertOutcome::Applied(existing.clone()));
        }

        let subscription = Subscription {
            subscription_id: Uuid::new_v4(),
            user_id: change.user_id,
            module_id: change.module_id,
            status: change.status.clone(),
            billing_customer_ref: change.billing_customer_ref.clone(),
            billing_subscription_ref: change.billing_subscription_ref.clone(),
            current_period_end: change.current_period_end,
            cancel_at_period_end: change.cancel_at_period_end,
            provider_updated_utc: change.occurred_utc,
            created_utc: now,
            updated_utc: now,
        };
        inner.subscriptions.insert(key, subscription.clone());
        Ok(UpsertOutcome::Applied(subscription))
    }

    async fn get_billing_customer(&self, user_id: Uuid) -> Result<Option<String>, AppError> {
        let inner = self.lock();
        Ok(inner.customers.get(&user_id).cloned())
    }

    async fn put_billing_customer(
        &self,
        user_id: Uuid,
        customer_ref: &str,
    ) -> Result<(), AppError> {
        let mut inner = self.lock();
        inner.customers.insert(user_id, customer_ref.to_string());
        Ok(())
    }

    async fn claim_checkout_intent(
        &self,
        user_id: Uuid,
        module_id: Uuid,
    ) -> Result<bool, AppError> {
        let mut inner = self.lock();
        let key = (user_id, module_id);
        let now = Utc::now();
        if let Some(claimed_utc) = inner.intents.get(&key) {
            let stale = *claimed_utc + Duration::minutes(CHECKOUT_INTENT_STALE_AFTER_MINUTES);
            if stale > now {
                return Ok(false);
            }
        }
        inner.intents.insert(key, now);
        Ok(true)
    }

    async fn release_checkout_intent(
        &self,
        user_id: Uuid,
        module_id: Uuid,
    ) -> Result<(), AppError> {
        let mut inner = self.lock();
        inner.intents.remove(&(user_id, module_id));
        Ok(())
    }

    async fn insert_token(&self, token: &CapabilityToken) -> Result<(), AppError> {
        let mut inner = self.lock();
        inner
            .tokens
            .insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn consume_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<CapabilityToken>, AppError> {
        let mut inner = self.lock();
        Ok(inner.tokens.remove(token_hash))
    }

    async fn sweep_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut inner = self.lock();
        let before = inner.tokens.len();
        inner.tokens.retain(|_, token| token.expires_utc > now);
        Ok((before - inner.tokens.len()) as u64)
    }

    async fn record_dead_letter(
        &self,
        event_id: &str,
        payload: &str,
        reason: &str,
    ) -> Result<(), AppError> {
        let mut inner = self.lock();
        inner.dead_letters.push(DeadLetter {
            event_id: event_id.to_string(),
            payload: payload.to_string(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn dead_letter_count(&self) -> Result<i64, AppError> {
        let inner = self.lock();
        Ok(inner.dead_letters.len() as i64)
    }
}
