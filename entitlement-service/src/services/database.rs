//! PostgreSQL store for the entitlement gateway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    CapabilityToken, Module, Subscription, SubscriptionChange, UpsertModule, UpsertOutcome,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{GatewayStore, CHECKOUT_INTENT_STALE_AFTER_MINUTES};

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, user_id, module_id, status, billing_customer_ref, billing_subscription_ref, current_period_end, cancel_at_period_end, provider_updated_utc, created_utc, updated_utc";
const MODULE_COLUMNS: &str =
    "module_id, slug, name, launch_url, is_enabled, created_utc, updated_utc";
const TOKEN_COLUMNS: &str =
    "token_hash, user_id, module_id, user_display_name, issued_utc, expires_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "entitlement-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl GatewayStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_module_by_slug(&self, slug: &str) -> Result<Option<Module>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_module_by_slug"])
            .start_timer();

        let module = sqlx::query_as::<_, Module>(&format!(
            "SELECT {} FROM modules WHERE slug = $1",
            MODULE_COLUMNS
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get module: {}", e)))?;

        timer.observe_duration();
        Ok(module)
    }

    #[instrument(skip(self))]
    async fn get_module(&self, module_id: Uuid) -> Result<Option<Module>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_module"])
            .start_timer();

        let module = sqlx::query_as::<_, Module>(&format!(
            "SELECT {} FROM modules WHERE module_id = $1",
            MODULE_COLUMNS
        ))
        .bind(module_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get module: {}", e)))?;

        timer.observe_duration();
        Ok(module)
    }

    #[instrument(skip(self))]
    async fn list_modules(&self) -> Result<Vec<Module>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_modules"])
            .start_timer();

        let modules = sqlx::query_as::<_, Module>(&format!(
            "SELECT {} FROM modules ORDER BY slug",
            MODULE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list modules: {}", e)))?;

        timer.observe_duration();
        Ok(modules)
    }

    #[instrument(skip(self, input), fields(slug = %input.slug))]
    async fn upsert_module(&self, input: &UpsertModule) -> Result<Module, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_module"])
            .start_timer();

        let module = sqlx::query_as::<_, Module>(&format!(
            r#"
            INSERT INTO modules (module_id, slug, name, launch_url, is_enabled)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (slug) DO UPDATE SET
                name = EXCLUDED.name,
                launch_url = EXCLUDED.launch_url,
                is_enabled = EXCLUDED.is_enabled,
                updated_utc = now()
            RETURNING {}
            "#,
            MODULE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&input.slug)
        .bind(&input.name)
        .bind(&input.launch_url)
        .bind(input.is_enabled)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to upsert module: {}", e)))?;

        timer.observe_duration();
        info!(module_id = %module.module_id, slug = %module.slug, "Module upserted");
        Ok(module)
    }

    #[instrument(skip(self))]
    async fn get_subscription(
        &self,
        user_id: Uuid,
        module_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 AND module_id = $2",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .bind(module_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get subscription: {}", e))
        })?;

        timer.observe_duration();
        Ok(subscription)
    }

    #[instrument(skip(self, change), fields(user_id = %change.user_id, module_id = %change.module_id))]
    async fn upsert_from_billing_event(
        &self,
        change: &SubscriptionChange,
    ) -> Result<UpsertOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_from_billing_event"])
            .start_timer();

        // The WHERE guard on the conflict arm makes stale and redelivered
        // events no-ops: last writer wins by provider-asserted time.
        let applied = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions (subscription_id, user_id, module_id, status, billing_customer_ref, billing_subscription_ref, current_period_end, cancel_at_period_end, provider_updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id, module_id) DO UPDATE SET
                status = EXCLUDED.status,
                billing_customer_ref = EXCLUDED.billing_customer_ref,
                billing_subscription_ref = EXCLUDED.billing_subscription_ref,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                provider_updated_utc = EXCLUDED.provider_updated_utc,
                updated_utc = now()
            WHERE subscriptions.provider_updated_utc < EXCLUDED.provider_updated_utc
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(change.user_id)
        .bind(change.module_id)
        .bind(&change.status)
        .bind(&change.billing_customer_ref)
        .bind(&change.billing_subscription_ref)
        .bind(change.current_period_end)
        .bind(change.cancel_at_period_end)
        .bind(change.occurred_utc)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to upsert subscription: {}", e))
        })?;

        timer.observe_duration();

        if let Some(subscription) = applied {
            return Ok(UpsertOutcome::Applied(subscription));
        }

        let current = self
            .get_subscription(change.user_id, change.module_id)
            .await?
            .ok_or_else(|| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Subscription row vanished during stale upsert"
                ))
            })?;
        Ok(UpsertOutcome::Stale(current))
    }

    #[instrument(skip(self))]
    async fn get_billing_customer(&self, user_id: Uuid) -> Result<Option<String>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_billing_customer"])
            .start_timer();

        let customer_ref = sqlx::query_scalar::<_, String>(
            "SELECT customer_ref FROM billing_customers WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get billing customer: {}", e))
        })?;

        timer.observe_duration();
        Ok(customer_ref)
    }

    #[instrument(skip(self, customer_ref))]
    async fn put_billing_customer(
        &self,
        user_id: Uuid,
        customer_ref: &str,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["put_billing_customer"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO billing_customers (user_id, customer_ref)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(customer_ref)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to store billing customer: {}", e))
        })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn claim_checkout_intent(
        &self,
        user_id: Uuid,
        module_id: Uuid,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["claim_checkout_intent"])
            .start_timer();

        // Unique primary key insert is the mutual exclusion; a leaked claim
        // from a crashed request becomes reclaimable after the stale window.
        let result = sqlx::query(
            r#"
            INSERT INTO checkout_intents (user_id, module_id, claimed_utc)
            VALUES ($1, $2, now())
            ON CONFLICT (user_id, module_id) DO UPDATE SET claimed_utc = now()
            WHERE checkout_intents.claimed_utc < now() - make_interval(mins => $3)
            "#,
        )
        .bind(user_id)
        .bind(module_id)
        .bind(CHECKOUT_INTENT_STALE_AFTER_MINUTES as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to claim checkout intent: {}", e))
        })?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn release_checkout_intent(
        &self,
        user_id: Uuid,
        module_id: Uuid,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["release_checkout_intent"])
            .start_timer();

        sqlx::query("DELETE FROM checkout_intents WHERE user_id = $1 AND module_id = $2")
            .bind(user_id)
            .bind(module_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to release checkout intent: {}",
                    e
                ))
            })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, token), fields(user_id = %token.user_id, module_id = %token.module_id))]
    async fn insert_token(&self, token: &CapabilityToken) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_token"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO capability_tokens (token_hash, user_id, module_id, user_display_name, issued_utc, expires_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&token.token_hash)
        .bind(token.user_id)
        .bind(token.module_id)
        .bind(&token.user_display_name)
        .bind(token.issued_utc)
        .bind(token.expires_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert token: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip_all)]
    async fn consume_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<CapabilityToken>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["consume_token"])
            .start_timer();

        // Atomic delete-returning: exactly one caller ever sees the row.
        let token = sqlx::query_as::<_, CapabilityToken>(&format!(
            "DELETE FROM capability_tokens WHERE token_hash = $1 RETURNING {}",
            TOKEN_COLUMNS
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to consume token: {}", e)))?;

        timer.observe_duration();
        Ok(token)
    }

    #[instrument(skip(self))]
    async fn sweep_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["sweep_expired_tokens"])
            .start_timer();

        let result = sqlx::query("DELETE FROM capability_tokens WHERE expires_utc <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to sweep tokens: {}", e))
            })?;

        timer.observe_duration();
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, payload, reason))]
    async fn record_dead_letter(
        &self,
        event_id: &str,
        payload: &str,
        reason: &str,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_dead_letter"])
            .start_timer();

        sqlx::query(
            "INSERT INTO dead_letter_events (event_id, payload, reason) VALUES ($1, $2, $3)",
        )
        .bind(event_id)
        .bind(payload)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record dead letter: {}", e))
        })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn dead_letter_count(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM dead_letter_events")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to count dead letters: {}", e))
            })?;
        Ok(count)
    }
}
