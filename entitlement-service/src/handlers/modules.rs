//! Module catalog, checkout/portal brokering, launch-token issuance and
//! verification.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::middleware::AuthenticatedUser;
use crate::services::billing::CheckoutSession;
use crate::services::catalog::PricePoint;
use crate::services::tokens::{check_claims, TokenService, VerifyFailure};
use crate::services::{
    record_checkout_session, record_error, record_token_issued, record_token_verification,
};
use crate::startup::AppState;

/// Catalog entry: a module joined with its cached price metadata.
#[derive(Debug, Serialize)]
pub struct CatalogEntry {
    pub module_id: Uuid,
    pub slug: String,
    pub name: String,
    pub prices: Vec<PricePoint>,
}

/// List enabled modules with cached provider pricing.
///
/// Pricing is display metadata only; a refresh failure degrades to an empty
/// price list rather than failing the catalog.
pub async fn list_modules(
    State(state): State<AppState>,
) -> Result<Json<Vec<CatalogEntry>>, AppError> {
    let modules = state.store.list_modules().await?;

    let mut entries = Vec::new();
    for module in modules.into_iter().filter(|m| m.is_enabled) {
        let prices = match state.catalog.prices_for(&module.slug).await {
            Ok(prices) => prices,
            Err(e) => {
                tracing::warn!(error = %e, slug = %module.slug, "Price lookup failed for catalog entry");
                record_error("catalog_prices");
                Vec::new()
            }
        };
        entries.push(CatalogEntry {
            module_id: module.module_id,
            slug: module.slug,
            name: module.name,
            prices,
        });
    }

    Ok(Json(entries))
}

/// Request to start a checkout for a module.
#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    /// Provider price the user picked from the catalog.
    #[validate(length(min = 1))]
    pub price_ref: String,
}

#[derive(Debug, Serialize)]
pub struct RedirectResponse {
    pub redirect_url: String,
}

/// Create a provider-hosted checkout session.
///
/// Creating a session never grants entitlement; only a confirmed billing
/// event observed by reconciliation does. The checkout-intent claim keeps
/// concurrent attempts for the same (user, module) from both passing the
/// subscription check.
pub async fn create_checkout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(slug): Path<String>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<RedirectResponse>), AppError> {
    payload.validate()?;

    let module = lookup_enabled_module(&state, &slug).await?;

    if !state
        .store
        .claim_checkout_intent(user.user_id, module.module_id)
        .await?
    {
        record_checkout_session(&module.slug, "conflict");
        return Err(AppError::Conflict(anyhow::anyhow!(
            "a checkout for this module is already in progress"
        )));
    }

    let outcome = start_checkout(&state, &user, &module.module_id, &payload.price_ref).await;

    if let Err(e) = state
        .store
        .release_checkout_intent(user.user_id, module.module_id)
        .await
    {
        tracing::warn!(error = %e, user_id = %user.user_id, "Failed to release checkout intent");
    }

    match outcome {
        Ok(session) => {
            record_checkout_session(&module.slug, "created");
            tracing::info!(
                user_id = %user.user_id,
                module = %module.slug,
                session_id = %session.id,
                "Checkout session created"
            );
            Ok((
                StatusCode::OK,
                Json(RedirectResponse {
                    redirect_url: session.url,
                }),
            ))
        }
        Err(e) => {
            record_checkout_session(&module.slug, "rejected");
            Err(e)
        }
    }
}

/// The check-then-create sequence, executed while holding the checkout
/// intent claim.
async fn start_checkout(
    state: &AppState,
    user: &AuthenticatedUser,
    module_id: &Uuid,
    price_ref: &str,
) -> Result<CheckoutSession, AppError> {
    if let Some(subscription) = state
        .store
        .get_subscription(user.user_id, *module_id)
        .await?
    {
        if subscription.is_entitled() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "AlreadySubscribed: an active subscription for this module already exists"
            )));
        }
    }

    // Reuse the provider customer across checkout attempts; only the very
    // first checkout for a user creates one.
    let customer_ref = match state.store.get_billing_customer(user.user_id).await? {
        Some(existing) => existing,
        None => {
            let customer = state
                .billing
                .create_customer(&user.email, user.user_id)
                .await?;
            state
                .store
                .put_billing_customer(user.user_id, &customer.id)
                .await?;
            customer.id
        }
    };

    state
        .billing
        .create_checkout_session(&customer_ref, price_ref, user.user_id, *module_id)
        .await
}

/// Create a self-service billing portal session.
pub async fn create_portal(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(slug): Path<String>,
) -> Result<Json<RedirectResponse>, AppError> {
    lookup_enabled_module(&state, &slug).await?;

    let customer_ref = state
        .store
        .get_billing_customer(user.user_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "NoBillingAccount: no billing account on file for this user"
            ))
        })?;

    let session = state.billing.create_portal_session(&customer_ref).await?;
    Ok(Json(RedirectResponse {
        redirect_url: session.url,
    }))
}

#[derive(Debug, Serialize)]
pub struct LaunchResponse {
    /// Bearer secret, returned exactly once. Also embedded in `launch_url`.
    pub token: String,
    pub expires_utc: DateTime<Utc>,
    pub launch_url: String,
}

/// Issue a launch token for an entitled user.
///
/// This is the single authorization gate of the gateway: entitlement is read
/// from the subscription store at call time, nothing else.
pub async fn launch_module(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(slug): Path<String>,
) -> Result<Json<LaunchResponse>, AppError> {
    let module = lookup_enabled_module(&state, &slug).await?;

    let entitled = state
        .store
        .get_subscription(user.user_id, module.module_id)
        .await?
        .map(|s| s.is_entitled())
        .unwrap_or(false);

    if !entitled {
        tracing::info!(user_id = %user.user_id, module = %module.slug, "Launch refused: not entitled");
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "NotEntitled: no active subscription for this module"
        )));
    }

    let issued = state
        .tokens
        .mint(user.user_id, module.module_id, &user.display_name, Utc::now());
    state.store.insert_token(&issued.record).await?;
    record_token_issued(&module.slug);

    // The plaintext secret lives only in this response and the launch URL.
    let separator = if module.launch_url.contains('?') { '&' } else { '?' };
    let launch_url = format!(
        "{}{}launch_token={}",
        module.launch_url, separator, issued.plaintext
    );

    tracing::info!(
        user_id = %user.user_id,
        module = %module.slug,
        expires_utc = %issued.record.expires_utc,
        "Launch token issued"
    );

    Ok(Json(LaunchResponse {
        token: issued.plaintext,
        expires_utc: issued.record.expires_utc,
        launch_url,
    }))
}

/// Token exchange request, sent by a module's backend rather than the end
/// user's browser.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub token: String,
    pub module_slug: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub user_id: Uuid,
    pub module_id: Uuid,
    pub user_display_name: String,
}

/// Exchange a launch token for verified identity claims.
///
/// The token row is consumed atomically before any checks, so a captured
/// token cannot be replayed after legitimate use. Hash-miss, expiry and
/// cross-module presentation are logged distinctly but all surface as the
/// same opaque 401.
pub async fn verify_token(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, AppError> {
    let now = Utc::now();
    let token_hash = TokenService::hash(&payload.token);

    let Some(record) = state.store.consume_token(&token_hash).await? else {
        return Err(reject(&payload.module_slug, VerifyFailure::InvalidToken));
    };

    let module = state.store.get_module(record.module_id).await?;
    if let Err(failure) = check_claims(&record, module.as_ref(), &payload.module_slug, now) {
        return Err(reject(&payload.module_slug, failure));
    }

    record_token_verification(&payload.module_slug, "verified");
    tracing::info!(
        user_id = %record.user_id,
        module = %payload.module_slug,
        "Launch token verified"
    );

    Ok(Json(VerifyResponse {
        user_id: record.user_id,
        module_id: record.module_id,
        user_display_name: record.user_display_name,
    }))
}

fn reject(module_slug: &str, failure: VerifyFailure) -> AppError {
    tracing::warn!(
        module_slug = %module_slug,
        reason = failure.as_str(),
        "Launch token rejected"
    );
    record_token_verification(module_slug, failure.as_str());
    AppError::Unauthorized(anyhow::anyhow!("invalid launch token"))
}

async fn lookup_enabled_module(
    state: &AppState,
    slug: &str,
) -> Result<crate::models::Module, AppError> {
    state
        .store
        .get_module_by_slug(slug)
        .await?
        .filter(|m| m.is_enabled)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("module not found: {}", slug)))
}
