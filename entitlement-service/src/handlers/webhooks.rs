//! Billing provider webhook endpoint.
//!
//! The reconciliation listener: consumes subscription lifecycle events,
//! applies them to the store with timestamp-guarded idempotent upserts, and
//! dead-letters anything it cannot process. Unprocessable events are still
//! acknowledged with 200 so the provider does not retry them forever; a
//! store failure returns 500 and the provider redelivers.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use service_core::error::AppError;

use crate::models::UpsertOutcome;
use crate::services::billing::WEBHOOK_SIGNATURE_HEADER;
use crate::services::reconciliation::{normalize, NormalizedEvent};
use crate::services::record_webhook_event;
use crate::startup::AppState;

pub async fn billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing {} header", WEBHOOK_SIGNATURE_HEADER);
            AppError::Unauthorized(anyhow::anyhow!("missing webhook signature"))
        })?;

    if !state.billing.verify_webhook_signature(&body, signature)? {
        tracing::warn!("Invalid webhook signature");
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "invalid webhook signature"
        )));
    }

    let event = match state.billing.parse_webhook_event(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "Unparsable webhook body, dead-lettering");
            state
                .store
                .record_dead_letter("unknown", &String::from_utf8_lossy(&body), &e.to_string())
                .await?;
            record_webhook_event("unparsable", "dead_lettered");
            return Ok(StatusCode::OK);
        }
    };

    match normalize(&event) {
        Ok(NormalizedEvent::Subscription(change)) => {
            match state.store.upsert_from_billing_event(&change).await? {
                UpsertOutcome::Applied(subscription) => {
                    tracing::info!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        user_id = %subscription.user_id,
                        module_id = %subscription.module_id,
                        status = %subscription.status,
                        "Billing event applied"
                    );
                    record_webhook_event(&event.event_type, "applied");
                }
                UpsertOutcome::Stale(_) => {
                    tracing::info!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        "Billing event older than stored state, discarded"
                    );
                    record_webhook_event(&event.event_type, "discarded");
                }
            }
        }
        Ok(NormalizedEvent::CatalogChanged) => {
            state.catalog.invalidate_all();
            record_webhook_event(&event.event_type, "catalog_invalidated");
        }
        Ok(NormalizedEvent::Ignored) => {
            tracing::debug!(event_type = %event.event_type, "Unhandled webhook event type");
            record_webhook_event(&event.event_type, "ignored");
        }
        Err(e) => {
            // A lost reconciliation event means a paying user loses access;
            // keep the payload for replay.
            tracing::error!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "Unreconcilable webhook event, dead-lettering"
            );
            state
                .store
                .record_dead_letter(&event.id, &String::from_utf8_lossy(&body), &e.to_string())
                .await?;
            record_webhook_event(&event.event_type, "dead_lettered");
        }
    }

    Ok(StatusCode::OK)
}
