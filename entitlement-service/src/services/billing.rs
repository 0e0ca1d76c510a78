//! Billing provider client.
//!
//! Wraps the provider's REST API for checkout/portal session creation and
//! price listing, plus webhook signature verification. Session creation is
//! never blindly retried (it has provider-side side effects) but carries an
//! idempotency key; price listing is an idempotent read and is retried once.

use crate::config::BillingProviderConfig;
use crate::models::BillingEvent;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use service_core::utils::signature::verify_signature;
use std::time::Duration;
use uuid::Uuid;

/// Header carrying the provider's HMAC-SHA256 body signature.
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-billing-signature";

const READ_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Client for the external billing provider API.
#[derive(Clone)]
pub struct BillingClient {
    client: Client,
    config: BillingProviderConfig,
}

#[derive(Debug, Serialize)]
struct CreateCustomerRequest<'a> {
    email: &'a str,
    metadata: SessionMetadata,
}

#[derive(Debug, Serialize)]
struct CreateCheckoutSessionRequest<'a> {
    customer: &'a str,
    price: &'a str,
    success_url: &'a str,
    cancel_url: &'a str,
    metadata: SessionMetadata,
}

#[derive(Debug, Serialize)]
struct CreatePortalSessionRequest<'a> {
    customer: &'a str,
}

/// Metadata set at session creation; echoed back on every lifecycle event so
/// reconciliation can resolve the local (user, module) pair.
#[derive(Debug, Serialize)]
struct SessionMetadata {
    user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    module_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerObject {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Provider-hosted checkout page the user is redirected to.
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct PortalSession {
    pub id: String,
    pub url: String,
}

/// Price metadata for catalog display.
#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
    pub unit_amount: i64,
    pub currency: String,
    pub recurring_interval: Option<String>,
    /// Slug of the module this price unlocks, set in the provider dashboard.
    pub module_slug: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceList {
    data: Vec<Price>,
}

/// Provider API error body.
#[derive(Debug, Deserialize)]
struct ProviderError {
    error: ProviderErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    code: String,
    message: String,
}

impl BillingClient {
    pub fn new(config: BillingProviderConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if provider credentials are set.
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }

    /// Create a provider customer for a local user. Called at most once per
    /// user; the returned reference is persisted and reused on later
    /// checkouts so retries never create duplicate customer records.
    pub async fn create_customer(
        &self,
        email: &str,
        user_id: Uuid,
    ) -> Result<CustomerObject, AppError> {
        let url = format!("{}/customers", self.config.api_base_url);
        let request = CreateCustomerRequest {
            email,
            metadata: SessionMetadata {
                user_id: user_id.to_string(),
                module_id: None,
            },
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout())
            .bearer_auth(self.config.secret_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let customer: CustomerObject = parse_provider_response(response).await?;
        tracing::info!(user_id = %user_id, customer_ref = %customer.id, "Billing customer created");
        Ok(customer)
    }

    /// Create a hosted checkout session. Carries (user_id, module_id)
    /// metadata so the completion event can be reconciled, and an
    /// idempotency key so an ambiguous network failure cannot produce two
    /// sessions on the provider side.
    pub async fn create_checkout_session(
        &self,
        customer_ref: &str,
        price_ref: &str,
        user_id: Uuid,
        module_id: Uuid,
    ) -> Result<CheckoutSession, AppError> {
        let url = format!("{}/checkout/sessions", self.config.api_base_url);
        let request = CreateCheckoutSessionRequest {
            customer: customer_ref,
            price: price_ref,
            success_url: &self.config.checkout_success_url,
            cancel_url: &self.config.checkout_cancel_url,
            metadata: SessionMetadata {
                user_id: user_id.to_string(),
                module_id: Some(module_id.to_string()),
            },
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout())
            .bearer_auth(self.config.secret_key.expose_secret())
            .header("idempotency-key", Uuid::new_v4().to_string())
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let session: CheckoutSession = parse_provider_response(response).await?;
        tracing::info!(
            user_id = %user_id,
            module_id = %module_id,
            session_id = %session.id,
            "Checkout session created"
        );
        Ok(session)
    }

    /// Create a self-service billing portal session.
    pub async fn create_portal_session(
        &self,
        customer_ref: &str,
    ) -> Result<PortalSession, AppError> {
        let url = format!("{}/billing_portal/sessions", self.config.api_base_url);
        let request = CreatePortalSessionRequest {
            customer: customer_ref,
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout())
            .bearer_auth(self.config.secret_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let session: PortalSession = parse_provider_response(response).await?;
        tracing::info!(customer_ref = %customer_ref, session_id = %session.id, "Portal session created");
        Ok(session)
    }

    /// List active prices for catalog display. Idempotent read; retried once
    /// on transport or provider failure.
    pub async fn list_prices(&self) -> Result<Vec<Price>, AppError> {
        match self.list_prices_once().await {
            Ok(prices) => Ok(prices),
            Err(e) if is_retryable(&e) => {
                tracing::warn!(error = %e, "Price listing failed, retrying once");
                tokio::time::sleep(READ_RETRY_BACKOFF).await;
                self.list_prices_once().await
            }
            Err(e) => Err(e),
        }
    }

    async fn list_prices_once(&self) -> Result<Vec<Price>, AppError> {
        let url = format!("{}/prices?active=true", self.config.api_base_url);

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout())
            .bearer_auth(self.config.secret_key.expose_secret())
            .send()
            .await
            .map_err(map_transport_error)?;

        let list: PriceList = parse_provider_response(response).await?;
        Ok(list.data)
    }

    /// Verify a webhook body signature (hex HMAC-SHA256 of the raw body).
    pub fn verify_webhook_signature(
        &self,
        body: &[u8],
        signature: &str,
    ) -> Result<bool, AppError> {
        verify_signature(
            self.config.webhook_secret.expose_secret(),
            body,
            signature,
        )
        .map_err(AppError::InternalError)
    }

    /// Parse a webhook event from a raw body.
    pub fn parse_webhook_event(&self, body: &[u8]) -> Result<BillingEvent, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

fn map_transport_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() || e.is_connect() {
        AppError::BadGateway(format!("billing provider unreachable: {}", e))
    } else {
        AppError::InternalError(anyhow::anyhow!("billing provider request failed: {}", e))
    }
}

fn is_retryable(e: &AppError) -> bool {
    matches!(e, AppError::BadGateway(_))
}

async fn parse_provider_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, AppError> {
    let status = response.status();
    let body = response.text().await.map_err(map_transport_error)?;

    if status.is_success() {
        return serde_json::from_str(&body).map_err(|e| {
            AppError::InternalError(anyhow::anyhow!(
                "malformed billing provider response: {}",
                e
            ))
        });
    }

    if status.is_server_error() {
        tracing::error!(status = %status, body = %body, "Billing provider server error");
        return Err(AppError::BadGateway(format!(
            "billing provider returned {}",
            status
        )));
    }

    let error: ProviderError = serde_json::from_str(&body).unwrap_or(ProviderError {
        error: ProviderErrorDetail {
            code: "unknown".to_string(),
            message: body.clone(),
        },
    });
    tracing::error!(
        status = %status,
        code = %error.error.code,
        message = %error.error.message,
        "Billing provider rejected request"
    );
    Err(AppError::BadRequest(anyhow::anyhow!(
        "billing provider error: {}",
        error.error.code
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;
    use service_core::utils::signature::generate_signature;

    fn test_config() -> BillingProviderConfig {
        BillingProviderConfig {
            api_base_url: "https://billing.test/v1".to_string(),
            secret_key: Secret::new("sk_test_123".to_string()),
            webhook_secret: Secret::new("whsec_test".to_string()),
            timeout_seconds: 5,
            checkout_success_url: "https://app.test/ok".to_string(),
            checkout_cancel_url: "https://app.test/cancel".to_string(),
        }
    }

    #[test]
    fn is_configured_requires_secret_key() {
        assert!(BillingClient::new(test_config()).is_configured());

        let mut config = test_config();
        config.secret_key = Secret::new(String::new());
        assert!(!BillingClient::new(config).is_configured());
    }

    #[test]
    fn webhook_signature_round_trip() {
        let client = BillingClient::new(test_config());
        let body = br#"{"id":"evt_1","type":"noop","created":1,"data":{"object":{}}}"#;

        let sig = generate_signature("whsec_test", body).unwrap();
        assert!(client.verify_webhook_signature(body, &sig).unwrap());
        assert!(!client.verify_webhook_signature(body, "deadbeef").unwrap());
    }

    #[test]
    fn parses_webhook_event() {
        let client = BillingClient::new(test_config());
        let body = br#"{"id":"evt_1","type":"customer.subscription.updated","created":1754000000,"data":{"object":{"id":"sub_1","customer":"cus_1","status":"active"}}}"#;

        let event = client.parse_webhook_event(body).unwrap();
        assert_eq!(event.id, "evt_1");
        assert_eq!(event.event_type, "customer.subscription.updated");
        assert_eq!(event.created, 1754000000);
    }

    #[test]
    fn rejects_malformed_webhook_body() {
        let client = BillingClient::new(test_config());
        assert!(client.parse_webhook_event(b"not json").is_err());
    }
}
