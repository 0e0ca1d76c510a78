//! Test helper module for entitlement-service integration tests.
//!
//! Spawns the application on a random port against the in-memory store,
//! with a wiremock server standing in for the billing provider.

#![allow(dead_code)]

use entitlement_service::config::{
    BillingProviderConfig, CatalogConfig, DatabaseConfig, GatewayConfig, TokenConfig,
};
use entitlement_service::models::{Module, UpsertModule};
use entitlement_service::services::GatewayStore;
use entitlement_service::startup::{AppState, Application};
use secrecy::Secret;
use service_core::utils::signature::generate_signature;
use uuid::Uuid;
use wiremock::MockServer;

pub const WEBHOOK_SECRET: &str = "whsec_test";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub state: AppState,
    pub billing_server: MockServer,
    pub client: reqwest::Client,
}

impl TestApp {
    /// Spawn a test application with the default 15-minute token TTL.
    pub async fn spawn() -> Self {
        Self::spawn_with_token_ttl(900).await
    }

    /// Spawn a test application with a custom launch-token TTL.
    pub async fn spawn_with_token_ttl(token_ttl_seconds: i64) -> Self {
        let billing_server = MockServer::start().await;

        let config = GatewayConfig {
            common: service_core::config::Config {
                port: 0, // Random port
                log_level: "warn".to_string(),
            },
            service_name: "entitlement-service-test".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: None, // In-memory store
                max_connections: 5,
                min_connections: 1,
            },
            billing: BillingProviderConfig {
                api_base_url: billing_server.uri(),
                secret_key: Secret::new("sk_test".to_string()),
                webhook_secret: Secret::new(WEBHOOK_SECRET.to_string()),
                timeout_seconds: 5,
                checkout_success_url: "https://app.test/modules?checkout=success".to_string(),
                checkout_cancel_url: "https://app.test/modules?checkout=cancelled".to_string(),
            },
            token: TokenConfig {
                ttl_seconds: token_ttl_seconds,
                sweep_interval_seconds: 3600,
            },
            catalog: CatalogConfig {
                refresh_ttl_seconds: 600,
            },
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let state = app.state();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            port,
            state,
            billing_server,
            client,
        }
    }

    /// Seed an enabled module into the catalog.
    pub async fn seed_module(&self, slug: &str) -> Module {
        self.seed_module_with(slug, true).await
    }

    pub async fn seed_module_with(&self, slug: &str, is_enabled: bool) -> Module {
        self.state
            .store
            .upsert_module(&UpsertModule {
                slug: slug.to_string(),
                name: format!("{} module", slug),
                launch_url: format!("https://{}.modules.test/start", slug),
                is_enabled,
            })
            .await
            .expect("Failed to seed module")
    }

    /// Sign a webhook body the way the billing provider does.
    pub fn sign(&self, body: &str) -> String {
        generate_signature(WEBHOOK_SECRET, body.as_bytes()).expect("Failed to sign body")
    }

    /// Deliver a webhook body with a valid signature.
    pub async fn post_webhook(&self, body: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/webhooks/billing", self.address))
            .header("x-billing-signature", self.sign(body))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("Webhook request failed")
    }

    /// Build a `checkout.session.completed` event body.
    pub fn checkout_completed_event(
        &self,
        user_id: Uuid,
        module: &Module,
        subscription_ref: &str,
        created: i64,
    ) -> String {
        serde_json::json!({
            "id": format!("evt_{}", Uuid::new_v4().simple()),
            "type": "checkout.session.completed",
            "created": created,
            "data": {
                "object": {
                    "id": format!("cs_{}", Uuid::new_v4().simple()),
                    "customer": "cus_test",
                    "subscription": subscription_ref,
                    "metadata": {
                        "user_id": user_id.to_string(),
                        "module_id": module.module_id.to_string()
                    }
                }
            }
        })
        .to_string()
    }

    /// Build a `customer.subscription.updated` event body.
    pub fn subscription_updated_event(
        &self,
        user_id: Uuid,
        module: &Module,
        subscription_ref: &str,
        status: &str,
        created: i64,
        current_period_end: Option<i64>,
    ) -> String {
        serde_json::json!({
            "id": format!("evt_{}", Uuid::new_v4().simple()),
            "type": "customer.subscription.updated",
            "created": created,
            "data": {
                "object": {
                    "id": subscription_ref,
                    "customer": "cus_test",
                    "status": status,
                    "current_period_end": current_period_end,
                    "cancel_at_period_end": false,
                    "metadata": {
                        "user_id": user_id.to_string(),
                        "module_id": module.module_id.to_string()
                    }
                }
            }
        })
        .to_string()
    }

    /// Make a user entitled to a module by simulating a completed checkout
    /// arriving through reconciliation.
    pub async fn activate_subscription(&self, user_id: Uuid, module: &Module) {
        let body = self.checkout_completed_event(
            user_id,
            module,
            &format!("sub_{}", Uuid::new_v4().simple()),
            chrono::Utc::now().timestamp(),
        );
        let response = self.post_webhook(&body).await;
        assert_eq!(response.status().as_u16(), 200);
    }

    /// Attach verified-identity headers the front door would set.
    pub fn authed(
        &self,
        builder: reqwest::RequestBuilder,
        user_id: Uuid,
    ) -> reqwest::RequestBuilder {
        builder
            .header("x-user-id", user_id.to_string())
            .header("x-user-email", format!("{}@example.test", user_id.simple()))
            .header("x-user-name", "Test User")
    }

    pub async fn launch(&self, user_id: Uuid, slug: &str) -> reqwest::Response {
        self.authed(
            self.client
                .post(format!("{}/modules/{}/launch", self.address, slug)),
            user_id,
        )
        .send()
        .await
        .expect("Launch request failed")
    }

    pub async fn verify(&self, token: &str, module_slug: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/modules/verify", self.address))
            .json(&serde_json::json!({ "token": token, "module_slug": module_slug }))
            .send()
            .await
            .expect("Verify request failed")
    }

    pub async fn checkout(&self, user_id: Uuid, slug: &str, price_ref: &str) -> reqwest::Response {
        self.authed(
            self.client
                .post(format!("{}/modules/{}/checkout", self.address, slug)),
            user_id,
        )
        .json(&serde_json::json!({ "price_ref": price_ref }))
        .send()
        .await
        .expect("Checkout request failed")
    }

    pub async fn portal(&self, user_id: Uuid, slug: &str) -> reqwest::Response {
        self.authed(
            self.client
                .post(format!("{}/modules/{}/portal", self.address, slug)),
            user_id,
        )
        .send()
        .await
        .expect("Portal request failed")
    }
}
