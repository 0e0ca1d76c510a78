use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use std::env;

/// Gateway configuration, loaded from the environment.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub common: service_core::config::Config,
    pub service_name: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub billing: BillingProviderConfig,
    pub token: TokenConfig,
    pub catalog: CatalogConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string. When unset the service falls back to the
    /// in-memory store (dev/test only; nothing survives a restart).
    pub url: Option<Secret<String>>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Billing provider credentials and endpoints.
#[derive(Clone, Debug)]
pub struct BillingProviderConfig {
    pub api_base_url: String,
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub timeout_seconds: u64,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
}

#[derive(Clone, Debug)]
pub struct TokenConfig {
    /// Launch token lifetime. 15 minutes by default: long enough to cover
    /// redirect latency to the module, short enough to bound the blast radius
    /// of a leaked URL.
    pub ttl_seconds: i64,
    pub sweep_interval_seconds: u64,
}

#[derive(Clone, Debug)]
pub struct CatalogConfig {
    pub refresh_ttl_seconds: u64,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let port = env::var("GATEWAY_PORT")
            .unwrap_or_else(|_| "3005".to_string())
            .parse()?;
        let log_level = env::var("GATEWAY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let db_url = env::var("GATEWAY_DATABASE_URL").ok().map(Secret::new);
        let max_connections = env::var("GATEWAY_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("GATEWAY_DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let api_base_url =
            env::var("BILLING_API_BASE_URL").unwrap_or_else(|_| "https://api.billing.example.com/v1".to_string());
        let secret_key = env::var("BILLING_SECRET_KEY").unwrap_or_default();
        let webhook_secret = env::var("BILLING_WEBHOOK_SECRET").unwrap_or_default();
        let timeout_seconds = env::var("BILLING_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let checkout_success_url = env::var("CHECKOUT_SUCCESS_URL")
            .unwrap_or_else(|_| "https://app.example.com/modules?checkout=success".to_string());
        let checkout_cancel_url = env::var("CHECKOUT_CANCEL_URL")
            .unwrap_or_else(|_| "https://app.example.com/modules?checkout=cancelled".to_string());

        let ttl_seconds = env::var("LAUNCH_TOKEN_TTL_SECONDS")
            .unwrap_or_else(|_| "900".to_string())
            .parse()?;
        let sweep_interval_seconds = env::var("TOKEN_SWEEP_INTERVAL_SECONDS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()?;

        let refresh_ttl_seconds = env::var("CATALOG_REFRESH_TTL_SECONDS")
            .unwrap_or_else(|_| "600".to_string())
            .parse()?;

        Ok(Self {
            common: service_core::config::Config {
                port,
                log_level,
            },
            service_name: "entitlement-service".to_string(),
            otlp_endpoint: env::var("GATEWAY_OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: db_url,
                max_connections,
                min_connections,
            },
            billing: BillingProviderConfig {
                api_base_url,
                secret_key: Secret::new(secret_key),
                webhook_secret: Secret::new(webhook_secret),
                timeout_seconds,
                checkout_success_url,
                checkout_cancel_url,
            },
            token: TokenConfig {
                ttl_seconds,
                sweep_interval_seconds,
            },
            catalog: CatalogConfig {
                refresh_ttl_seconds,
            },
        })
    }
}
