//! Application startup and lifecycle management.

use crate::config::GatewayConfig;
use crate::handlers;
use crate::services::{
    init_metrics, BillingClient, CatalogCache, Database, GatewayStore, MemoryStore, TokenService,
};
use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use chrono::Utc;
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub store: Arc<dyn GatewayStore>,
    pub billing: BillingClient,
    pub tokens: TokenService,
    pub catalog: Arc<CatalogCache>,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: GatewayConfig) -> Result<Self, AppError> {
        init_metrics();

        let store: Arc<dyn GatewayStore> = match &config.database.url {
            Some(url) => {
                let db = Database::new(
                    url.expose_secret(),
                    config.database.max_connections,
                    config.database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;
                db.run_migrations().await?;
                Arc::new(db)
            }
            None => {
                tracing::warn!(
                    "GATEWAY_DATABASE_URL not set - using in-memory store, state will not survive a restart"
                );
                Arc::new(MemoryStore::new())
            }
        };

        let billing = BillingClient::new(config.billing.clone());
        if billing.is_configured() {
            tracing::info!("Billing provider client initialized");
        } else {
            tracing::warn!(
                "Billing provider credentials not configured - checkout and portal will be unavailable"
            );
        }

        let catalog = Arc::new(CatalogCache::new(
            billing.clone(),
            Duration::from_secs(config.catalog.refresh_ttl_seconds),
        ));
        let tokens = TokenService::new(config.token.ttl_seconds);

        let state = AppState {
            config: config.clone(),
            store,
            billing,
            tokens,
            catalog,
        };

        // Port 0 = random port for testing
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Entitlement service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the application state (used by tests to seed the store).
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        // Best-effort sweep of expired token rows; expiry is enforced at
        // verification time regardless.
        let sweep_store = self.state.store.clone();
        let sweep_interval =
            Duration::from_secs(self.state.config.token.sweep_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                match sweep_store.sweep_expired_tokens(Utc::now()).await {
                    Ok(0) => {}
                    Ok(swept) => tracing::info!(swept = swept, "Expired launch tokens swept"),
                    Err(e) => tracing::warn!(error = %e, "Token sweep failed"),
                }
            }
        });

        let router = build_router(self.state);
        axum::serve(self.listener, router).await
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/modules", get(handlers::modules::list_modules))
        .route("/modules/verify", post(handlers::modules::verify_token))
        .route(
            "/modules/:slug/checkout",
            post(handlers::modules::create_checkout),
        )
        .route(
            "/modules/:slug/portal",
            post(handlers::modules::create_portal),
        )
        .route(
            "/modules/:slug/launch",
            post(handlers::modules::launch_module),
        )
        .route("/webhooks/billing", post(handlers::webhooks::billing_webhook))
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .with_state(state)
}
