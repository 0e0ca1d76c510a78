//! Catalog price cache.
//!
//! Price metadata is read from the billing provider, cached per module slug
//! with a TTL, and explicitly invalidated when the provider reports catalog
//! changes. The authorization path (issue/verify) never reads this cache;
//! only catalog display does.

use dashmap::DashMap;
use serde::Serialize;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::services::billing::{BillingClient, Price};

/// A price as surfaced to the catalog UI.
#[derive(Debug, Clone, Serialize)]
pub struct PricePoint {
    pub price_ref: String,
    /// Smallest currency unit.
    pub unit_amount: i64,
    pub currency: String,
    pub interval: Option<String>,
}

#[derive(Clone)]
struct CacheEntry {
    prices: Vec<PricePoint>,
}

pub struct CatalogCache {
    billing: BillingClient,
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
    last_refresh: Mutex<Option<Instant>>,
}

impl CatalogCache {
    pub fn new(billing: BillingClient, ttl: Duration) -> Self {
        Self {
            billing,
            ttl,
            entries: DashMap::new(),
            last_refresh: Mutex::new(None),
        }
    }

    fn is_fresh(&self) -> bool {
        let last_refresh = self
            .last_refresh
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        matches!(*last_refresh, Some(at) if at.elapsed() < self.ttl)
    }

    /// Prices for a module slug, refreshing the cache when stale. A failed
    /// refresh serves the previous snapshot rather than erroring, as long as
    /// one exists.
    pub async fn prices_for(&self, slug: &str) -> Result<Vec<PricePoint>, AppError> {
        if self.is_fresh() {
            return Ok(self
                .entries
                .get(slug)
                .map(|entry| entry.prices.clone())
                .unwrap_or_default());
        }

        match self.refresh().await {
            Ok(()) => Ok(self
                .entries
                .get(slug)
                .map(|entry| entry.prices.clone())
                .unwrap_or_default()),
            Err(e) => match self.entries.get(slug) {
                Some(stale) => {
                    tracing::warn!(error = %e, slug = %slug, "Price refresh failed, serving stale catalog entry");
                    Ok(stale.prices.clone())
                }
                None => Err(e),
            },
        }
    }

    async fn refresh(&self) -> Result<(), AppError> {
        let prices = self.billing.list_prices().await?;
        let grouped = group_prices_by_slug(prices);

        self.entries.clear();
        for (slug, prices) in grouped {
            self.entries.insert(slug, CacheEntry { prices });
        }

        let mut last_refresh = self
            .last_refresh
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *last_refresh = Some(Instant::now());
        tracing::debug!("Catalog price cache refreshed");
        Ok(())
    }

    /// Drop the entire cache; the next read refetches from the provider.
    pub fn invalidate_all(&self) {
        self.entries.clear();
        let mut last_refresh = self
            .last_refresh
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *last_refresh = None;
        tracing::info!("Catalog price cache invalidated");
    }
}

fn group_prices_by_slug(prices: Vec<Price>) -> HashMap<String, Vec<PricePoint>> {
    let mut grouped: HashMap<String, Vec<PricePoint>> = HashMap::new();
    for price in prices {
        let Some(slug) = price.module_slug else {
            // Prices not tagged with a module slug belong to other products.
            continue;
        };
        grouped.entry(slug).or_default().push(PricePoint {
            price_ref: price.id,
            unit_amount: price.unit_amount,
            currency: price.currency,
            interval: price.recurring_interval,
        });
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(id: &str, slug: Option<&str>) -> Price {
        Price {
            id: id.to_string(),
            unit_amount: 999,
            currency: "usd".to_string(),
            recurring_interval: Some("month".to_string()),
            module_slug: slug.map(|s| s.to_string()),
        }
    }

    #[test]
    fn groups_prices_by_module_slug() {
        let grouped = group_prices_by_slug(vec![
            price("price_a", Some("sleep-coach")),
            price("price_b", Some("sleep-coach")),
            price("price_c", Some("nutrition")),
        ]);

        assert_eq!(grouped["sleep-coach"].len(), 2);
        assert_eq!(grouped["nutrition"].len(), 1);
        assert_eq!(grouped["nutrition"][0].price_ref, "price_c");
    }

    #[test]
    fn untagged_prices_are_skipped() {
        let grouped = group_prices_by_slug(vec![price("price_x", None)]);
        assert!(grouped.is_empty());
    }
}
