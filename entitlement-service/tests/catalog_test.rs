mod common;

use common::TestApp;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

fn price_list_body() -> serde_json::Value {
    serde_json::json!({
        "data": [
            {
                "id": "price_monthly",
                "unit_amount": 999,
                "currency": "usd",
                "recurring_interval": "month",
                "module_slug": "sleep-coach"
            },
            {
                "id": "price_yearly",
                "unit_amount": 9900,
                "currency": "usd",
                "recurring_interval": "year",
                "module_slug": "sleep-coach"
            },
            {
                "id": "price_other_product",
                "unit_amount": 500,
                "currency": "usd",
                "recurring_interval": "month"
            }
        ]
    })
}

async fn mock_price_listing(app: &TestApp, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/prices"))
        .and(query_param("active", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(price_list_body()))
        .expect(expected_calls)
        .mount(&app.billing_server)
        .await;
}

#[tokio::test]
async fn catalog_lists_modules_with_cached_prices() {
    let app = TestApp::spawn().await;
    app.seed_module("sleep-coach").await;
    // One provider call serves both catalog requests.
    mock_price_listing(&app, 1).await;

    let first = app
        .client
        .get(format!("{}/modules", app.address))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(first.status().as_u16(), 200);
    let entries: serde_json::Value = first.json().await.expect("Invalid JSON");
    assert_eq!(entries.as_array().unwrap().len(), 1);
    let entry = &entries[0];
    assert_eq!(entry["slug"], "sleep-coach");
    let prices = entry["prices"].as_array().unwrap();
    assert_eq!(prices.len(), 2);
    assert_eq!(prices[0]["currency"], "usd");

    let second = app
        .client
        .get(format!("{}/modules", app.address))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(second.status().as_u16(), 200);
}

#[tokio::test]
async fn disabled_modules_are_hidden_from_the_catalog() {
    let app = TestApp::spawn().await;
    app.seed_module("sleep-coach").await;
    app.seed_module_with("legacy-module", false).await;
    mock_price_listing(&app, 1).await;

    let response = app
        .client
        .get(format!("{}/modules", app.address))
        .send()
        .await
        .expect("Request failed");

    let entries: serde_json::Value = response.json().await.expect("Invalid JSON");
    let slugs: Vec<&str> = entries
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["slug"].as_str().unwrap())
        .collect();
    assert_eq!(slugs, vec!["sleep-coach"]);
}

#[tokio::test]
async fn price_events_invalidate_the_cache() {
    let app = TestApp::spawn().await;
    app.seed_module("sleep-coach").await;
    // First catalog read populates the cache, the webhook drops it, the next
    // read refetches: two provider calls in total.
    mock_price_listing(&app, 2).await;

    let first = app
        .client
        .get(format!("{}/modules", app.address))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(first.status().as_u16(), 200);

    let body = serde_json::json!({
        "id": "evt_price",
        "type": "price.updated",
        "created": 1754000000,
        "data": { "object": { "id": "price_monthly" } }
    })
    .to_string();
    assert_eq!(app.post_webhook(&body).await.status().as_u16(), 200);

    let second = app
        .client
        .get(format!("{}/modules", app.address))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(second.status().as_u16(), 200);
}

#[tokio::test]
async fn provider_outage_degrades_catalog_to_unpriced_entries() {
    let app = TestApp::spawn().await;
    app.seed_module("sleep-coach").await;
    // No price mock mounted: the provider is effectively down.

    let response = app
        .client
        .get(format!("{}/modules", app.address))
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status().as_u16(), 200);
    let entries: serde_json::Value = response.json().await.expect("Invalid JSON");
    assert_eq!(entries[0]["slug"], "sleep-coach");
    assert!(entries[0]["prices"].as_array().unwrap().is_empty());
}
