mod common;

use common::TestApp;
use uuid::Uuid;

#[tokio::test]
async fn launch_requires_identity_headers() {
    let app = TestApp::spawn().await;
    app.seed_module("sleep-coach").await;

    let response = app
        .client
        .post(format!("{}/modules/sleep-coach/launch", app.address))
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn launch_without_subscription_is_forbidden() {
    let app = TestApp::spawn().await;
    app.seed_module("sleep-coach").await;

    let response = app.launch(Uuid::new_v4(), "sleep-coach").await;

    assert_eq!(response.status().as_u16(), 403);
    let body: serde_json::Value = response.json().await.expect("Invalid JSON");
    assert!(
        body["error"]
            .as_str()
            .unwrap_or_default()
            .contains("NotEntitled"),
        "unexpected error body: {}",
        body
    );
}

#[tokio::test]
async fn launch_for_disabled_module_is_404() {
    let app = TestApp::spawn().await;
    app.seed_module_with("sleep-coach", false).await;

    let response = app.launch(Uuid::new_v4(), "sleep-coach").await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn end_to_end_launch_and_single_use_verification() {
    let app = TestApp::spawn().await;
    let module = app.seed_module("sleep-coach").await;
    let user_id = Uuid::new_v4();

    // No subscription yet: launch is refused.
    let refused = app.launch(user_id, "sleep-coach").await;
    assert_eq!(refused.status().as_u16(), 403);

    // Checkout completion arrives through reconciliation.
    app.activate_subscription(user_id, &module).await;

    // Launch now succeeds and returns a token bound into the launch URL.
    let launched = app.launch(user_id, "sleep-coach").await;
    assert_eq!(launched.status().as_u16(), 200);
    let body: serde_json::Value = launched.json().await.expect("Invalid JSON");
    let token = body["token"].as_str().expect("token missing").to_string();
    assert_eq!(token.len(), 64);
    let launch_url = body["launch_url"].as_str().expect("launch_url missing");
    assert!(launch_url.starts_with(&module.launch_url));
    assert!(launch_url.contains(&format!("launch_token={}", token)));

    // The module exchanges the token for claims.
    let verified = app.verify(&token, "sleep-coach").await;
    assert_eq!(verified.status().as_u16(), 200);
    let claims: serde_json::Value = verified.json().await.expect("Invalid JSON");
    assert_eq!(claims["user_id"], user_id.to_string());
    assert_eq!(claims["module_id"], module.module_id.to_string());
    assert_eq!(claims["user_display_name"], "Test User");

    // The token was consumed: replay fails.
    let replayed = app.verify(&token, "sleep-coach").await;
    assert_eq!(replayed.status().as_u16(), 401);
}

#[tokio::test]
async fn token_issued_for_one_module_is_rejected_by_another() {
    let app = TestApp::spawn().await;
    let sleep = app.seed_module("sleep-coach").await;
    app.seed_module("nutrition").await;
    let user_id = Uuid::new_v4();
    app.activate_subscription(user_id, &sleep).await;

    let launched = app.launch(user_id, "sleep-coach").await;
    let body: serde_json::Value = launched.json().await.expect("Invalid JSON");
    let token = body["token"].as_str().expect("token missing");

    let response = app.verify(token, "nutrition").await;
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn garbage_token_is_rejected() {
    let app = TestApp::spawn().await;
    app.seed_module("sleep-coach").await;

    let response = app.verify("0".repeat(64).as_str(), "sleep-coach").await;
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let app = TestApp::spawn_with_token_ttl(1).await;
    let module = app.seed_module("sleep-coach").await;
    let user_id = Uuid::new_v4();
    app.activate_subscription(user_id, &module).await;

    let launched = app.launch(user_id, "sleep-coach").await;
    let body: serde_json::Value = launched.json().await.expect("Invalid JSON");
    let token = body["token"].as_str().expect("token missing");

    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;

    let response = app.verify(token, "sleep-coach").await;
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn verification_failures_are_indistinguishable_to_the_caller() {
    let app = TestApp::spawn_with_token_ttl(1).await;
    let sleep = app.seed_module("sleep-coach").await;
    app.seed_module("nutrition").await;
    let user_id = Uuid::new_v4();
    app.activate_subscription(user_id, &sleep).await;

    // Hash miss
    let miss = app.verify("f".repeat(64).as_str(), "sleep-coach").await;
    // Cross-module replay
    let launched = app.launch(user_id, "sleep-coach").await;
    let body: serde_json::Value = launched.json().await.expect("Invalid JSON");
    let mismatch = app
        .verify(body["token"].as_str().unwrap(), "nutrition")
        .await;
    // Expired
    let launched = app.launch(user_id, "sleep-coach").await;
    let body: serde_json::Value = launched.json().await.expect("Invalid JSON");
    let token = body["token"].as_str().unwrap().to_string();
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    let expired = app.verify(&token, "sleep-coach").await;

    let mut bodies = Vec::new();
    for response in [miss, mismatch, expired] {
        assert_eq!(response.status().as_u16(), 401);
        bodies.push(response.text().await.expect("Missing body"));
    }
    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[1], bodies[2]);
}
