//! Payment endpoints: validation, provider discovery and webhooks.

#![allow(clippy::unwrap_used)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};

use meridian_core::{OrderStatus, PaymentStatus, ProviderKind};
use meridian_integration_tests::TestApp;
use meridian_storefront::payments::WebhookUpdate;

fn webhook_request(provider: &str, signature: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(format!("/api/payment/webhook/{provider}"))
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-test-signature", signature)
        .body(Body::from(r#"{"type":"payment.updated"}"#))
        .unwrap()
}

fn error_fields(body: &Value) -> Vec<&str> {
    body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn test_process_validates_body() {
    let app = TestApp::new();

    let res = app.post("/api/payment/process", json!({})).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["success"], false);
    assert_eq!(
        error_fields(&res.body),
        ["paymentIntentId", "paymentMethodId", "provider", "type"]
    );

    let res = app
        .post(
            "/api/payment/process",
            json!({
                "paymentIntentId": "square_intent_9",
                "paymentMethodId": "cnon:card-nonce-ok",
                "provider": "paypal",
                "type": "bitcoin",
            }),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(error_fields(&res.body), ["provider", "type"]);

    let res = app
        .post(
            "/api/payment/process",
            json!({
                "paymentIntentId": "square_intent_9",
                "paymentMethodId": "cnon:card-nonce-ok",
                "provider": "square",
                "type": "card",
                "billingInfo": {"name": "Sam Reyes", "country": "USA"},
            }),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(error_fields(&res.body), ["billingInfo.country"]);
    assert!(app.square.calls().is_empty());
}

#[tokio::test]
async fn test_process_reports_declines_as_payment_result() {
    let app = TestApp::new();
    app.square.fail_next("Card declined");

    let res = app
        .post(
            "/api/payment/process",
            json!({
                "paymentIntentId": "square_intent_9",
                "paymentMethodId": "cnon:card-nonce-declined",
                "provider": "square",
                "type": "card",
            }),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["success"], false);
    assert!(res.body["error"].as_str().unwrap().contains("Card declined"));
}

#[tokio::test]
async fn test_verify_unconfigured_provider() {
    let app = TestApp::new();

    let res = app
        .post(
            "/api/payment/verify",
            json!({"paymentIntentId": "pi_123", "provider": "stripe"}),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["success"], false);

    let res = app
        .post(
            "/api/payment/verify",
            json!({"paymentIntentId": "pi_123", "provider": "paypal"}),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(app.square.calls().is_empty());
}

#[tokio::test]
async fn test_methods_and_providers() {
    let app = TestApp::new();

    let res = app.get("/api/payment/providers").await;
    assert_eq!(res.status, StatusCode::OK);
    let providers = res.body.as_array().unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0]["kind"], "square");
    assert_eq!(providers[0]["isDefault"], true);

    let res = app.get("/api/payment/methods").await;
    assert_eq!(res.status, StatusCode::OK);
    let methods = res.body.as_array().unwrap();
    assert!(!methods.is_empty());
    assert!(methods.iter().all(|m| m["provider"] == "square"));
}

#[tokio::test]
async fn test_create_intent_requires_shipping_option() {
    let app = TestApp::new();
    let product = app.seed_product("trail-mug", "18.00", 5).await;
    app.post("/api/cart/items", json!({"productId": product.id}))
        .await;
    let res = app.post("/api/checkout", json!({})).await;
    let session_id = res.body["id"].as_str().unwrap().to_string();

    let res = app
        .post("/api/payment/create-intent", json!({"sessionId": session_id}))
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(app.square.calls().is_empty());
}

#[tokio::test]
async fn test_create_intent_charges_checkout_total() {
    let app = TestApp::new();
    let product = app.seed_product("canvas-tote", "32.00", 5).await;
    let session_id = app.checkout_to_payment(&product, 3).await;

    let res = app
        .post("/api/payment/create-intent", json!({"sessionId": session_id}))
        .await;
    assert_eq!(res.status, StatusCode::OK, "{:?}", res.body);
    assert_eq!(res.body["provider"], "square");
    // 96.00 clears the free standard shipping threshold
    assert_eq!(res.body["amount"]["amount"], "96.00");

    let res = app.get(&format!("/api/checkout/{session_id}")).await;
    assert_eq!(res.body["step"], "review");
    assert_eq!(res.body["paymentIntentId"], "square_intent_1");
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let app = TestApp::new();

    let res = app.send(webhook_request("square", "forged")).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let res = app.send(webhook_request("paypal", "valid")).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_without_matching_order_is_acknowledged() {
    let app = TestApp::new();
    app.square.set_webhook(WebhookUpdate {
        provider: ProviderKind::Square,
        reference: "unknown-order".to_string(),
        payment_id: None,
        status: PaymentStatus::Paid,
        event_type: "payment.updated".to_string(),
    });

    let res = app.send(webhook_request("square", "valid")).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["received"], true);
    assert!(res.body["orderId"].is_null());
}

#[tokio::test]
async fn test_webhook_refund_updates_order() {
    let app = TestApp::new();
    let product = app.seed_product("trail-mug", "18.00", 5).await;
    let session_id = app.checkout_to_payment(&product, 1).await;
    let res = app
        .post("/api/payment/create-intent", json!({"sessionId": session_id}))
        .await;
    let intent = res.body["paymentIntentId"].as_str().unwrap().to_string();
    let res = app
        .post(
            "/api/checkout/place-order",
            json!({"sessionId": session_id, "paymentIntentId": intent}),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{:?}", res.body);
    let order_id = res.body["order"]["id"].clone();

    app.square.set_webhook(WebhookUpdate {
        provider: ProviderKind::Square,
        reference: intent,
        payment_id: None,
        status: PaymentStatus::Refunded,
        event_type: "refund.updated".to_string(),
    });

    // Webhooks carry no session cookie.
    let vendor = app.other_visitor();
    let res = vendor.send(webhook_request("square", "valid")).await;
    assert_eq!(res.status, StatusCode::OK, "{:?}", res.body);
    assert_eq!(res.body["orderId"], order_id);

    let order = &app.db.orders()[0];
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    assert_eq!(order.status, OrderStatus::Refunded);
}
