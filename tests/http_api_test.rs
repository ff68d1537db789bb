mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{seed_variant, TestApp, TEST_SECRET};
use http_body_util::BodyExt;
use madrush_api::{app_router, gateway::signature::sign_payload};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn response_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn checkout_body(variant_id: uuid::Uuid, key: &str) -> String {
    json!({
        "cart": [{ "variant_id": variant_id, "quantity": 2 }],
        "customer_name": "Ada Obi",
        "customer_email": "ada@example.test",
        "customer_phone": "+2348012345678",
        "shipping_address": "12 Marina Road, Lagos",
        "idempotency_key": key,
    })
    .to_string()
}

#[tokio::test]
async fn full_checkout_webhook_and_lookup_flow_over_http() {
    let app = TestApp::new().await;
    let variant = seed_variant(&app.db, "SKU-600", dec!(120.00), 10).await;
    let router = app_router(app.state.clone());

    // Health probe
    let response = router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Initiate checkout
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/checkout")
                .header("content-type", "application/json")
                .body(Body::from(checkout_body(variant.id, "http-key-0001")))
                .unwrap(),
        )
        .await
        .unwrap();
    let (status, body) = response_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending_payment");
    let reference = body["payment"]["payment_reference"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(body["payment"]["authorization_url"].as_str().unwrap().len() > 0);

    // Replay returns the same session
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/checkout")
                .header("content-type", "application/json")
                .body(Body::from(checkout_body(variant.id, "http-key-0001")))
                .unwrap(),
        )
        .await
        .unwrap();
    let (status, body) = response_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payment"]["payment_reference"], reference.as_str());

    // Signed webhook confirms the payment
    let webhook_body = json!({
        "event": "charge.success",
        "id": "evt_http_0001",
        "data": {
            "reference": reference,
            "amount": 24000,
            "currency": "NGN",
            "channel": "card",
        }
    })
    .to_string();
    let signature = sign_payload(TEST_SECRET, webhook_body.as_bytes());
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/payments/webhook")
                .header("content-type", "application/json")
                .header("x-paystack-signature", signature)
                .body(Body::from(webhook_body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    let (status, body) = response_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    // Redelivery acknowledges as duplicate, still 200
    let signature = sign_payload(TEST_SECRET, webhook_body.as_bytes());
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/payments/webhook")
                .header("content-type", "application/json")
                .header("x-paystack-signature", signature)
                .body(Body::from(webhook_body))
                .unwrap(),
        )
        .await
        .unwrap();
    let (status, body) = response_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");

    // Verify answers paid from stored state
    let response = router
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/payments/verify/{reference}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let (status, body) = response_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paid");
    let order_number = body["order_number"].as_str().unwrap().to_string();

    // Order lookup by order number
    let response = router
        .clone()
        .oneshot(
            Request::get(format!("/api/v1/orders/{order_number}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let (status, body) = response_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payment_reference"], reference.as_str());
    assert_eq!(body["status"], "confirmed");
    assert_eq!(body["payment_status"], "paid");
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;
    let router = app_router(app.state.clone());

    let response = router
        .oneshot(
            Request::get("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let (status, body) = response_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v1/checkout"].is_object());
    assert!(body["paths"]["/api/v1/payments/webhook"].is_object());
    assert!(body["components"]["schemas"]["CheckoutRequest"].is_object());
}

#[tokio::test]
async fn webhook_without_signature_is_401_and_bad_json_is_400() {
    let app = TestApp::new().await;
    let router = app_router(app.state.clone());

    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/payments/webhook")
                .body(Body::from(r#"{"event":"charge.success"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let garbage = b"{{{ not json";
    let signature = sign_payload(TEST_SECRET, garbage);
    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/payments/webhook")
                .header("x-paystack-signature", signature)
                .body(Body::from(garbage.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_order_and_reference_return_404() {
    let app = TestApp::new().await;
    let router = app_router(app.state.clone());

    let response = router
        .clone()
        .oneshot(
            Request::get("/api/v1/orders/ORD-19700101000000-DEADBEEF")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router
        .clone()
        .oneshot(
            Request::get("/api/v1/payments/verify/pay_never_issued")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_checkout_payload_is_rejected_with_400() {
    let app = TestApp::new().await;
    let variant = seed_variant(&app.db, "SKU-601", dec!(10.00), 5).await;
    let router = app_router(app.state.clone());

    let body = json!({
        "cart": [{ "variant_id": variant.id, "quantity": 1 }],
        "customer_name": "A",
        "customer_email": "not-an-email",
        "customer_phone": "1",
        "shipping_address": "x",
        "idempotency_key": "short",
    })
    .to_string();

    let response = router
        .oneshot(
            Request::post("/api/v1/checkout")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
