mod common;

use common::{checkout_request, seed_variant, TestApp, TEST_SECRET};
use madrush_api::{
    entities::{order, pending_checkout, webhook_event},
    errors::ServiceError,
    gateway::signature::sign_payload,
    services::{
        checkout::CheckoutOutcome,
        reconciliation::ReconcileOutcome,
        webhook::WebhookOutcome,
    },
};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

async fn open_session(app: &TestApp, variant_id: Uuid, quantity: i32, key: &str) -> String {
    match app
        .state
        .checkout_service
        .initiate(checkout_request(variant_id, quantity, key))
        .await
        .expect("initiate")
    {
        CheckoutOutcome::PaymentPending(session) => session.payment_reference,
        other => panic!("expected payment session, got {other:?}"),
    }
}

fn charge_success_body(event_id: &str, reference: &str, amount_minor: i64) -> Vec<u8> {
    serde_json::json!({
        "event": "charge.success",
        "id": event_id,
        "data": {
            "reference": reference,
            "amount": amount_minor,
            "currency": "NGN",
            "channel": "card",
            "fees": 150,
        }
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn signed_charge_success_creates_the_order() {
    let app = TestApp::new().await;
    let variant = seed_variant(&app.db, "SKU-200", dec!(40.00), 5).await;
    let reference = open_session(&app, variant.id, 1, "hook-key-0001").await;

    let body = charge_success_body("evt_0001", &reference, 4000);
    let signature = sign_payload(TEST_SECRET, &body);

    let outcome = app
        .state
        .webhook_service
        .process(&body, Some(&signature))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        WebhookOutcome::Reconciled(ReconcileOutcome::Completed(_))
    ));

    assert_eq!(order::Entity::find().count(&*app.db).await.unwrap(), 1);

    let ledger = webhook_event::Entity::find()
        .filter(webhook_event::Column::EventId.eq("evt_0001"))
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ledger.status, webhook_event::WebhookEventStatus::Processed);
    assert_eq!(ledger.payment_reference.as_deref(), Some(reference.as_str()));
}

#[tokio::test]
async fn redelivered_event_id_is_deduplicated_with_an_audit_row() {
    let app = TestApp::new().await;
    let variant = seed_variant(&app.db, "SKU-201", dec!(25.00), 5).await;
    let reference = open_session(&app, variant.id, 1, "hook-key-0002").await;

    let body = charge_success_body("evt_0002", &reference, 2500);
    let signature = sign_payload(TEST_SECRET, &body);

    let first = app
        .state
        .webhook_service
        .process(&body, Some(&signature))
        .await
        .unwrap();
    assert!(matches!(first, WebhookOutcome::Reconciled(_)));

    let second = app
        .state
        .webhook_service
        .process(&body, Some(&signature))
        .await
        .unwrap();
    assert!(matches!(second, WebhookOutcome::Duplicate));

    // One order, two ledger rows: the original and a duplicate audit entry
    assert_eq!(order::Entity::find().count(&*app.db).await.unwrap(), 1);
    let rows = webhook_event::Entity::find()
        .filter(webhook_event::Column::PaymentReference.eq(&reference))
        .all(&*app.db)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    let duplicate = rows
        .iter()
        .find(|r| r.status == webhook_event::WebhookEventStatus::Duplicate)
        .expect("duplicate audit row");
    assert!(duplicate.event_id.starts_with("evt_0002_duplicate_"));
}

#[tokio::test]
async fn missing_or_invalid_signature_is_rejected_before_parsing() {
    let app = TestApp::new().await;
    let body = charge_success_body("evt_0003", "pay_whatever", 1000);

    let err = app
        .state
        .webhook_service
        .process(&body, None)
        .await
        .expect_err("missing signature");
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    let err = app
        .state
        .webhook_service
        .process(&body, Some("deadbeef"))
        .await
        .expect_err("forged signature");
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    // Nothing reached the ledger
    assert_eq!(
        webhook_event::Entity::find().count(&*app.db).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn charge_failed_marks_checkout_and_ledgers_the_event() {
    let app = TestApp::new().await;
    let variant = seed_variant(&app.db, "SKU-202", dec!(60.00), 5).await;
    let reference = open_session(&app, variant.id, 1, "hook-key-0003").await;

    let body = serde_json::json!({
        "event": "charge.failed",
        "id": "evt_0004",
        "data": { "reference": reference }
    })
    .to_string()
    .into_bytes();
    let signature = sign_payload(TEST_SECRET, &body);

    let outcome = app
        .state
        .webhook_service
        .process(&body, Some(&signature))
        .await
        .unwrap();
    assert!(matches!(outcome, WebhookOutcome::PaymentFailed));

    let pending = pending_checkout::Entity::find()
        .filter(pending_checkout::Column::PaymentReference.eq(&reference))
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.status, pending_checkout::CheckoutStatus::Failed);
}

#[tokio::test]
async fn unhandled_event_types_are_acknowledged_and_ledgered() {
    let app = TestApp::new().await;

    let body = serde_json::json!({
        "event": "transfer.success",
        "id": "evt_0005",
        "data": { "reference": "trf_001" }
    })
    .to_string()
    .into_bytes();
    let signature = sign_payload(TEST_SECRET, &body);

    let outcome = app
        .state
        .webhook_service
        .process(&body, Some(&signature))
        .await
        .unwrap();
    match outcome {
        WebhookOutcome::Unhandled { event_type } => assert_eq!(event_type, "transfer.success"),
        other => panic!("expected unhandled, got {other:?}"),
    }

    let ledger = webhook_event::Entity::find()
        .filter(webhook_event::Column::EventId.eq("evt_0005"))
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ledger.status, webhook_event::WebhookEventStatus::Unhandled);
}

#[tokio::test]
async fn malformed_payload_with_valid_signature_is_a_bad_request() {
    let app = TestApp::new().await;
    let body = b"not json at all".to_vec();
    let signature = sign_payload(TEST_SECRET, &body);

    let err = app
        .state
        .webhook_service
        .process(&body, Some(&signature))
        .await
        .expect_err("malformed body");
    assert!(matches!(err, ServiceError::BadRequest(_)));
}

#[tokio::test]
async fn events_without_ids_are_not_deduplicated_against_each_other() {
    let app = TestApp::new().await;
    let variant = seed_variant(&app.db, "SKU-203", dec!(10.00), 5).await;
    let reference = open_session(&app, variant.id, 1, "hook-key-0004").await;

    let body = serde_json::json!({
        "event": "charge.success",
        "data": {
            "reference": reference,
            "amount": 1000,
            "currency": "NGN",
        }
    })
    .to_string()
    .into_bytes();
    let signature = sign_payload(TEST_SECRET, &body);

    let first = app
        .state
        .webhook_service
        .process(&body, Some(&signature))
        .await
        .unwrap();
    assert!(matches!(
        first,
        WebhookOutcome::Reconciled(ReconcileOutcome::Completed(_))
    ));

    // Second delivery gets a fresh fallback id; the order guard, not the
    // ledger, is what keeps it inert.
    let second = app
        .state
        .webhook_service
        .process(&body, Some(&signature))
        .await
        .unwrap();
    assert!(matches!(
        second,
        WebhookOutcome::Reconciled(ReconcileOutcome::AlreadyProcessed { .. })
    ));
    assert_eq!(order::Entity::find().count(&*app.db).await.unwrap(), 1);
}
