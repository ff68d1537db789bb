use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::{
    errors::ServiceError,
    services::{
        reconciliation::{ReconcileOutcome, VerifyOutcome},
        webhook::WebhookOutcome,
    },
    AppState,
};

const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// POST /api/v1/payments/webhook
///
/// Always answers 200 for inert outcomes (duplicates, unknown references,
/// amount mismatches); the gateway only needs to know whether to redeliver.
/// Signature failures get 401 and infrastructure failures get 5xx.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook acknowledged"),
        (status = 400, description = "Malformed payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state.webhook_service.process(&body, signature).await?;

    let status = match outcome {
        WebhookOutcome::Duplicate => "duplicate",
        WebhookOutcome::PaymentFailed => "payment_failed",
        WebhookOutcome::Unhandled { .. } => "received",
        WebhookOutcome::Reconciled(reconcile) => match reconcile {
            ReconcileOutcome::Completed(_) => "success",
            ReconcileOutcome::AlreadyProcessed { .. } => "already_processed",
            ReconcileOutcome::Expired => "expired",
            ReconcileOutcome::NotFound => "not_found",
            ReconcileOutcome::CurrencyMismatch { .. } => "currency_mismatch",
            ReconcileOutcome::AmountMismatch { .. } => "amount_mismatch",
            ReconcileOutcome::InsufficientStock { .. } => "insufficient_stock",
        },
    };

    Ok((StatusCode::OK, Json(json!({ "status": status }))))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
}

/// GET /api/v1/payments/verify/{reference}
///
/// Synchronous fallback for clients returning from the gateway redirect
/// before the webhook lands. Idempotent against the webhook path.
#[utoipa::path(
    get,
    path = "/api/v1/payments/verify/{reference}",
    params(("reference" = String, Path, description = "Payment reference")),
    responses(
        (status = 200, description = "Payment status", body = VerifyResponse),
        (status = 404, description = "Unknown payment reference", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = match state.reconciliation_service.verify(&reference).await? {
        VerifyOutcome::Paid { order_number, .. } => VerifyResponse {
            status: "paid".to_string(),
            order_number: Some(order_number),
        },
        VerifyOutcome::Pending => VerifyResponse {
            status: "pending".to_string(),
            order_number: None,
        },
        VerifyOutcome::Failed => VerifyResponse {
            status: "failed".to_string(),
            order_number: None,
        },
        VerifyOutcome::Expired => VerifyResponse {
            status: "expired".to_string(),
            order_number: None,
        },
        VerifyOutcome::NotFound => {
            return Err(ServiceError::NotFound(format!(
                "payment reference {reference} not found"
            )))
        }
    };

    Ok((StatusCode::OK, Json(response)))
}
