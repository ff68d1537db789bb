use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    errors::ServiceError,
    services::checkout::{CheckoutOutcome, CheckoutRequest, PaymentSession},
    AppState,
};

#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum CheckoutResponse {
    /// A payment session is open; redirect the customer to `authorization_url`
    PendingPayment {
        status: String,
        payment: PaymentSession,
    },
    /// This idempotency key already produced an order
    AlreadyProcessed {
        status: String,
        order_number: String,
        payment_reference: String,
    },
}

/// POST /api/v1/checkout
///
/// Idempotent: retries with the same `idempotency_key` replay the original
/// result instead of opening a second payment session.
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Payment session open or order already exists", body = CheckoutResponse),
        (status = 400, description = "Invalid cart or customer details", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent checkout conflict", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn initiate_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state.checkout_service.initiate(request).await?;

    let response = match outcome {
        CheckoutOutcome::PaymentPending(payment) => CheckoutResponse::PendingPayment {
            status: "pending_payment".to_string(),
            payment,
        },
        CheckoutOutcome::AlreadyCompleted(order) => CheckoutResponse::AlreadyProcessed {
            status: "already_processed".to_string(),
            order_number: order.order_number,
            payment_reference: order.payment_reference,
        },
    };

    Ok((StatusCode::OK, Json(response)))
}
