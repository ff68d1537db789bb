pub mod checkout;
pub mod orders;
pub mod payments;

use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};

/// All `/api/v1` routes.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(checkout::initiate_checkout))
        .route("/payments/webhook", post(payments::payment_webhook))
        .route("/payments/verify/:reference", get(payments::verify_payment))
        .route("/orders/:id", get(orders::get_order))
}
