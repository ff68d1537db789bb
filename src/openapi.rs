use utoipa::OpenApi;

use crate::{
    entities::order::{OrderStatus, PaymentStatus},
    errors::ErrorResponse,
    handlers,
    services::checkout::{CartLineInput, CheckoutRequest, PaymentSession},
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Madrush Checkout API",
        version = "0.2.0",
        description = r#"
Checkout-to-order reconciliation engine.

Opens payment sessions for customer carts, ingests gateway webhooks and
turns confirmed payments into orders exactly once. Checkout initiation is
idempotent via a client-supplied key; webhook deliveries are deduplicated
through a persistent event ledger.
"#
    ),
    paths(
        handlers::checkout::initiate_checkout,
        handlers::payments::payment_webhook,
        handlers::payments::verify_payment,
        handlers::orders::get_order,
    ),
    components(schemas(
        CheckoutRequest,
        CartLineInput,
        PaymentSession,
        handlers::checkout::CheckoutResponse,
        handlers::payments::VerifyResponse,
        handlers::orders::OrderResponse,
        handlers::orders::OrderItemResponse,
        OrderStatus,
        PaymentStatus,
        ErrorResponse,
    )),
    tags(
        (name = "Checkout", description = "Idempotent checkout initiation"),
        (name = "Payments", description = "Webhook intake and synchronous verification"),
        (name = "Orders", description = "Order lookup")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_builds() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/checkout"));
        assert!(doc.paths.paths.contains_key("/api/v1/payments/webhook"));
    }
}
