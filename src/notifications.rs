//! Outbound notification dispatch.
//!
//! Delivery transport (email/SMS provider) is an external collaborator;
//! this module is the seam the event consumer calls through. Dispatch is
//! best-effort: callers log failures and never propagate them into
//! order-producing code paths.

use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification transport error: {0}")]
    Transport(String),
}

/// Queues an order confirmation for the customer.
#[instrument]
pub async fn send_order_confirmation(
    order_number: &str,
    customer_email: &str,
) -> Result<(), NotificationError> {
    // Handoff to the delivery provider goes here; the engine only needs
    // the call to be fire-and-forget.
    info!(%order_number, %customer_email, "order confirmation queued");
    Ok(())
}
