//! Payment gateway integration.
//!
//! The gateway is trusted as an oracle for payment state: this module only
//! initializes transactions, verifies them, and checks webhook signatures.
//! All order/ledger bookkeeping lives in the services layer.

pub mod paystack;
pub mod signature;

use crate::errors::ServiceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use paystack::PaystackClient;
pub use signature::verify_webhook_signature;

/// Request to open a payment session with the gateway
#[derive(Debug, Clone, Serialize)]
pub struct InitializeRequest {
    pub email: String,
    /// Amount in minor currency units (kobo)
    pub amount_minor: i64,
    pub currency: String,
    pub reference: String,
    pub callback_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Authorization handed back by the gateway for a new payment session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayAuthorization {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayTransactionStatus {
    Success,
    Failed,
    Abandoned,
    Pending,
}

/// Result of a synchronous verify call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayVerification {
    pub status: GatewayTransactionStatus,
    pub reference: String,
    /// Paid amount in minor currency units
    pub amount_minor: i64,
    pub currency: String,
    pub channel: Option<String>,
    pub fees_minor: Option<i64>,
    pub paid_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

/// Outbound interface to the payment provider.
///
/// Both calls are bounded by the configured timeout; a timeout surfaces as
/// `ServiceError::PaymentGateway` and callers persist nothing, so retrying
/// from the client is always safe.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_transaction(
        &self,
        request: InitializeRequest,
    ) -> Result<GatewayAuthorization, ServiceError>;

    async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<GatewayVerification, ServiceError>;
}
