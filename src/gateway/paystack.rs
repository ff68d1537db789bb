use super::{
    GatewayAuthorization, GatewayTransactionStatus, GatewayVerification, InitializeRequest,
    PaymentGateway,
};
use crate::{config::AppConfig, errors::ServiceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{instrument, warn};

/// HTTP client for the Paystack transaction API.
///
/// Every request carries the secret key as a bearer token and is bounded
/// by the configured timeout. Transport failures and non-2xx responses map
/// to `ServiceError::PaymentGateway`, which callers treat as retryable.
pub struct PaystackClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

/// Paystack wraps every response in `{ status, message, data }`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    reference: String,
    amount: i64,
    #[serde(default)]
    currency: String,
    channel: Option<String>,
    fees: Option<i64>,
    paid_at: Option<DateTime<Utc>>,
    metadata: Option<serde_json::Value>,
}

impl PaystackClient {
    pub fn new(cfg: &AppConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.gateway_timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: cfg.paystack_base_url.trim_end_matches('/').to_string(),
            secret_key: cfg.paystack_secret_key.clone(),
        })
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ServiceError> {
        let response = builder
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "paystack request failed");
                ServiceError::PaymentGateway(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, "paystack returned an error response");
            return Err(ServiceError::PaymentGateway(format!(
                "gateway returned {status}"
            )));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| ServiceError::PaymentGateway(format!("invalid gateway response: {e}")))?;

        if !envelope.status {
            return Err(ServiceError::PaymentGateway(envelope.message));
        }
        envelope
            .data
            .ok_or_else(|| ServiceError::PaymentGateway("gateway response missing data".into()))
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    #[instrument(skip(self, request), fields(reference = %request.reference))]
    async fn initialize_transaction(
        &self,
        request: InitializeRequest,
    ) -> Result<GatewayAuthorization, ServiceError> {
        let mut payload = json!({
            "email": request.email,
            "amount": request.amount_minor,
            "currency": request.currency,
            "reference": request.reference,
        });
        if let Some(url) = &request.callback_url {
            payload["callback_url"] = json!(url);
        }
        if let Some(meta) = &request.metadata {
            payload["metadata"] = meta.clone();
        }

        let data: InitializeData = self
            .request(
                self.http
                    .post(format!("{}/transaction/initialize", self.base_url))
                    .json(&payload),
            )
            .await?;

        Ok(GatewayAuthorization {
            authorization_url: data.authorization_url,
            access_code: data.access_code,
            reference: data.reference,
        })
    }

    #[instrument(skip(self))]
    async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<GatewayVerification, ServiceError> {
        let data: VerifyData = self
            .request(
                self.http
                    .get(format!("{}/transaction/verify/{reference}", self.base_url)),
            )
            .await?;

        let status = match data.status.as_str() {
            "success" => GatewayTransactionStatus::Success,
            "failed" => GatewayTransactionStatus::Failed,
            "abandoned" => GatewayTransactionStatus::Abandoned,
            other => {
                warn!(status = other, "unrecognized gateway transaction status");
                GatewayTransactionStatus::Pending
            }
        };

        Ok(GatewayVerification {
            status,
            reference: data.reference,
            amount_minor: data.amount,
            currency: data.currency,
            channel: data.channel,
            fees_minor: data.fees,
            paid_at: data.paid_at,
            metadata: data.metadata,
        })
    }
}
