use crate::{
    config::AppConfig,
    entities::webhook_event::{self, WebhookEventStatus},
    errors::ServiceError,
    gateway::signature::verify_webhook_signature,
    services::{
        is_unique_violation,
        reconciliation::{PaymentConfirmation, ReconcileOutcome, ReconciliationService},
    },
};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Gateway webhook envelope. Unknown fields are ignored; the raw body is
/// kept verbatim in the ledger for audit and replay.
#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[serde(default)]
    id: Option<serde_json::Value>,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    reference: String,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    fees: Option<i64>,
    #[serde(default)]
    paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// Outcome of a webhook delivery. Everything except a retryable failure
/// maps to HTTP 200; returning an error for inert outcomes would only make
/// the gateway redeliver them forever.
#[derive(Debug)]
pub enum WebhookOutcome {
    /// This event id was already processed; an audit row records the replay
    Duplicate,
    /// The charge failed and the pending checkout was marked accordingly
    PaymentFailed,
    /// Event type this engine does not act on; acknowledged and ledgered
    Unhandled { event_type: String },
    /// charge.success reconciled, see the inner outcome
    Reconciled(ReconcileOutcome),
}

/// Webhook intake: signature gate, ledger insert, then dispatch.
///
/// The ledger insert happens BEFORE any processing, so the unique event-id
/// column is what makes redelivery harmless even when two deliveries race.
#[derive(Clone)]
pub struct WebhookService {
    db: Arc<DatabaseConnection>,
    reconciliation: ReconciliationService,
    config: Arc<AppConfig>,
}

impl WebhookService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        reconciliation: ReconciliationService,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            reconciliation,
            config,
        }
    }

    #[instrument(skip(self, raw_body, signature))]
    pub async fn process(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let signature = signature
            .ok_or_else(|| ServiceError::Unauthorized("missing webhook signature".into()))?;
        if !verify_webhook_signature(&self.config.paystack_secret_key, raw_body, signature) {
            warn!("webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".into(),
            ));
        }

        let envelope: WebhookEnvelope = serde_json::from_slice(raw_body).map_err(|e| {
            ServiceError::BadRequest(format!("malformed webhook payload: {e}"))
        })?;

        let event_id = extract_event_id(&envelope);
        let raw_payload = String::from_utf8_lossy(raw_body).into_owned();

        // Insert-before-processing. A unique violation here means another
        // delivery of the same event already claimed it.
        let ledger_row = match self
            .insert_ledger_row(&event_id, &envelope, &raw_payload)
            .await
        {
            Ok(row) => row,
            Err(ServiceError::DatabaseError(ref db_err)) if is_unique_violation(db_err) => {
                return self.record_duplicate(&event_id, &envelope, &raw_payload).await;
            }
            Err(other) => return Err(other),
        };

        match envelope.event.as_str() {
            "charge.success" => {
                let reconcile_result = self
                    .reconciliation
                    .reconcile(PaymentConfirmation {
                        reference: envelope.data.reference.clone(),
                        amount_minor: envelope.data.amount,
                        currency: envelope.data.currency.clone(),
                        channel: envelope.data.channel.clone(),
                        fees_minor: envelope.data.fees,
                        paid_at: envelope.data.paid_at,
                        metadata: envelope.data.metadata.clone(),
                    })
                    .await;

                match reconcile_result {
                    Ok(outcome) => {
                        let ledger_status = match &outcome {
                            ReconcileOutcome::Completed(_)
                            | ReconcileOutcome::AlreadyProcessed { .. } => {
                                WebhookEventStatus::Processed
                            }
                            _ => WebhookEventStatus::Failed,
                        };
                        self.finish_ledger_row(ledger_row, ledger_status).await?;
                        Ok(WebhookOutcome::Reconciled(outcome))
                    }
                    Err(err) => {
                        // Infrastructure failure: mark the ledger row so
                        // the redelivery is not rejected as a duplicate,
                        // then surface a 5xx for the gateway to retry.
                        self.finish_ledger_row(ledger_row, WebhookEventStatus::Failed)
                            .await?;
                        Err(err)
                    }
                }
            }
            "charge.failed" => {
                match self
                    .reconciliation
                    .handle_failed_payment(&envelope.data.reference)
                    .await
                {
                    Ok(_found) => {
                        self.finish_ledger_row(ledger_row, WebhookEventStatus::Processed)
                            .await?;
                        Ok(WebhookOutcome::PaymentFailed)
                    }
                    Err(err) => {
                        self.finish_ledger_row(ledger_row, WebhookEventStatus::Failed)
                            .await?;
                        Err(err)
                    }
                }
            }
            other => {
                info!(event_type = other, "unhandled webhook event type");
                self.finish_ledger_row(ledger_row, WebhookEventStatus::Unhandled)
                    .await?;
                Ok(WebhookOutcome::Unhandled {
                    event_type: other.to_string(),
                })
            }
        }
    }

    async fn insert_ledger_row(
        &self,
        event_id: &str,
        envelope: &WebhookEnvelope,
        raw_payload: &str,
    ) -> Result<webhook_event::Model, ServiceError> {
        Ok(webhook_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            event_id: Set(event_id.to_string()),
            event_type: Set(envelope.event.clone()),
            payment_reference: Set(Some(envelope.data.reference.clone())),
            status: Set(WebhookEventStatus::Processing),
            raw_payload: Set(raw_payload.to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?)
    }

    /// Replays keep their own audit trail: each duplicate delivery gets a
    /// ledger row under a derived id so the original row stays untouched.
    async fn record_duplicate(
        &self,
        event_id: &str,
        envelope: &WebhookEnvelope,
        raw_payload: &str,
    ) -> Result<WebhookOutcome, ServiceError> {
        info!(event_id, "duplicate webhook delivery");
        webhook_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            event_id: Set(format!("{}_duplicate_{}", event_id, Uuid::new_v4().simple())),
            event_type: Set(envelope.event.clone()),
            payment_reference: Set(Some(envelope.data.reference.clone())),
            status: Set(WebhookEventStatus::Duplicate),
            raw_payload: Set(raw_payload.to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;
        Ok(WebhookOutcome::Duplicate)
    }

    async fn finish_ledger_row(
        &self,
        row: webhook_event::Model,
        status: WebhookEventStatus,
    ) -> Result<(), ServiceError> {
        let mut active: webhook_event::ActiveModel = row.into();
        active.status = Set(status);
        active.update(&*self.db).await?;
        Ok(())
    }
}

/// Gateways do not always send an event id; fall back to a timestamp-based
/// one so the ledger row can still be written. Fallback ids do not dedup
/// across deliveries, which matches treating an id-less event as unique.
fn extract_event_id(envelope: &WebhookEnvelope) -> String {
    match &envelope.id {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => format!("no_id_{}", Utc::now().timestamp_micros()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_prefers_explicit_id() {
        let envelope: WebhookEnvelope = serde_json::from_str(
            r#"{"event":"charge.success","id":"evt_1","data":{"reference":"pay_a"}}"#,
        )
        .unwrap();
        assert_eq!(extract_event_id(&envelope), "evt_1");
    }

    #[test]
    fn event_id_accepts_numeric_id() {
        let envelope: WebhookEnvelope = serde_json::from_str(
            r#"{"event":"charge.success","id":42,"data":{"reference":"pay_a"}}"#,
        )
        .unwrap();
        assert_eq!(extract_event_id(&envelope), "42");
    }

    #[test]
    fn event_id_falls_back_when_missing() {
        let envelope: WebhookEnvelope = serde_json::from_str(
            r#"{"event":"charge.success","data":{"reference":"pay_a"}}"#,
        )
        .unwrap();
        assert!(extract_event_id(&envelope).starts_with("no_id_"));
    }
}
