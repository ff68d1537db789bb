use crate::{
    config::AppConfig,
    entities::{
        order::{self, Entity as OrderEntity},
        payment,
        pending_checkout::{
            self, CheckoutSnapshot, CheckoutStatus, CustomerDetails, Entity as PendingCheckoutEntity,
            SnapshotLine, SNAPSHOT_VERSION,
        },
        product_variant::{self, Entity as ProductVariantEntity},
    },
    errors::ServiceError,
    gateway::{InitializeRequest, PaymentGateway},
    services::{is_unique_violation, to_minor_units},
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// One cart line in a checkout request
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct CartLineInput {
    pub variant_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, message = "Cart cannot be empty"))]
    pub cart: Vec<CartLineInput>,
    #[validate(length(min = 2, max = 120))]
    pub customer_name: String,
    #[validate(email)]
    pub customer_email: String,
    #[validate(length(min = 7, max = 20))]
    pub customer_phone: String,
    #[validate(length(min = 5, max = 500))]
    pub shipping_address: String,
    pub billing_address: Option<String>,
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
    pub notes: Option<String>,
    /// Client-supplied token; retries with the same key return the same
    /// result instead of a duplicate effect
    #[validate(length(min = 8, max = 64))]
    pub idempotency_key: String,
}

fn default_payment_method() -> String {
    "card".to_string()
}

/// Payment session details returned to the client for redirect
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentSession {
    pub payment_reference: String,
    pub authorization_url: String,
    pub access_code: String,
    pub total_amount: Decimal,
    pub expires_at: chrono::DateTime<Utc>,
}

/// Outcome of checkout initiation
#[derive(Debug)]
pub enum CheckoutOutcome {
    /// An order already exists for this idempotency key
    AlreadyCompleted(order::Model),
    /// A payment session is open (new, or replayed from a live pending checkout)
    PaymentPending(PaymentSession),
}

/// Validates the cart, opens a payment session with the gateway and
/// persists the checkout intent. Stock is NOT reserved here; reservation
/// is deferred to reconciliation, which accepts a small oversell window in
/// exchange for idempotent retries with nothing to compensate.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            gateway,
            config,
        }
    }

    #[instrument(skip(self, request), fields(idempotency_key = %request.idempotency_key))]
    pub async fn initiate(&self, request: CheckoutRequest) -> Result<CheckoutOutcome, ServiceError> {
        request.validate()?;

        // Replay guards, cheapest first. The uniqueness constraint on the
        // idempotency key remains the authoritative arbiter; these lookups
        // just avoid a pointless gateway call.
        if let Some(existing) = self.find_order_by_key(&request.idempotency_key).await? {
            info!(order_number = %existing.order_number, "idempotency key already completed");
            return Ok(CheckoutOutcome::AlreadyCompleted(existing));
        }
        if let Some(session) = self.find_live_session_by_key(&request.idempotency_key).await? {
            info!(payment_reference = %session.payment_reference, "returning existing payment session");
            return Ok(CheckoutOutcome::PaymentPending(session));
        }

        // A terminal checkout still owns the key row. Refusing here, before
        // the gateway call, avoids opening a payment session that could
        // never be persisted.
        if let Some(terminal) = self.find_terminal_by_key(&request.idempotency_key).await? {
            return Err(ServiceError::Conflict(format!(
                "a previous checkout with this idempotency key ended as {}; submit a new key",
                terminal
            )));
        }

        let snapshot = self.build_snapshot(&request).await?;
        let payment_reference = generate_payment_reference();

        let authorization = self
            .gateway
            .initialize_transaction(InitializeRequest {
                email: request.customer_email.clone(),
                amount_minor: to_minor_units(snapshot.total_amount)?,
                currency: self.config.currency.clone(),
                reference: payment_reference.clone(),
                callback_url: self.config.payment_callback_url.clone(),
                metadata: Some(json!({
                    "idempotency_key": request.idempotency_key,
                    "customer_name": request.customer_name,
                })),
            })
            .await?;

        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.config.checkout_ttl_secs);

        let pending = pending_checkout::ActiveModel {
            id: Set(Uuid::new_v4()),
            idempotency_key: Set(request.idempotency_key.clone()),
            payment_reference: Set(payment_reference.clone()),
            checkout_data: Set(serde_json::to_value(&snapshot)?),
            total_amount: Set(snapshot.total_amount),
            authorization_url: Set(authorization.authorization_url.clone()),
            access_code: Set(authorization.access_code.clone()),
            status: Set(CheckoutStatus::Pending),
            created_at: Set(now),
            expires_at: Set(expires_at),
        };
        let payment_mirror = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            reference: Set(payment_reference.clone()),
            amount: Set(snapshot.total_amount),
            currency: Set(self.config.currency.clone()),
            status: Set(payment::PaymentState::Pending),
            channel: Set(None),
            fees: Set(None),
            paid_at: Set(None),
            metadata: Set(None),
            created_at: Set(now),
            updated_at: Set(None),
        };

        let insert_result = async {
            let txn = self.db.begin().await?;
            pending.insert(&txn).await?;
            payment_mirror.insert(&txn).await?;
            txn.commit().await?;
            Ok::<_, sea_orm::DbErr>(())
        }
        .await;

        match insert_result {
            Ok(()) => {
                info!(%payment_reference, total = %snapshot.total_amount, "checkout initiated");
                Ok(CheckoutOutcome::PaymentPending(PaymentSession {
                    payment_reference,
                    authorization_url: authorization.authorization_url,
                    access_code: authorization.access_code,
                    total_amount: snapshot.total_amount,
                    expires_at,
                }))
            }
            // Lost a race on the idempotency key: return the winner's row.
            Err(err) if is_unique_violation(&err) => {
                warn!(idempotency_key = %request.idempotency_key, "checkout insert raced, re-querying winner");
                if let Some(existing) = self.find_order_by_key(&request.idempotency_key).await? {
                    return Ok(CheckoutOutcome::AlreadyCompleted(existing));
                }
                if let Some(session) =
                    self.find_live_session_by_key(&request.idempotency_key).await?
                {
                    return Ok(CheckoutOutcome::PaymentPending(session));
                }
                Err(ServiceError::Conflict(
                    "concurrent checkout for this idempotency key".into(),
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn find_order_by_key(&self, key: &str) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::IdempotencyKey.eq(key))
            .one(&*self.db)
            .await?)
    }

    async fn find_live_session_by_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentSession>, ServiceError> {
        let pending = PendingCheckoutEntity::find()
            .filter(pending_checkout::Column::IdempotencyKey.eq(key))
            .filter(pending_checkout::Column::Status.eq(CheckoutStatus::Pending))
            .filter(pending_checkout::Column::ExpiresAt.gt(Utc::now()))
            .one(&*self.db)
            .await?;

        Ok(pending.map(|p| PaymentSession {
            payment_reference: p.payment_reference,
            authorization_url: p.authorization_url,
            access_code: p.access_code,
            total_amount: p.total_amount,
            expires_at: p.expires_at,
        }))
    }

    /// Returns the status string of a terminal (or stale pending) checkout
    /// holding this key, if one exists.
    async fn find_terminal_by_key(&self, key: &str) -> Result<Option<String>, ServiceError> {
        let row = PendingCheckoutEntity::find()
            .filter(pending_checkout::Column::IdempotencyKey.eq(key))
            .one(&*self.db)
            .await?;

        Ok(row.map(|p| {
            if p.status == CheckoutStatus::Pending {
                "expired".to_string()
            } else {
                format!("{:?}", p.status).to_lowercase()
            }
        }))
    }

    /// Validates every cart line against the live catalog and computes the
    /// total from current variant prices. The stock comparison here is
    /// advisory; the authoritative reservation happens at reconciliation.
    async fn build_snapshot(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSnapshot, ServiceError> {
        let mut lines = Vec::with_capacity(request.cart.len());
        let mut total_amount = Decimal::ZERO;

        for line in &request.cart {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "quantity for variant {} must be positive",
                    line.variant_id
                )));
            }

            let variant = ProductVariantEntity::find_by_id(line.variant_id)
                .filter(product_variant::Column::IsActive.eq(true))
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "product variant {} not found",
                        line.variant_id
                    ))
                })?;

            if variant.stock_quantity < line.quantity {
                return Err(ServiceError::ValidationError(format!(
                    "insufficient stock for {}: available {}, requested {}",
                    variant.sku, variant.stock_quantity, line.quantity
                )));
            }

            let line_total = variant.price * Decimal::from(line.quantity);
            total_amount += line_total;
            lines.push(SnapshotLine {
                variant_id: variant.id,
                quantity: line.quantity,
                unit_price: variant.price,
                line_total,
            });
        }

        Ok(CheckoutSnapshot {
            version: SNAPSHOT_VERSION,
            lines,
            customer: CustomerDetails {
                name: request.customer_name.clone(),
                email: request.customer_email.clone(),
                phone: request.customer_phone.clone(),
            },
            shipping_address: request.shipping_address.clone(),
            billing_address: request
                .billing_address
                .clone()
                .unwrap_or_else(|| request.shipping_address.clone()),
            payment_method: request.payment_method.clone(),
            notes: request.notes.clone(),
            total_amount,
        })
    }
}

pub fn generate_payment_reference() -> String {
    format!("pay_{}", Uuid::new_v4().simple())
}
