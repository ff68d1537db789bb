use crate::{
    config::AppConfig,
    entities::{
        customer::{self, Entity as CustomerEntity},
        order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus},
        order_item,
        payment::{self, Entity as PaymentEntity, PaymentState},
        pending_checkout::{self, CheckoutStatus, Entity as PendingCheckoutEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{GatewayTransactionStatus, PaymentGateway},
    services::{
        inventory::{InventoryService, ReservationLine},
        is_unique_violation, to_minor_units,
    },
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// A confirmed payment, from a webhook or a synchronous verify call.
/// Amounts are minor currency units straight from the gateway.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub reference: String,
    pub amount_minor: i64,
    pub currency: String,
    pub channel: Option<String>,
    pub fees_minor: Option<i64>,
    pub paid_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

/// Business outcome of reconciling a confirmed payment. These are expected
/// branches the caller acts on, not errors; only infrastructure failures
/// surface as `ServiceError`.
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// Exactly one order was created
    Completed(order::Model),
    /// An order already exists for this payment reference
    AlreadyProcessed { order_number: Option<String> },
    /// The checkout expired before confirmation arrived; no order
    Expired,
    /// No pending checkout for this reference; possible race or forged reference
    NotFound,
    /// Confirmation arrived in an unexpected currency; treated as
    /// misconfiguration or fraud, never partially accepted
    CurrencyMismatch { received: String },
    /// Paid amount differs from the checkout total; checkout is failed
    AmountMismatch {
        expected_minor: i64,
        received_minor: i64,
    },
    /// Payment succeeded but stock ran out; checkout is failed and the
    /// charge must be refunded out of band
    InsufficientStock { detail: String },
}

/// Status view returned by the synchronous verify path
#[derive(Debug)]
pub enum VerifyOutcome {
    Paid {
        order_number: String,
        payment_status: PaymentStatus,
    },
    Pending,
    Failed,
    Expired,
    NotFound,
}

/// Turns confirmed payments into orders, exactly once.
///
/// Every guard here assumes at-least-once, out-of-order delivery: the
/// order's unique payment-reference column is the last line of defense,
/// and everything before it just avoids wasted work.
#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    inventory: InventoryService,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
    config: Arc<AppConfig>,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        inventory: InventoryService,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            inventory,
            gateway,
            event_sender,
            config,
        }
    }

    #[instrument(skip(self, confirmation), fields(reference = %confirmation.reference))]
    pub async fn reconcile(
        &self,
        confirmation: PaymentConfirmation,
    ) -> Result<ReconcileOutcome, ServiceError> {
        if !confirmation
            .currency
            .eq_ignore_ascii_case(&self.config.currency)
        {
            error!(
                received = %confirmation.currency,
                expected = %self.config.currency,
                "currency mismatch on confirmed payment"
            );
            return Ok(ReconcileOutcome::CurrencyMismatch {
                received: confirmation.currency,
            });
        }

        let pending = PendingCheckoutEntity::find()
            .filter(pending_checkout::Column::PaymentReference.eq(&confirmation.reference))
            .one(&*self.db)
            .await?;

        let pending = match pending {
            Some(p) if p.status == CheckoutStatus::Pending => {
                // Re-check expiry here rather than trusting the sweep; the
                // sweep and this path race benignly on the same row.
                if p.is_expired(Utc::now()) {
                    warn!(
                        reference = %confirmation.reference,
                        "payment confirmed for expired checkout; manual reconciliation required"
                    );
                    self.transition_pending(&*self.db, &p, CheckoutStatus::Expired)
                        .await?;
                    return Ok(ReconcileOutcome::Expired);
                }
                p
            }
            Some(p) if p.status == CheckoutStatus::Expired => {
                // Redelivery for an expired checkout. An order can still
                // exist if a confirmation landed just before expiry.
                if let Some(existing) = self.find_order(&confirmation.reference).await? {
                    info!(order_number = %existing.order_number, "payment already reconciled");
                    return Ok(ReconcileOutcome::AlreadyProcessed {
                        order_number: Some(existing.order_number),
                    });
                }
                warn!(
                    reference = %confirmation.reference,
                    "payment confirmed for expired checkout; manual reconciliation required"
                );
                return Ok(ReconcileOutcome::Expired);
            }
            _ => {
                // Terminal or absent: an existing order means this is a
                // redelivery; otherwise flag for manual review.
                if let Some(existing) = self.find_order(&confirmation.reference).await? {
                    info!(order_number = %existing.order_number, "payment already reconciled");
                    return Ok(ReconcileOutcome::AlreadyProcessed {
                        order_number: Some(existing.order_number),
                    });
                }
                warn!(reference = %confirmation.reference, "no pending checkout for confirmed payment");
                return Ok(ReconcileOutcome::NotFound);
            }
        };

        if let Some(existing) = self.find_order(&confirmation.reference).await? {
            info!(order_number = %existing.order_number, "payment already reconciled");
            return Ok(ReconcileOutcome::AlreadyProcessed {
                order_number: Some(existing.order_number),
            });
        }

        // Exact equality in minor units; no tolerance band. Accepting an
        // under-payment here would let a tampered gateway callback buy
        // goods below price.
        let expected_minor = to_minor_units(pending.total_amount)?;
        if confirmation.amount_minor != expected_minor {
            error!(
                reference = %confirmation.reference,
                expected_minor,
                received_minor = confirmation.amount_minor,
                "payment amount mismatch; failing checkout"
            );
            if !self
                .transition_pending(&*self.db, &pending, CheckoutStatus::Failed)
                .await?
            {
                return self.outcome_for_settled(&confirmation.reference).await;
            }
            return Ok(ReconcileOutcome::AmountMismatch {
                expected_minor,
                received_minor: confirmation.amount_minor,
            });
        }

        let snapshot = pending.snapshot()?;
        let reservation: Vec<ReservationLine> = snapshot
            .lines
            .iter()
            .map(|l| ReservationLine {
                variant_id: l.variant_id,
                quantity: l.quantity,
            })
            .collect();

        match self.inventory.reserve(&reservation).await {
            Ok(()) => {}
            Err(ServiceError::InsufficientStock(detail)) => {
                // Payment has already succeeded at the gateway. Accepted
                // business risk: the charge is refunded out of band.
                error!(
                    reference = %confirmation.reference,
                    %detail,
                    "stock exhausted after successful payment; refund required"
                );
                if !self
                    .transition_pending(&*self.db, &pending, CheckoutStatus::Failed)
                    .await?
                {
                    return self.outcome_for_settled(&confirmation.reference).await;
                }
                return Ok(ReconcileOutcome::InsufficientStock { detail });
            }
            Err(other) => return Err(other),
        }

        // Customer, order, items, checkout completion and the payment
        // mirror commit as one unit; a failure after the reservation
        // releases the stock before surfacing.
        let build_result = self
            .create_order_txn(&pending, &confirmation, &snapshot)
            .await;

        let order = match build_result {
            Ok(order) => order,
            Err(err) => {
                self.inventory.release(&reservation).await?;
                if matches!(err, ServiceError::Conflict(_)) {
                    // The checkout left pending (sweep or a failed-charge
                    // delivery won) while the transaction ran.
                    return self.outcome_for_settled(&confirmation.reference).await;
                }
                if let ServiceError::DatabaseError(db_err) = &err {
                    if is_unique_violation(db_err) {
                        // Concurrent reconcile won the order insert.
                        if let Some(winner) = self.find_order(&confirmation.reference).await? {
                            info!(reference = %confirmation.reference, "lost order-insert race; treating as duplicate");
                            return Ok(ReconcileOutcome::AlreadyProcessed {
                                order_number: Some(winner.order_number),
                            });
                        }
                        // The violation came from another row (e.g. the
                        // customer email); no order exists, so stay
                        // retryable and let the delivery come back.
                    }
                }
                return Err(err);
            }
        };

        self.event_sender
            .send(Event::OrderCreated {
                order_id: order.id,
                order_number: order.order_number.clone(),
                customer_email: order.customer_email.clone(),
            })
            .await;

        info!(order_number = %order.order_number, "order created from confirmed payment");
        Ok(ReconcileOutcome::Completed(order))
    }

    /// Marks the pending checkout for a failed charge as failed.
    /// Returns whether a pending row was found.
    #[instrument(skip(self))]
    pub async fn handle_failed_payment(&self, reference: &str) -> Result<bool, ServiceError> {
        let pending = PendingCheckoutEntity::find()
            .filter(pending_checkout::Column::PaymentReference.eq(reference))
            .filter(pending_checkout::Column::Status.eq(CheckoutStatus::Pending))
            .one(&*self.db)
            .await?;

        match pending {
            Some(p) => {
                if !self
                    .transition_pending(&*self.db, &p, CheckoutStatus::Failed)
                    .await?
                {
                    // Settled concurrently; nothing to fail.
                    return Ok(false);
                }
                self.event_sender
                    .send(Event::PaymentFailed {
                        payment_reference: reference.to_string(),
                    })
                    .await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Synchronous verify path for polling clients.
    ///
    /// Safe to call repeatedly: an already-paid order short-circuits before
    /// any gateway call, stock reservation or payment mutation.
    #[instrument(skip(self))]
    pub async fn verify(&self, reference: &str) -> Result<VerifyOutcome, ServiceError> {
        if let Some(order) = self.find_order(reference).await? {
            return Ok(VerifyOutcome::Paid {
                order_number: order.order_number,
                payment_status: order.payment_status,
            });
        }

        let pending = PendingCheckoutEntity::find()
            .filter(pending_checkout::Column::PaymentReference.eq(reference))
            .one(&*self.db)
            .await?;

        let pending = match pending {
            None => return Ok(VerifyOutcome::NotFound),
            Some(p) => p,
        };

        match pending.status {
            CheckoutStatus::Failed => return Ok(VerifyOutcome::Failed),
            CheckoutStatus::Expired => return Ok(VerifyOutcome::Expired),
            // Completed without an order should not happen; report pending
            // so the client polls again rather than seeing a false failure.
            CheckoutStatus::Completed => return Ok(VerifyOutcome::Pending),
            CheckoutStatus::Pending => {}
        }

        let verification = self.gateway.verify_transaction(reference).await?;
        match verification.status {
            GatewayTransactionStatus::Success => {
                let outcome = self
                    .reconcile(PaymentConfirmation {
                        reference: verification.reference,
                        amount_minor: verification.amount_minor,
                        currency: verification.currency,
                        channel: verification.channel,
                        fees_minor: verification.fees_minor,
                        paid_at: verification.paid_at,
                        metadata: verification.metadata,
                    })
                    .await?;

                Ok(match outcome {
                    ReconcileOutcome::Completed(order) => VerifyOutcome::Paid {
                        order_number: order.order_number,
                        payment_status: order.payment_status,
                    },
                    ReconcileOutcome::AlreadyProcessed { order_number } => match order_number {
                        Some(order_number) => VerifyOutcome::Paid {
                            order_number,
                            payment_status: PaymentStatus::Paid,
                        },
                        None => VerifyOutcome::Pending,
                    },
                    ReconcileOutcome::Expired => VerifyOutcome::Expired,
                    ReconcileOutcome::NotFound => VerifyOutcome::NotFound,
                    ReconcileOutcome::CurrencyMismatch { .. }
                    | ReconcileOutcome::AmountMismatch { .. }
                    | ReconcileOutcome::InsufficientStock { .. } => VerifyOutcome::Failed,
                })
            }
            GatewayTransactionStatus::Failed | GatewayTransactionStatus::Abandoned => {
                self.handle_failed_payment(reference).await?;
                Ok(VerifyOutcome::Failed)
            }
            GatewayTransactionStatus::Pending => Ok(VerifyOutcome::Pending),
        }
    }

    async fn find_order(&self, reference: &str) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::PaymentReference.eq(reference))
            .one(&*self.db)
            .await?)
    }

    /// Moves a pending checkout to a terminal status with a conditional
    /// UPDATE keyed on the status this request last observed, so a stale
    /// read can never overwrite a transition that happened in between (the
    /// sweep expiring the row, or a racing delivery settling it first).
    /// Returns whether this call performed the transition.
    async fn transition_pending<C: ConnectionTrait>(
        &self,
        db: &C,
        pending: &pending_checkout::Model,
        next: CheckoutStatus,
    ) -> Result<bool, ServiceError> {
        if !pending.status.can_transition_to(next) {
            return Err(ServiceError::InvalidOperation(format!(
                "illegal checkout transition {:?} -> {:?} for {}",
                pending.status, next, pending.payment_reference
            )));
        }
        let result = PendingCheckoutEntity::update_many()
            .col_expr(pending_checkout::Column::Status, Expr::value(next))
            .filter(pending_checkout::Column::Id.eq(pending.id))
            .filter(pending_checkout::Column::Status.eq(pending.status))
            .exec(db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Maps a checkout that settled under a concurrent writer to the
    /// outcome its terminal state deserves.
    async fn outcome_for_settled(
        &self,
        reference: &str,
    ) -> Result<ReconcileOutcome, ServiceError> {
        if let Some(winner) = self.find_order(reference).await? {
            info!(order_number = %winner.order_number, "payment already reconciled");
            return Ok(ReconcileOutcome::AlreadyProcessed {
                order_number: Some(winner.order_number),
            });
        }
        let row = PendingCheckoutEntity::find()
            .filter(pending_checkout::Column::PaymentReference.eq(reference))
            .one(&*self.db)
            .await?;
        match row.map(|p| p.status) {
            Some(CheckoutStatus::Expired) => {
                warn!(reference, "payment confirmed for expired checkout; manual reconciliation required");
                Ok(ReconcileOutcome::Expired)
            }
            other => {
                warn!(reference, status = ?other, "checkout settled without an order; manual review required");
                Ok(ReconcileOutcome::NotFound)
            }
        }
    }

    async fn create_order_txn(
        &self,
        pending: &pending_checkout::Model,
        confirmation: &PaymentConfirmation,
        snapshot: &pending_checkout::CheckoutSnapshot,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let customer_id = self
            .find_or_create_customer(&txn, &snapshot.customer, now)
            .await?;

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(generate_order_number()),
            idempotency_key: Set(Some(pending.idempotency_key.clone())),
            payment_reference: Set(pending.payment_reference.clone()),
            status: Set(OrderStatus::Confirmed),
            payment_status: Set(PaymentStatus::Paid),
            payment_method: Set(Some(snapshot.payment_method.clone())),
            customer_id: Set(customer_id),
            customer_name: Set(snapshot.customer.name.clone()),
            customer_email: Set(snapshot.customer.email.clone()),
            customer_phone: Set(snapshot.customer.phone.clone()),
            shipping_address: Set(snapshot.shipping_address.clone()),
            billing_address: Set(snapshot.billing_address.clone()),
            total_amount: Set(snapshot.total_amount),
            currency: Set(self.config.currency.clone()),
            notes: Set(snapshot.notes.clone()),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await?;

        for line in &snapshot.lines {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                variant_id: Set(line.variant_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                total_price: Set(line.line_total),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        if !self
            .transition_pending(&txn, pending, CheckoutStatus::Completed)
            .await?
        {
            return Err(ServiceError::Conflict(
                "checkout settled concurrently".into(),
            ));
        }
        self.reconcile_payment_mirror(&txn, confirmation, now).await?;

        txn.commit().await?;
        Ok(order)
    }

    async fn find_or_create_customer<C: ConnectionTrait>(
        &self,
        db: &C,
        details: &pending_checkout::CustomerDetails,
        now: DateTime<Utc>,
    ) -> Result<Uuid, ServiceError> {
        if let Some(existing) = CustomerEntity::find()
            .filter(customer::Column::Email.eq(&details.email))
            .one(db)
            .await?
        {
            return Ok(existing.id);
        }

        let (first_name, last_name) = match details.name.split_once(' ') {
            Some((first, rest)) => (first.to_string(), rest.to_string()),
            None => (details.name.clone(), String::new()),
        };

        let created = customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(details.email.clone()),
            phone: Set(Some(details.phone.clone())),
            first_name: Set(first_name),
            last_name: Set(last_name),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(db)
        .await?;

        Ok(created.id)
    }

    async fn reconcile_payment_mirror<C: ConnectionTrait>(
        &self,
        db: &C,
        confirmation: &PaymentConfirmation,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let existing = PaymentEntity::find()
            .filter(payment::Column::Reference.eq(&confirmation.reference))
            .one(db)
            .await?;

        match existing {
            Some(row) => {
                let mut active: payment::ActiveModel = row.into();
                active.status = Set(PaymentState::Paid);
                active.channel = Set(confirmation.channel.clone());
                active.fees = Set(confirmation.fees_minor);
                active.paid_at = Set(confirmation.paid_at.or(Some(now)));
                active.metadata = Set(confirmation.metadata.clone());
                active.updated_at = Set(Some(now));
                active.update(db).await?;
            }
            // Legacy path: confirmations for references initialized before
            // the payment mirror existed still get a row.
            None => {
                payment::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    reference: Set(confirmation.reference.clone()),
                    amount: Set(rust_decimal::Decimal::new(confirmation.amount_minor, 2)),
                    currency: Set(confirmation.currency.clone()),
                    status: Set(PaymentState::Paid),
                    channel: Set(confirmation.channel.clone()),
                    fees: Set(confirmation.fees_minor),
                    paid_at: Set(confirmation.paid_at.or(Some(now))),
                    metadata: Set(confirmation.metadata.clone()),
                    created_at: Set(now),
                    updated_at: Set(None),
                }
                .insert(db)
                .await?;
            }
        }
        Ok(())
    }
}

/// Human-facing order number: `ORD-<timestamp>-<8 hex chars>`
pub fn generate_order_number() -> String {
    let unique = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("ORD-{}-{}", Utc::now().format("%Y%m%d%H%M%S"), unique)
}
