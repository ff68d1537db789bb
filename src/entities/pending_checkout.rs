use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current version of the serialized checkout snapshot.
pub const SNAPSHOT_VERSION: u16 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "expired")]
    Expired,
}

impl CheckoutStatus {
    /// Terminal states are never re-entered.
    pub fn is_terminal(self) -> bool {
        self != CheckoutStatus::Pending
    }

    /// Only pending -> {completed, failed, expired} are legal transitions.
    pub fn can_transition_to(self, next: CheckoutStatus) -> bool {
        self == CheckoutStatus::Pending && next != CheckoutStatus::Pending
    }
}

/// Durable record of checkout intent, written before the shopper is
/// redirected to the payment gateway and consumed by reconciliation.
///
/// Rows are never deleted; the expiry sweep and reconciliation only move
/// them to a terminal status, preserving the audit trail.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pending_checkouts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub idempotency_key: String,
    #[sea_orm(unique)]
    pub payment_reference: String,
    /// Versioned `CheckoutSnapshot`, serialized
    #[sea_orm(column_type = "Json")]
    pub checkout_data: Json,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub total_amount: Decimal,
    pub authorization_url: String,
    pub access_code: String,
    pub status: CheckoutStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn snapshot(&self) -> Result<CheckoutSnapshot, serde_json::Error> {
        serde_json::from_value(self.checkout_data.clone())
    }
}

/// Explicit, versioned snapshot of everything reconciliation needs to
/// build the order, captured at initiation time so later price or catalog
/// changes cannot alter what the customer paid for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSnapshot {
    pub version: u16,
    pub lines: Vec<SnapshotLine>,
    pub customer: CustomerDetails,
    pub shipping_address: String,
    pub billing_address: String,
    pub payment_method: String,
    pub notes: Option<String>,
    pub total_amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub variant_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub name: String,
    pub email: String,
    pub phone: String,
}
