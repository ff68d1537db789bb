use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventStatus {
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "processed")]
    Processed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "unhandled")]
    Unhandled,
    #[sea_orm(string_value = "duplicate")]
    Duplicate,
}

/// Append-only ledger of gateway webhook deliveries.
///
/// The unique `event_id` column is the dedup mechanism: a row with status
/// `processing` is inserted before any business logic runs, so concurrent
/// redelivery observes it and records a separately keyed duplicate entry
/// instead of re-triggering the handler. Originals are never overwritten.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "webhook_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub event_id: String,
    pub event_type: String,
    #[sea_orm(nullable)]
    pub payment_reference: Option<String>,
    pub status: WebhookEventStatus,
    #[sea_orm(column_type = "Text")]
    pub raw_payload: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
