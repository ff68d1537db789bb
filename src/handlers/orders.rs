use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, ModelTrait, QueryFilter};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus},
        order_item,
    },
    errors::ServiceError,
    AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub variant_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub payment_reference: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub customer_name: String,
    pub customer_email: String,
    pub shipping_address: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
}

/// GET /api/v1/orders/{id}
///
/// Accepts either an order UUID or a human-facing order number.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = String, Path, description = "Order UUID or order number")),
    responses(
        (status = 200, description = "Order found", body = OrderResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = match Uuid::parse_str(&id) {
        Ok(uuid) => OrderEntity::find_by_id(uuid).one(&*state.db).await?,
        Err(_) => {
            OrderEntity::find()
                .filter(order::Column::OrderNumber.eq(&id))
                .one(&*state.db)
                .await?
        }
    };

    let order =
        order.ok_or_else(|| ServiceError::NotFound(format!("order {id} not found")))?;

    let items = order
        .find_related(order_item::Entity)
        .all(&*state.db)
        .await?;

    let response = OrderResponse {
        id: order.id,
        order_number: order.order_number,
        payment_reference: order.payment_reference,
        status: order.status,
        payment_status: order.payment_status,
        customer_name: order.customer_name,
        customer_email: order.customer_email,
        shipping_address: order.shipping_address,
        total_amount: order.total_amount,
        currency: order.currency,
        created_at: order.created_at,
        items: items
            .into_iter()
            .map(|item| OrderItemResponse {
                variant_id: item.variant_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total_price: item.total_price,
            })
            .collect(),
    };

    Ok((StatusCode::OK, Json(response)))
}
