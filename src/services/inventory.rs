use crate::{
    entities::product_variant::{self, Entity as ProductVariantEntity},
    errors::ServiceError,
};
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// A single reservation line: how many units of which variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationLine {
    pub variant_id: Uuid,
    pub quantity: i32,
}

/// Service for stock reservation and release.
///
/// Every authoritative stock mutation is one conditional UPDATE evaluated
/// by the store, never an application-level read-then-write, so concurrent
/// callers cannot drive `stock_quantity` below zero. The service holds no
/// in-process locks; it is safe across multiple stateless instances.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Read-only stock check, for early UX feedback only. Never the gate
    /// to an authoritative reservation.
    #[instrument(skip(self))]
    pub async fn check(&self, variant_id: Uuid, quantity: i32) -> Result<bool, ServiceError> {
        let variant = ProductVariantEntity::find_by_id(variant_id)
            .filter(product_variant::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?;

        Ok(variant.is_some_and(|v| v.stock_quantity >= quantity))
    }

    /// Atomically reserves stock for a batch of lines.
    ///
    /// Each line issues `UPDATE ... SET stock_quantity = stock_quantity - q
    /// WHERE id = ? AND is_active AND stock_quantity >= q`. If a line
    /// affects zero rows, every decrement already applied in the batch is
    /// released before the `InsufficientStock` error surfaces, so a failed
    /// reservation leaves stock exactly where it started.
    #[instrument(skip(self, lines), fields(line_count = lines.len()))]
    pub async fn reserve(&self, lines: &[ReservationLine]) -> Result<(), ServiceError> {
        let mut applied: Vec<ReservationLine> = Vec::with_capacity(lines.len());

        for line in lines {
            let result = ProductVariantEntity::update_many()
                .col_expr(
                    product_variant::Column::StockQuantity,
                    Expr::col(product_variant::Column::StockQuantity).sub(line.quantity),
                )
                .filter(product_variant::Column::Id.eq(line.variant_id))
                .filter(product_variant::Column::IsActive.eq(true))
                .filter(product_variant::Column::StockQuantity.gte(line.quantity))
                .exec(&*self.db)
                .await?;

            if result.rows_affected == 0 {
                let available = ProductVariantEntity::find_by_id(line.variant_id)
                    .one(&*self.db)
                    .await?
                    .map(|v| v.stock_quantity)
                    .unwrap_or(0);

                error!(
                    variant_id = %line.variant_id,
                    requested = line.quantity,
                    available,
                    "reservation failed, rolling back applied lines"
                );
                self.release(&applied).await?;

                return Err(ServiceError::InsufficientStock(format!(
                    "variant {}: requested {}, available {}",
                    line.variant_id, line.quantity, available
                )));
            }

            applied.push(*line);
        }

        Ok(())
    }

    /// Unconditionally restores stock. Used to compensate a partially
    /// applied reservation and for cancellation/refund flows.
    #[instrument(skip(self, lines), fields(line_count = lines.len()))]
    pub async fn release(&self, lines: &[ReservationLine]) -> Result<(), ServiceError> {
        for line in lines {
            ProductVariantEntity::update_many()
                .col_expr(
                    product_variant::Column::StockQuantity,
                    Expr::col(product_variant::Column::StockQuantity).add(line.quantity),
                )
                .filter(product_variant::Column::Id.eq(line.variant_id))
                .exec(&*self.db)
                .await?;
        }

        if !lines.is_empty() {
            info!(line_count = lines.len(), "stock released");
        }
        Ok(())
    }
}
