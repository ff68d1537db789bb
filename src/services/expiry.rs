use crate::{
    entities::pending_checkout::{self, CheckoutStatus, Entity as PendingCheckoutEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, instrument};

/// Retires stale pending checkouts in bulk.
///
/// The sweep is advisory cleanup: reconciliation re-checks expiry on its
/// own row, so a checkout that slips past an interval is still handled
/// correctly when its confirmation arrives.
#[derive(Clone)]
pub struct ExpirySweeper {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender, interval_secs: u64) -> Self {
        Self {
            db,
            event_sender,
            interval: Duration::from_secs(interval_secs),
        }
    }

    /// One bulk transition of every overdue pending checkout to expired.
    /// The status filter keeps the sweep from touching rows a concurrent
    /// reconcile has already moved to a terminal state.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<u64, ServiceError> {
        let result = PendingCheckoutEntity::update_many()
            .col_expr(
                pending_checkout::Column::Status,
                Expr::value(CheckoutStatus::Expired),
            )
            .filter(pending_checkout::Column::Status.eq(CheckoutStatus::Pending))
            .filter(pending_checkout::Column::ExpiresAt.lt(Utc::now()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            info!(count = result.rows_affected, "expired pending checkouts");
            self.event_sender
                .send(Event::CheckoutsExpired {
                    count: result.rows_affected,
                })
                .await;
        }
        Ok(result.rows_affected)
    }

    /// Background loop, spawned once at startup.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "expiry sweep failed");
            }
        }
    }
}
