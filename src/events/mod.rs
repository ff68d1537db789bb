//! In-process event channel.
//!
//! Services emit events after their transactions commit; the consumer task
//! dispatches notifications. The channel is the boundary that makes a
//! notification failure structurally incapable of rolling back an order.

use crate::notifications;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// A reconciled payment produced an order
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        customer_email: String,
    },
    /// The gateway reported a failed charge for a pending checkout
    PaymentFailed { payment_reference: String },
    /// The sweep retired stale pending checkouts
    CheckoutsExpired { count: u64 },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event; failures are logged and swallowed because event
    /// delivery is best-effort by contract.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!(error = %e, "event channel closed, dropping event");
        }
    }
}

/// Consumer loop, spawned once at startup.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated {
                order_number,
                customer_email,
                ..
            } => {
                if let Err(e) =
                    notifications::send_order_confirmation(&order_number, &customer_email).await
                {
                    warn!(%order_number, error = %e, "order confirmation dispatch failed");
                }
            }
            Event::PaymentFailed { payment_reference } => {
                info!(%payment_reference, "payment failed");
            }
            Event::CheckoutsExpired { count } => {
                info!(count, "expired pending checkouts retired");
            }
        }
    }
}
