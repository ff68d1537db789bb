//! Checkout-to-order reconciliation engine.
//!
//! Turns customer carts into payment sessions and confirmed gateway
//! payments into orders, exactly once, against an at-least-once webhook
//! feed and concurrent synchronous verification.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod notifications;
pub mod openapi;
pub mod services;

use axum::{response::Json, routing::get, Router};
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    config::AppConfig,
    events::EventSender,
    gateway::PaymentGateway,
    services::{
        checkout::CheckoutService, inventory::InventoryService,
        reconciliation::ReconciliationService, webhook::WebhookService,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: EventSender,
    pub inventory_service: InventoryService,
    pub checkout_service: CheckoutService,
    pub reconciliation_service: ReconciliationService,
    pub webhook_service: WebhookService,
}

impl AppState {
    /// Wires the service graph for a database, gateway and event channel.
    pub fn build(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        config: Arc<AppConfig>,
    ) -> Self {
        let inventory_service = InventoryService::new(db.clone());
        let checkout_service =
            CheckoutService::new(db.clone(), gateway.clone(), config.clone());
        let reconciliation_service = ReconciliationService::new(
            db.clone(),
            inventory_service.clone(),
            gateway,
            event_sender.clone(),
            config.clone(),
        );
        let webhook_service =
            WebhookService::new(db.clone(), reconciliation_service.clone(), config.clone());

        Self {
            db,
            config,
            event_sender,
            inventory_service,
            checkout_service,
            reconciliation_service,
            webhook_service,
        }
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    use utoipa::OpenApi;
    Json(openapi::ApiDoc::openapi())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "up",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Full application router: health probe plus the v1 API, with request
/// tracing attached.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest("/api/v1", handlers::api_v1_routes())
        .layer(TraceLayer::new_for_http())
        // Checkout initiation waits on the gateway; keep the cap above the
        // gateway timeout so its 502 wins over a blanket 408.
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
