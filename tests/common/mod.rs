#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::Utc;
use madrush_api::{
    config::AppConfig,
    db,
    entities::product_variant,
    errors::ServiceError,
    events::{self, EventSender},
    gateway::{
        GatewayAuthorization, GatewayTransactionStatus, GatewayVerification, InitializeRequest,
        PaymentGateway,
    },
    services::checkout::{CartLineInput, CheckoutRequest},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const TEST_SECRET: &str = "sk_test_secret_key_for_tests";

/// Gateway double: approves every initialization by default and serves
/// verify responses from a programmable map.
pub struct MockGateway {
    pub init_calls: AtomicUsize,
    pub fail_initialize: Mutex<bool>,
    verifications: Mutex<HashMap<String, GatewayVerification>>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            init_calls: AtomicUsize::new(0),
            fail_initialize: Mutex::new(false),
            verifications: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_fail_initialize(&self, fail: bool) {
        *self.fail_initialize.lock().unwrap() = fail;
    }

    pub fn stub_verification(&self, verification: GatewayVerification) {
        self.verifications
            .lock()
            .unwrap()
            .insert(verification.reference.clone(), verification);
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initialize_transaction(
        &self,
        request: InitializeRequest,
    ) -> Result<GatewayAuthorization, ServiceError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_initialize.lock().unwrap() {
            return Err(ServiceError::PaymentGateway("gateway unavailable".into()));
        }
        Ok(GatewayAuthorization {
            authorization_url: format!("https://checkout.example.test/{}", request.reference),
            access_code: format!("ac_{}", request.reference),
            reference: request.reference,
        })
    }

    async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<GatewayVerification, ServiceError> {
        self.verifications
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| ServiceError::PaymentGateway("unknown transaction".into()))
    }
}

pub fn paid_verification(reference: &str, amount_minor: i64) -> GatewayVerification {
    GatewayVerification {
        status: GatewayTransactionStatus::Success,
        reference: reference.to_string(),
        amount_minor,
        currency: "NGN".to_string(),
        channel: Some("card".to_string()),
        fees_minor: Some(150),
        paid_at: Some(Utc::now()),
        metadata: None,
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        host: "127.0.0.1".into(),
        port: 18080,
        environment: "test".into(),
        log_level: "info".into(),
        log_json: false,
        auto_migrate: true,
        paystack_secret_key: TEST_SECRET.into(),
        paystack_base_url: "https://api.paystack.test".into(),
        gateway_timeout_secs: 5,
        currency: "NGN".into(),
        checkout_ttl_secs: 3600,
        expiry_sweep_interval_secs: 900,
        payment_callback_url: None,
    }
}

pub struct TestApp {
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub gateway: Arc<MockGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let cfg = Arc::new(test_config());
        let pool = db::establish_connection(&cfg.database_url)
            .await
            .expect("failed to create test database");
        db::ensure_schema(&pool).await.expect("schema bootstrap");
        let db = Arc::new(pool);

        let (tx, rx) = mpsc::channel(64);
        let event_sender = EventSender::new(tx);
        let event_task = tokio::spawn(events::process_events(rx));

        let gateway = MockGateway::new();
        let state = AppState::build(db.clone(), gateway.clone(), event_sender, cfg);

        Self {
            state,
            db,
            gateway,
            _event_task: event_task,
        }
    }
}

pub async fn seed_variant(
    db: &DatabaseConnection,
    sku: &str,
    price: Decimal,
    stock: i32,
) -> product_variant::Model {
    product_variant::ActiveModel {
        id: Set(Uuid::new_v4()),
        sku: Set(sku.to_string()),
        name: Set(format!("Test variant {sku}")),
        price: Set(price),
        stock_quantity: Set(stock),
        is_active: Set(true),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed variant")
}

pub fn checkout_request(variant_id: Uuid, quantity: i32, idempotency_key: &str) -> CheckoutRequest {
    CheckoutRequest {
        cart: vec![CartLineInput {
            variant_id,
            quantity,
        }],
        customer_name: "Ada Obi".into(),
        customer_email: "ada@example.test".into(),
        customer_phone: "+2348012345678".into(),
        shipping_address: "12 Marina Road, Lagos".into(),
        billing_address: None,
        payment_method: "card".into(),
        notes: None,
        idempotency_key: idempotency_key.to_string(),
    }
}
