use crate::config::AppConfig;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr, Schema};
use std::time::Duration;
use tracing::info;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool to the database
pub async fn establish_connection(database_url: &str) -> Result<DbPool, DbErr> {
    let mut opts = ConnectOptions::new(database_url.to_owned());
    opts.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    // sqlx gives every pooled connection its own database for an
    // in-memory sqlite URL, so the pool must stay at a single connection.
    if database_url.starts_with("sqlite::memory:") {
        opts.max_connections(1).min_connections(1);
    }

    let db = Database::connect(opts).await?;
    info!("database connection established");
    Ok(db)
}

pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, DbErr> {
    establish_connection(&cfg.database_url).await
}

/// Creates any missing tables from the entity definitions.
///
/// Used for sqlite and development databases; production deployments run
/// SQL migrations out of band. The uniqueness constraints declared on the
/// entities (idempotency key, payment reference, order number, webhook
/// event id) are part of the schema this produces, and the reconciliation
/// logic depends on them.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    use crate::entities::{
        customer, order, order_item, payment, pending_checkout, product_variant, webhook_event,
    };
    use sea_orm::ConnectionTrait;

    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut statements = vec![
        schema.create_table_from_entity(product_variant::Entity),
        schema.create_table_from_entity(customer::Entity),
        schema.create_table_from_entity(pending_checkout::Entity),
        schema.create_table_from_entity(order::Entity),
        schema.create_table_from_entity(order_item::Entity),
        schema.create_table_from_entity(payment::Entity),
        schema.create_table_from_entity(webhook_event::Entity),
    ];

    for stmt in statements.iter_mut() {
        stmt.if_not_exists();
        db.execute(backend.build(&*stmt)).await?;
    }

    Ok(())
}
