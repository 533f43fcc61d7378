//! Innkeeper audit store admin daemon entry point.

use std::error::Error;
use std::sync::Arc;

use innkeeper_admin::config::Settings;
use innkeeper_admin::error::AppError;
use innkeeper_admin::routes;
use innkeeper_admin::state::AppState;
use innkeeper_core::aggregate::SchemaRegistry;
use innkeeper_event_store::scheduler::Scheduler;
use innkeeper_event_store::schema::install_schema;
use innkeeper_event_store::{AuditStore, PgAuditStorage};
use innkeeper_reservation::Reservation;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting Innkeeper audit admin");

    let settings = Settings::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.database_url)
        .await
        .map_err(AppError::from)?;
    install_schema(&pool).await.map_err(AppError::from)?;

    let store = Arc::new(AuditStore::new(
        PgAuditStorage::new(pool),
        SchemaRegistry::new().with::<Reservation>(),
        settings.store.clone(),
    ));
    // Provision the current month before accepting traffic.
    let provisioned = store.precreate(None).await.map_err(AppError::from)?;
    tracing::info!(created = ?provisioned.created, "partitions provisioned");

    let scheduler = Scheduler::spawn(Arc::clone(&store), settings.scheduler.clone());

    let app = routes::app(AppState::new(store)).layer(TraceLayer::new_for_http());

    let addr = settings.addr()?;
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(AppError::from)?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(AppError::from)?;

    scheduler.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
