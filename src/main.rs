use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_urla_api::config::{Config, StorageBackend};
use rust_urla_api::db::Database;
use rust_urla_api::db_storage::PgStore;
use rust_urla_api::handlers::{self, AppState};
use rust_urla_api::memory_store::MemoryStore;
use rust_urla_api::store::ApplicationStore;

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Storage backend (Postgres with migrations, or in-memory).
/// - HTTP routes and middleware (CORS, body limit, rate limiting).
///
/// It then starts the Axum server.
///
/// # Returns
///
/// * `anyhow::Result<()>` - Ok if the server runs successfully, or an error if
///   initialization fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_urla_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    let store: Arc<dyn ApplicationStore> = match config.storage_backend {
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL required for postgres backend"))?;
            let db = Database::new(url, config.db_max_connections).await?;
            tracing::info!("Database connection pool established");
            Arc::new(PgStore::new(db.pool))
        }
        StorageBackend::Memory => {
            let store = MemoryStore::new();
            // Employees are provisioned outside this service; seed one for local use
            let employee = store
                .seed_employee("loan.officer@localhost", "Local", "Officer")
                .map_err(|e| anyhow::anyhow!("seeding employee: {}", e))?;
            tracing::warn!(
                "Using in-memory storage, data is lost on restart. Seeded employee {}",
                employee.id
            );
            Arc::new(store)
        }
    };

    // Build application state
    let app_state = Arc::new(AppState::new(store, config.clone()));

    // Configure per-IP rate limiter
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(config.rate_limit_per_second)
            .burst_size(config.rate_limit_burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );

    // Build protected routes with security layers
    let protected_routes = handlers::api_routes().layer(
        ServiceBuilder::new()
            // Request size limit (prevents memory exhaustion)
            .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
