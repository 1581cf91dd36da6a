//! HTTP server bootstrap for the provenance server.
//!
//! This module wires together:
//! - configuration
//! - the SQLite connection pool and migrations
//! - record and fraud evidence stores, the fraud evaluation service
//! - the Axum router

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderName, Method};
use axum::routing::get;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::fraud::{FraudEngine, FraudService, FraudThresholds};
use crate::infra::sqlite::open_pool;
use crate::infra::{os_shutdown_signal, SqliteEvidenceStore, SqliteRecordStore};
use crate::metrics::MetricsRegistry;
use crate::telemetry::{init_telemetry, TelemetryConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL.
    pub database_url: String,
    /// Server listen address.
    pub listen_addr: SocketAddr,
    /// Maximum database connections.
    pub max_connections: u32,
    /// Apply embedded migrations before serving.
    pub migrate_on_startup: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://provenance-server.db".to_string());

        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {host}:{port}: {e}"))?;

        let max_connections: u32 = std::env::var("MAX_DB_CONNECTIONS")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5);

        let migrate_on_startup = std::env::var("DB_MIGRATE_ON_STARTUP")
            .ok()
            .map(|v| {
                !matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "0" | "false" | "off"
                )
            })
            .unwrap_or(true);

        Ok(Self {
            database_url,
            listen_addr,
            max_connections,
            migrate_on_startup,
        })
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub records: Arc<SqliteRecordStore>,
    pub evidence: Arc<SqliteEvidenceStore>,
    pub fraud: FraudService,
    pub metrics: Arc<MetricsRegistry>,
}

impl AppState {
    /// Build the state over a migrated server database
    pub fn new(pool: SqlitePool, thresholds: FraudThresholds) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let records = Arc::new(SqliteRecordStore::new(pool.clone()));
        let evidence = Arc::new(SqliteEvidenceStore::new(pool));
        let fraud = FraudService::new(FraudEngine::new(thresholds), evidence.clone())
            .with_metrics(metrics.clone());

        Self {
            records,
            evidence,
            fraud,
            metrics,
        }
    }
}

/// Start the HTTP server.
pub async fn run() -> anyhow::Result<()> {
    init_telemetry(&TelemetryConfig::from_env())
        .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {e}"))?;

    info!("Starting provenance server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Max connections: {}", config.max_connections);

    info!("Opening SQLite database...");
    let pool = open_pool(&config.database_url, config.max_connections).await?;

    if config.migrate_on_startup {
        info!("Running database migrations...");
        crate::migrations::run_server(&pool).await?;
        info!("Database migrations applied");
    } else {
        info!("DB migrations skipped (DB_MIGRATE_ON_STARTUP=0)");
    }

    let thresholds = FraudThresholds::from_env();
    info!(
        home_radius_km = thresholds.home_radius_km,
        max_speed_kmh = thresholds.max_speed_kmh,
        flag_threshold = thresholds.flag_threshold,
        "Fraud thresholds loaded"
    );

    let state = AppState::new(pool, thresholds);
    let app = build_router().with_state(state);

    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    info!("Provenance server is ready to accept connections");
    axum::serve(listener, app)
        .with_graceful_shutdown(os_shutdown_signal())
        .await?;

    info!("Provenance server stopped");
    Ok(())
}

/// Router with every route, CORS and request tracing. State is supplied by
/// the caller.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api", crate::api::router())
        .nest("/functions", crate::api::functions_router())
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_export))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

/// Any origin may call the fraud boundary from a browser
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ])
}

/// Health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "service": "provenance-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness check endpoint.
async fn readiness_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<axum::Json<serde_json::Value>, (axum::http::StatusCode, String)> {
    match state.records.ping().await {
        Ok(()) => Ok(axum::Json(serde_json::json!({
            "status": "ready",
            "database": "connected",
        }))),
        Err(e) => Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            format!("Database unavailable: {}", e),
        )),
    }
}

/// Prometheus text exposition.
async fn metrics_export(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> ([(HeaderName, &'static str); 1], String) {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus().await,
    )
}
