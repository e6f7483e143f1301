//! Budget Tracker API Server
//!
//! REST API for multi-tenant budget tracking: budget lines, invoices,
//! contracts, organizational structure, alerts and reports.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

pub mod error;
pub mod extract;
pub mod reference_cache;
mod routes;
pub mod settings;

use alerting::AlertAggregator;
use auth::{SessionStore, SharedKey};
use data_validator::Validator;
use reference_cache::ReferenceCache;
use settings::{BootstrapSettings, LoggingSettings, Settings};
use storage::{Repository, StorageError};

/// Application state shared across handlers
pub struct AppState {
    /// Storage repository
    pub repository: Repository,
    /// Session tokens
    pub sessions: SessionStore,
    /// Reference data cache
    pub cache: ReferenceCache,
    /// Alert rules
    pub alerts: AlertAggregator,
    /// Payload validator
    pub validator: Validator,
    /// Key of the identity provider allowed to open sessions
    pub issuer_key: Option<SharedKey>,
    /// Key of the process operator
    pub operator_key: Option<SharedKey>,
    /// Prometheus exporter, when installed
    pub metrics: Option<PrometheusHandle>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
}

pub type SharedState = Arc<RwLock<AppState>>;

impl AppState {
    /// Create new application state
    pub fn new(settings: &Settings) -> Self {
        Self {
            repository: Repository::new(),
            sessions: SessionStore::new(settings.auth.session_ttl_hours),
            cache: ReferenceCache::new(settings.cache.ttl()),
            alerts: AlertAggregator::new(settings.alerts.clone()),
            validator: Validator::default(),
            issuer_key: settings.auth.issuer_key(),
            operator_key: settings.auth.operator_key(),
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Create the first organization and its admin if the repository is empty
    pub fn bootstrap(&self, bootstrap: &BootstrapSettings) -> Result<(), StorageError> {
        if self.repository.organization_count() > 0 {
            return Ok(());
        }

        let email = data_validator::normalizer::email(&bootstrap.admin_email);
        let admin = self.repository.ensure_user(&email, &bootstrap.admin_name)?;
        let (organization, _) = self
            .repository
            .create_organization(&bootstrap.organization, admin.id)?;

        info!(
            "Bootstrapped organization '{}' ({}) with admin {}",
            organization.name, organization.id, admin.email
        );
        Ok(())
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: ComponentStatus,
    pub metrics: SystemMetrics,
}

/// Component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub repository: ComponentHealth,
    pub cache: ComponentHealth,
    pub metrics_exporter: ComponentHealth,
}

/// Individual component health
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: String,
}

impl ComponentHealth {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }

    fn disabled() -> Self {
        Self {
            status: "disabled".to_string(),
        }
    }
}

/// System metrics
#[derive(Debug, Serialize)]
pub struct SystemMetrics {
    pub organization_count: usize,
    pub cached_entries: usize,
    pub active_sessions: usize,
}

/// Create the application router
pub fn create_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", routes::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let state = state.read().await;
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let response = HealthResponse {
        status: "healthy".to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: ComponentStatus {
            repository: ComponentHealth::ok(),
            cache: ComponentHealth::ok(),
            metrics_exporter: if state.metrics.is_some() {
                ComponentHealth::ok()
            } else {
                ComponentHealth::disabled()
            },
        },
        metrics: SystemMetrics {
            organization_count: state.repository.organization_count(),
            cached_entries: state.cache.len(),
            active_sessions: state.sessions.len(),
        },
    };

    Json(response)
}

/// Prometheus scrape endpoint
async fn metrics_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let state = state.read().await;
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics exporter not installed".to_string(),
        ),
    }
}

/// Initialize logging
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    // A subscriber may already be installed (tests, embedding).
    if result.is_err() {
        debug!("Tracing subscriber already installed");
    }
}

/// Run the server
pub async fn run_server(settings: Settings) -> anyhow::Result<()> {
    let mut state = AppState::new(&settings);

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => warn!("Prometheus exporter unavailable: {}", e),
    }

    if let Some(bootstrap) = &settings.bootstrap {
        state.bootstrap(bootstrap)?;
    }
    if state.issuer_key.is_none() {
        warn!("auth.issuer_key is not set; sessions can only be opened through invitations");
    }

    let state: SharedState = Arc::new(RwLock::new(state));
    spawn_purge(state.clone(), settings.cache.purge_interval());

    let app = create_router(state);
    let addr = settings.server.address();

    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Periodically drop expired cache entries and sessions
fn spawn_purge(state: SharedState, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            purge_expired(&*state.read().await);
        }
    });
}

fn purge_expired(state: &AppState) {
    let removed = state.cache.purge_expired();
    if removed > 0 {
        debug!("Purged {} expired cache entries", removed);
    }
    match state.sessions.purge_expired() {
        Ok(removed) if removed > 0 => debug!("Purged {} expired sessions", removed),
        Ok(_) => {}
        Err(e) => warn!("Session purge failed: {}", e),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
}
