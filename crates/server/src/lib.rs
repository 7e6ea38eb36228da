//! Journey HTTP service
//!
//! Webhook ingestion, journey reads, user checkpoint actions and the
//! realtime SSE stream on top of the journey crates.

pub mod config;
pub mod error;
pub mod routes;
pub mod signature;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use journey_automation::AutomationEngine;
use journey_core::TemplateCatalog;
use journey_progress::JourneyTracker;
use journey_realtime::Notifier;
use journey_storage::{JsonStore, MemoryStore, ProgressStore};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use config::{ServerConfig, StorageBackend};

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Automation engine (also owns the tracker and notifier)
    pub engine: Arc<AutomationEngine>,
    /// Webhook HMAC secret
    pub webhook_secret: Option<Arc<str>>,
    /// Bound on non-streaming requests
    pub request_timeout: Duration,
    /// SSE keep-alive interval
    pub keep_alive: Duration,
}

impl AppState {
    /// Journey reader.
    pub fn tracker(&self) -> &JourneyTracker {
        self.engine.tracker()
    }

    /// Realtime notifier.
    pub fn notifier(&self) -> &Notifier {
        self.engine.notifier()
    }
}

/// Open the store.
pub async fn open_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn ProgressStore>> {
    let store: Arc<dyn ProgressStore> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Json => Arc::new(
            JsonStore::new(&config.storage.data_dir)
                .await
                .with_context(|| {
                    format!("opening data dir {}", config.storage.data_dir.display())
                })?,
        ),
    };
    Ok(store)
}

/// Load the template catalog: the configured file, or the built-ins.
pub fn load_catalog(config: &ServerConfig) -> anyhow::Result<TemplateCatalog> {
    match &config.webhooks.templates_path {
        Some(path) => TemplateCatalog::from_json_file(path)
            .with_context(|| format!("loading templates from {}", path.display())),
        None => Ok(TemplateCatalog::builtin()),
    }
}

/// Wire store, catalog, notifier and engine together.
pub async fn build_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let store = open_store(config).await?;
    let catalog = Arc::new(load_catalog(config)?);
    info!(
        backend = ?config.storage.backend,
        journeys = catalog.len(),
        "progress store ready"
    );

    let tracker = JourneyTracker::new(store, catalog);
    let notifier = Notifier::new((&config.realtime).into());
    let engine = AutomationEngine::new(tracker, notifier, (&config.automation).into());

    Ok(AppState {
        engine: Arc::new(engine),
        webhook_secret: config.webhooks.secret.as_deref().map(Arc::from),
        request_timeout: config.server.request_timeout(),
        keep_alive: config.server.keep_alive(),
    })
}

/// Create the HTTP router.
pub fn create_router(state: AppState) -> Router {
    let bounded = Router::new()
        .route("/health", get(routes::health::health))
        // Journey read and user actions
        .route("/api/journeys", get(routes::journeys::list_templates))
        .route(
            "/api/journeys/{journey_id}/users/{user_id}",
            get(routes::journeys::get_journey),
        )
        .route(
            "/api/journeys/{journey_id}/users/{user_id}/phases/{phase_id}/checkpoints/{checkpoint_id}",
            get(routes::journeys::get_checkpoint),
        )
        .route(
            "/api/journeys/{journey_id}/users/{user_id}/checkpoints/{checkpoint_id}/{action}",
            post(routes::journeys::checkpoint_action),
        )
        // Webhooks
        .route("/api/webhooks/events", post(routes::webhooks::generic_event))
        .route(
            "/api/webhooks/business-registration",
            post(routes::webhooks::business_registration),
        )
        .route("/api/webhooks/bank-account", post(routes::webhooks::bank_account))
        .route("/api/webhooks/job-application", post(routes::webhooks::job_application))
        .layer(TimeoutLayer::new(state.request_timeout));

    // The stream stays open until the client leaves.
    let streaming = Router::new().route("/api/progress/realtime", get(routes::realtime::stream));

    bounded
        .merge(streaming)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
