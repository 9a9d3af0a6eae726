pub mod config;
pub mod routes;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use nearwatch_core::alerts::AlertLifecycleManager;
use nearwatch_core::crypto::EmailCipher;
use nearwatch_core::gate::SubmissionGate;
use nearwatch_core::settings::SettingsCache;
use nearwatch_core::store::Store;
use nearwatch_core::submissions::{FeedbackService, ReportService};
use nearwatch_shared::clients::queue::JobQueue;
use nearwatch_shared::middleware::metrics_middleware;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub settings: Arc<SettingsCache>,
    pub reports: ReportService,
    pub feedback: FeedbackService,
    pub alerts: AlertLifecycleManager,
    pub queue: Arc<dyn JobQueue>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire the core services over one store.
    pub fn assemble<S: Store + 'static>(
        store: Arc<S>,
        cipher: Arc<dyn EmailCipher>,
        queue: Arc<dyn JobQueue>,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self {
        let settings = Arc::new(SettingsCache::new(store.clone()));
        let gate = Arc::new(SubmissionGate::new(store.clone(), settings.clone()));
        Self {
            reports: ReportService::new(store.clone(), gate.clone()),
            feedback: FeedbackService::new(store.clone(), gate.clone()),
            alerts: AlertLifecycleManager::new(store.clone(), gate, settings.clone(), cipher),
            store,
            settings,
            queue,
            metrics_handle,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route(
            "/settings",
            get(routes::admin::get_settings).put(routes::admin::update_settings),
        );

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        .route("/reports", post(routes::reports::create_report))
        .route("/reports/:id", delete(routes::reports::delete_report))
        .route(
            "/alerts",
            post(routes::alerts::create_alert).get(routes::alerts::list_alerts),
        )
        .route("/alerts/verify", get(routes::alerts::verify_email))
        .route(
            "/alerts/:id",
            put(routes::alerts::update_alert).delete(routes::alerts::delete_alert),
        )
        .route("/feedback", post(routes::feedback::create_feedback))
        .route("/feedback/:id", delete(routes::feedback::delete_feedback))
        .route("/push-subscriptions", post(routes::push::register_subscription))
        .nest("/admin", admin_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
