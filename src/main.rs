use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use site_inspect_queue::{
    app_state::AppState,
    config::AppConfig,
    db::{self, audit_queries::PgAuditWriter, queries::PgJobStore},
    routes,
    services::{
        audit::AuditSink,
        notify::{JobNotifier, LocalNotifier, RedisNotifier},
        queue::QueueClient,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing site-inspect-queue API server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("jobs_enqueued_total", "Total jobs accepted by the queue");
    metrics::describe_counter!(
        "audit_events_dropped_total",
        "Audit events dropped because the queue was full"
    );

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let notifier: Arc<dyn JobNotifier> = match config.redis_url.as_deref() {
        Some(url) => {
            tracing::info!("Using Redis for worker wake-ups");
            Arc::new(RedisNotifier::new(url).expect("Failed to initialize Redis notifier"))
        }
        None => {
            tracing::info!("REDIS_URL not set, workers will poll");
            Arc::new(LocalNotifier::new())
        }
    };

    let (audit, audit_tasks) = AuditSink::spawn(
        Arc::new(PgAuditWriter::new(db_pool.clone())),
        config.audit_buffer,
        config.audit_workers,
    );

    let store = Arc::new(PgJobStore::new(db_pool.clone()));
    let queue = QueueClient::new(store, notifier).with_audit(audit);
    let state = AppState::new(db_pool, queue);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/jobs", post(routes::jobs::enqueue_job))
        .route("/api/v1/jobs/{job_id}", get(routes::jobs::get_job_status))
        .with_state(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");

    // Serving consumed the router and with it the last sink handle, so the
    // writers flush what is buffered and exit.
    for task in audit_tasks {
        let _ = task.await;
    }

    tracing::info!("Server stopped");
}
