use metrics_exporter_prometheus::PrometheusBuilder;
use site_inspect_queue::{
    config::AppConfig,
    db::{self, audit_queries::PgAuditWriter, domain_queries::PgDomainStore, queries::PgJobStore},
    models::payload::JobType,
    services::{
        ai::HttpAiClient,
        audit::AuditSink,
        dispatcher::Dispatcher,
        notify::{JobNotifier, LocalNotifier, RedisNotifier},
        photo_analysis::PhotoAnalysisHandler,
        registry::HandlerRegistry,
        storage::R2Client,
    },
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting inspection job worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = config.worker_metrics_addr.as_deref() {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        describe_worker_metrics();
        tracing::info!(%addr, "Serving worker metrics");
    }

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let photo_urls = R2Client::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
        config.photo_url_ttl_secs,
    )
    .expect("Failed to initialize R2 client");

    let ai = HttpAiClient::new(
        &config.ai_service_url,
        config.ai_api_token.as_deref(),
        config.ai_timeout(),
    )
    .expect("Failed to initialize AI client");

    let notifier: Arc<dyn JobNotifier> = match config.redis_url.as_deref() {
        Some(url) => Arc::new(RedisNotifier::new(url).expect("Failed to initialize Redis notifier")),
        None => Arc::new(LocalNotifier::new()),
    };

    let registry = HandlerRegistry::new().register(
        JobType::AnalyzePhoto,
        Arc::new(PhotoAnalysisHandler::new(
            Arc::new(PgDomainStore::new(db_pool.clone())),
            Arc::new(ai),
            Arc::new(photo_urls),
        )),
    );

    let (audit, audit_tasks) = AuditSink::spawn(
        Arc::new(PgAuditWriter::new(db_pool.clone())),
        config.audit_buffer,
        config.audit_workers,
    );

    let dispatcher = Dispatcher::new(
        Arc::new(PgJobStore::new(db_pool)),
        registry,
        notifier,
        config.dispatcher(),
    )
    .with_audit(audit);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received, draining in-flight jobs");
                cancel.cancel();
            }
        });
    }

    tracing::info!("Worker ready, starting job processing loop");
    Arc::new(dispatcher).run(cancel).await;

    // The dispatcher held the last sink handle, so the writers drain and exit.
    for task in audit_tasks {
        let _ = task.await;
    }

    tracing::info!("Worker stopped");
}

fn describe_worker_metrics() {
    metrics::describe_histogram!(
        "job_duration_seconds",
        "Time spent running a job handler"
    );
    metrics::describe_counter!("jobs_completed_total", "Total jobs completed");
    metrics::describe_counter!("jobs_failed_total", "Total jobs that failed permanently");
    metrics::describe_counter!("jobs_retried_total", "Total failed attempts returned to the queue");
    metrics::describe_counter!("jobs_reaped_total", "Total jobs recovered from expired leases");
    metrics::describe_counter!("violations_stored_total", "Total detected violations written");
    metrics::describe_counter!("audit_events_dropped_total", "Audit events dropped because the queue was full");
}
