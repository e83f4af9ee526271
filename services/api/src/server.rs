use crate::cli::ServeArgs;
use crate::infra::AppState;
use crate::routes::with_lead_routes;
use axum::{Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use leadflow::config::AppConfig;
use leadflow::error::AppError;
use leadflow::telemetry;
use leadflow::workflows::leads::{
    InMemoryStore, LeadIntakeService, LeadStore, SchedulerSettings, SqliteStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(database) = args.database.take() {
        config.storage.database_path = Some(database);
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let settings = config.scheduling.settings();
    let app = match &config.storage.database_path {
        Some(path) => {
            info!(path = %path.display(), "opening sqlite lead store");
            router_for(Arc::new(SqliteStore::open(path)?), settings)
        }
        None => router_for(Arc::new(InMemoryStore::new()), settings),
    }
    .layer(Extension(app_state))
    .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        lookahead_days = settings.lookahead_days,
        "lead routing service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

/// One store backs leads, calendars and the audit trail.
fn router_for<S>(store: Arc<S>, settings: SchedulerSettings) -> Router
where
    S: LeadStore + 'static,
{
    let service = LeadIntakeService::new(Arc::clone(&store), store, settings);
    with_lead_routes(Arc::new(service))
}
