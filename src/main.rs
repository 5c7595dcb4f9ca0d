use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use shopbook::clock::SystemClock;
use shopbook::config::AppConfig;
use shopbook::db;
use shopbook::handlers;
use shopbook::services::booking::SlotLocks;
use shopbook::services::collaborators::{
    InMemoryCatalog, InMemoryOverrides, InMemoryPaymentGateway, InMemoryPointLedger, LogNotifier,
    Notifier, WebhookNotifier,
};
use shopbook::services::sweeper;
use shopbook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    let catalog = if config.catalog_path.is_empty() {
        tracing::warn!("CATALOG_PATH not set; starting with an empty catalog");
        InMemoryCatalog::new()
    } else {
        let catalog = InMemoryCatalog::from_file(&config.catalog_path)?;
        tracing::info!(path = %config.catalog_path, shops = catalog.shop_count(), "catalog loaded");
        catalog
    };

    let notifier: Arc<dyn Notifier> = if config.notify_webhook_url.is_empty() {
        tracing::info!("no NOTIFY_WEBHOOK_URL; notifications are logged only");
        Arc::new(LogNotifier)
    } else {
        tracing::info!(url = %config.notify_webhook_url, "posting notifications to webhook");
        Arc::new(WebhookNotifier::new(config.notify_webhook_url.clone()))
    };

    let clock = Arc::new(SystemClock);
    let (events_tx, _) = broadcast::channel(256);

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        clock: clock.clone(),
        catalog: Arc::new(catalog),
        payments: Arc::new(InMemoryPaymentGateway::new()),
        points: Arc::new(InMemoryPointLedger::new(clock)),
        notifier,
        overrides: Arc::new(InMemoryOverrides::new()),
        slot_locks: SlotLocks::new(),
        events_tx,
    });

    sweeper::spawn(Arc::clone(&state));
    tracing::info!(
        every_secs = config.sweep_interval_secs,
        grace_minutes = config.no_show_grace_minutes,
        "no-show sweep scheduled"
    );

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
