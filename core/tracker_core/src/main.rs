use clap::Parser;
use std::sync::Arc;
use tracing::info;

use tracker_core::{
    clock::{Clock, SystemClock},
    config::{parse_listen, resolve_webhook, settings_from_args, Args},
    oracle::BrowserMirror,
    queue::SequentialQueue,
    report::Reporter,
    server::{router, AppState},
    service::TrackerService,
    store::{KvStore, SqliteStore},
    tracker::Tracker,
    trigger::spawn_report_timer,
    webhook::WebhookSink,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracker_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let webhook = resolve_webhook(&args);
    let settings = settings_from_args(&args, &webhook);
    if !settings.webhook_configured {
        info!("webhook not configured; reports will fail until --webhook-url is set");
    }

    let store: Arc<dyn KvStore> = Arc::new(SqliteStore::open(&args.db)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mirror = Arc::new(BrowserMirror::new());
    let tracker = Arc::new(Tracker::new(
        mirror.clone(),
        store.clone(),
        clock.clone(),
        settings.tracker(),
    ));
    let reporter = Arc::new(Reporter::new(
        store.clone(),
        Arc::new(WebhookSink::new(webhook)?),
    ));
    let service = TrackerService::new(
        tracker,
        SequentialQueue::start(),
        mirror,
        reporter.clone(),
        store.clone(),
        clock.clone(),
    );

    let timer = spawn_report_timer(
        store,
        reporter,
        clock,
        settings.tracker().tz_offset,
        settings.report_check_period(),
    );

    let app = router(AppState {
        service: service.clone(),
        settings,
    });

    let addr = parse_listen(&args.listen)?;
    info!("Core listening on http://{addr}");
    info!("DB: {}", args.db.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    timer.abort();
    service.flush().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
