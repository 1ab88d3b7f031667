use std::sync::Arc;

use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use wanotify_backend::config::ServerConfig;
use wanotify_backend::db::services::{CampaignService, TemplateService};
use wanotify_backend::gateway::twilio::TwilioGateway;
use wanotify_backend::queue::JobQueue;
use wanotify_backend::server::broadcaster::ProgressBroadcaster;
use wanotify_backend::version::VERSION;
use wanotify_backend::web::{AppState, build_router};
use wanotify_backend::worker::CampaignWorker;

fn init_logging() {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily("logs", "server.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("Server version: {VERSION}");
        return Ok(());
    }

    init_logging();
    info!("Starting campaign dispatch server, version: {}", VERSION);
    dotenv().ok();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load server configuration: {}", e);
            return Err(e.into());
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database connected and migrations applied");

    let broadcaster = Arc::new(ProgressBroadcaster::new());
    let queue = JobQueue::new(pool.clone());
    let campaigns = CampaignService::new(pool.clone());
    let templates = TemplateService::new(pool.clone());
    let gateway = Arc::new(TwilioGateway::new(config.twilio.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = Arc::new(CampaignWorker::new(
        Arc::new(campaigns.clone()),
        gateway,
        queue.clone(),
        broadcaster.clone(),
        config.worker.clone(),
    ));
    let worker_handles = worker.spawn(shutdown_rx.clone());
    info!(consumers = config.worker.concurrency, "campaign workers started");

    let listen_addr = config.listen_addr;
    let state = Arc::new(AppState {
        config,
        pool,
        campaigns,
        templates,
        queue,
        broadcaster,
    });
    let router = build_router(state);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("HTTP server listening on {}", listen_addr);

    let mut serve_shutdown = shutdown_rx.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = serve_shutdown.changed().await;
        })
        .await?;

    for handle in worker_handles {
        let _ = handle.await;
    }
    info!("Server stopped");
    Ok(())
}
