use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info};

use feedkeeper::rss::{
    start_dispatcher, start_scheduler, FetchOrchestrator, FetchPolicy, FetchQueue, HttpFetcher,
};
use feedkeeper::{Config, Database};

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    // Load configuration
    let config = match Config::load_with_env(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {config_path}: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = feedkeeper::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        feedkeeper::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    info!("feedkeeper {}", env!("CARGO_PKG_VERSION"));

    let db = match Database::open(&config.database.path).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let fetcher = match HttpFetcher::new(&config.fetcher) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!("Failed to create HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let orchestrator = Arc::new(
        FetchOrchestrator::new(Arc::new(db.clone()), Arc::new(fetcher))
            .with_policy(FetchPolicy::from(&config.scheduler))
            .with_dispatcher_config(&config.dispatcher),
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let (queue, dispatcher) =
        start_dispatcher(orchestrator.clone(), &config.dispatcher, shutdown_tx.subscribe());
    let queue: Arc<dyn FetchQueue> = Arc::new(queue);
    let scheduler = start_scheduler(
        orchestrator,
        queue,
        &config.scheduler,
        shutdown_tx.subscribe(),
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
    let _ = shutdown_tx.send(());

    if let Err(e) = scheduler.await {
        error!("Scheduler task failed: {}", e);
    }
    if let Err(e) = dispatcher.await {
        error!("Dispatcher task failed: {}", e);
    }

    db.close().await;
    info!("Shutdown complete");
    ExitCode::SUCCESS
}
