//! shipit API server.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use shipit_api::{AppState, routes};
use shipit_config::SystemConfig;
use shipit_core::job::QueueName;
use shipit_core::processor::Processor;
use shipit_generator::{CleanupProcessor, FsTemplateStore, GenerationProcessor, ProcessShellRunner};
use shipit_queue::QueueManager;
use shipit_worker::WorkerPool;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = match std::env::var("SHIPIT_CONFIG") {
        Ok(path) => {
            info!(path, "loading configuration");
            shipit_config::load_system_config(Path::new(&path))?
        }
        Err(_) => {
            info!("SHIPIT_CONFIG not set, using defaults");
            SystemConfig::default()
        }
    };

    tokio::fs::create_dir_all(&config.workspace_root).await?;

    // Queue registry and control plane
    let manager = Arc::new(QueueManager::from_config(&config));

    // Domain processors
    let templates = Arc::new(FsTemplateStore::new(config.templates_root.clone()));
    let shell = Arc::new(ProcessShellRunner::new(Duration::from_secs(
        config.shell_timeout_secs,
    )));
    let generation: Arc<dyn Processor> = Arc::new(GenerationProcessor::new(
        templates,
        shell,
        config.workspace_root.clone(),
    ));
    let cleanup: Arc<dyn Processor> =
        Arc::new(CleanupProcessor::new(config.workspace_root.clone()));

    // One worker pool per queue with a registered processor
    let mut pools = Vec::new();
    for processor in [generation, cleanup] {
        let queue = manager.queue(processor.queue())?.clone();
        pools.push(WorkerPool::spawn(
            queue,
            processor,
            manager.shutdown_signal(),
        ));
    }
    let idle: Vec<QueueName> = QueueName::ALL
        .into_iter()
        .filter(|q| !matches!(q, QueueName::Generation | QueueName::Cleanup))
        .collect();
    info!(?idle, "queues without a registered processor stay idle");

    // Build router
    let state = AppState::new(manager.clone());
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    info!(listen = %config.listen, "starting server");
    let listener = TcpListener::bind(&config.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Drain: no new claims, wait for active jobs, then close.
    manager
        .drain_and_close(Duration::from_secs(config.drain_timeout_secs))
        .await;
    for pool in pools {
        pool.join().await;
    }
    info!("shutdown complete");

    Ok(())
}
