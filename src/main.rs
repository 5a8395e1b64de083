use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use staydesk::config::ServerConfig;
use staydesk::engine::Engine;
use staydesk::feed::NotifyHub;
use staydesk::{api, housekeeping, observability};

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;
    info!("shutdown signal received, draining requests");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(
        Engine::new(config.journal_path(), notify)?.with_guest_auto_confirm(config.guest_auto_confirm),
    );

    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        housekeeping::run_compactor(compactor_engine, threshold).await;
    });

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("staydesk listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  rooms loaded: {}", engine.state.len());
    info!("  guest auto-confirm: {}", config.guest_auto_confirm);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, api::router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("staydesk stopped");
    Ok(())
}
