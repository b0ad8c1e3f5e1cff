use registry_core::observability::init_tracing;
use registry_service::config::RegistryConfig;
use registry_service::services::init_metrics;
use registry_service::startup::{build_state, Application};
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = RegistryConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        "registry-service",
        &config.server.log_level,
        config.server.otlp_endpoint.as_deref(),
    );

    init_metrics().map_err(|e| std::io::Error::other(format!("Metrics error: {}", e)))?;

    let port = config.server.port;
    let state = build_state(config)
        .await
        .map_err(|e| std::io::Error::other(format!("Startup error: {}", e)))?;

    let application = Application::build_with_state(state, port, shutdown_signal())
        .await
        .map_err(|e| std::io::Error::other(format!("Startup error: {}", e)))?;

    application.run_until_stopped().await
}
