use clap::Parser;
use exportgen_server::server::{
    config::{CliArgs, ServerConfig},
    service::{router, state::AppState},
    telemetry::{TelemetryProviders, init_telemetry},
};
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config);

    let state = AppState::new(config);
    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal(state, providers))
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting export service on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting export service on {} (default size {}MB, delay {}ms, throttle {}KB/s)",
            config.server_addr,
            config.default_size_mb,
            config.default_delay_ms,
            config.default_throttle_kbps
        );
    }
    tracing::info!(
        "Example: curl -o export.zip \"http://{}/exports/test/download?sizeMB=10\"",
        config.server_addr
    );
}

async fn shutdown_signal(state: AppState, providers: TelemetryProviders) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Refuse new downloads, drain, then cancel the rest
    state.shutdown().await;

    // 2. Flush exporters
    providers.shutdown();
}
