// health-monitor-rs/src/main.rs
// Health Monitor - service orchestration and health reporting
// Port 8000 - HTTP entry point for probes and dashboards
//
// Startup sequence:
// - Load settings (.env, config file, HEALTH_* overrides)
// - Validate the service graph; configuration errors stop the process
// - Serve health endpoints while services are brought up in the background
// - Start per-service monitoring and the automation loop once startup ends

use std::sync::Arc;

use anyhow::Context;
use config_rs::Settings;
use error_handling::{init_logging, LoggingConfig};
use health_monitor::{api, app};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load settings")?;

    let _guard = init_logging(LoggingConfig {
        level: settings.logging.level.clone(),
        service_name: settings.server.service_name.clone(),
        json_format: settings.logging.json,
        log_dir: settings.logging.log_dir.clone(),
    })
    .context("Failed to initialize logging")?;

    let service_name = settings.server.service_name.clone();
    let addr = config_rs::get_bind_address(&service_name, settings.server.port);

    let app = Arc::new(app::build(settings).await?);
    info!(service = %service_name, order = ?app.startup_order, "Service graph validated");

    let startup_app = app.clone();
    let startup = tokio::spawn(async move {
        if let Err(e) = startup_app.run_startup().await {
            error!(error = %e, "Service startup aborted");
        }
    });

    app.state.automation.start().await;

    let router = api::router(app.state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Health monitor listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Shutting down");
    startup.abort();
    let _ = startup.await;
    app.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
