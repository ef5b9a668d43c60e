//! Worker daemon entry point.
//!
//! Loads configuration, opens the store, recovers interrupted work, starts
//! the worker pools, and runs until ctrl-c.

use tracing_subscriber::EnvFilter;

use ledgerix::config::Config;
use ledgerix::runtime::{recovery, spawn_workers};
use ledgerix::App;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(
        mode = %config.simulation_mode,
        model = %config.model,
        db = %config.database_path,
        "starting simulation core"
    );

    let app = match App::build(config) {
        Ok(app) => app,
        Err(e) => {
            tracing::error!("startup failed: {e}");
            std::process::exit(1);
        }
    };

    match recovery::recover(&app.ctx).await {
        Ok(report) => tracing::info!(
            released_jobs = report.released_jobs,
            rescheduled_batches = report.rescheduled_batches,
            "recovery complete"
        ),
        Err(e) => tracing::error!("recovery failed: {e}"),
    }

    let workers = spawn_workers(&app.ctx);
    tracing::info!(workers = workers.len(), "worker pools running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("signal listener failed: {e}");
    }
    tracing::info!("shutting down");
    app.shutdown();
    for handle in &workers {
        handle.abort();
    }
    let _ = futures::future::join_all(workers).await;
}
