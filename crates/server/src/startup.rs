use crate::config::Settings;
use crate::routes::router;
use crate::state::{AppState, ModelState};
use anyhow::Context;
use artifacts::PurgeScope;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;

/// Load the detection model, or fall back to degraded mode when allowed.
#[cfg(feature = "ort-backend")]
pub fn load_model(settings: &Settings) -> anyhow::Result<ModelState> {
    use detector::DetectionEngine;

    match DetectionEngine::load(settings.detector.engine.clone()) {
        Ok(engine) => Ok(ModelState::Ready(Arc::new(engine))),
        Err(e) if !settings.detector.require_model => {
            tracing::error!(error = %e, "Model unavailable, starting in degraded mode");
            Ok(ModelState::Unavailable(e.to_string()))
        }
        Err(e) => Err(e).context("model load failed"),
    }
}

#[cfg(not(feature = "ort-backend"))]
pub fn load_model(settings: &Settings) -> anyhow::Result<ModelState> {
    let reason = "built without an inference backend".to_string();
    if settings.detector.require_model {
        anyhow::bail!(reason);
    }
    tracing::error!(%reason, "Starting in degraded mode");
    Ok(ModelState::Unavailable(reason))
}

/// Periodically purge expired artifacts. Returns `None` when disabled.
pub fn spawn_sweeper(state: &AppState, interval_secs: u64) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }

    let health = Arc::clone(&state.health);
    let period = Duration::from_secs(interval_secs);

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // First tick fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let scope = PurgeScope::OlderThan(health.default_max_age());
            let health = Arc::clone(&health);
            match tokio::task::spawn_blocking(move || health.cleanup(scope)).await {
                Ok(Ok(report)) => {
                    tracing::debug!(removed = report.removed, "Scheduled cleanup finished")
                }
                Ok(Err(e)) => tracing::warn!(error = %e, "Scheduled cleanup failed"),
                Err(e) => tracing::error!(error = %e, "Scheduled cleanup task panicked"),
            }
        }
    }))
}

/// Bind the listener and serve until Ctrl-C or SIGTERM.
pub async fn run_server(settings: &Settings, state: AppState) -> anyhow::Result<()> {
    let sweeper = spawn_sweeper(&state, settings.server.cleanup_interval_secs);
    let intake = state.orchestrator.intake();

    tracing::info!(
        max_upload_mb = intake.max_file_size() / (1024 * 1024),
        allowed_types = %intake.allowed_extensions().join(", "),
        model_loaded = state.model.is_loaded(),
        "Detection service configured"
    );

    let app = router(state.clone(), settings.body_limit());

    let addr = settings.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    tracing::info!("HTTP server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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
