use anyhow::Context;
use common::{TelemetryGuard, setup_logging};
use server::{AppState, get_configuration, startup};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = get_configuration().context("failed to load configuration")?;

    // Providers must exist before the tracing bridge is installed
    let _telemetry = settings
        .otel_endpoint
        .as_deref()
        .map(TelemetryGuard::init)
        .transpose()?;
    setup_logging(settings.log_level, settings.environment);

    tracing::info!(
        environment = settings.environment.as_str(),
        model_path = %settings.detector.engine.model_path.display(),
        otel_endpoint = settings.otel_endpoint.as_deref().unwrap_or("disabled"),
        "Detection service starting"
    );

    let model = startup::load_model(&settings)?;
    let state = AppState::build(&settings, model).context("failed to open artifact store")?;

    startup::run_server(&settings, state).await
}
