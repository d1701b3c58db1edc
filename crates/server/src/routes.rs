use crate::error::{ApiError, ValidationError};
use crate::health::{CleanupParams, CleanupReport, HealthReport};
use crate::model::ResponseEnvelope;
use crate::orchestrator::UploadedFile;
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Query, State,
        multipart::MultipartRejection,
        rejection::QueryRejection,
    },
    http::StatusCode,
    response::Html,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

const FILE_FIELD: &str = "file";
const INDEX_HTML: &str = include_str!("../assets/index.html");

pub fn router(state: AppState, body_limit: usize) -> Router {
    let layout = state.orchestrator.store().layout();
    let static_files = ServeDir::new(layout.static_root());
    let static_prefix = layout.url_prefix().to_string();

    Router::new()
        .route("/", get(index))
        .route("/api/detect", post(detect))
        .route("/health", get(health))
        .route("/cleanup", post(cleanup))
        .nest_service(&static_prefix, static_files)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn detect(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<ResponseEnvelope>), ApiError> {
    let engine = state.model.engine().ok_or(ApiError::ModelUnavailable)?;
    let mut multipart = multipart.map_err(|rejection| ApiError::Multipart {
        status: rejection.status(),
        message: rejection.body_text(),
    })?;

    let limit = state.orchestrator.intake().max_file_size();
    let files = read_uploads(&mut multipart, limit, state.max_batch_files).await?;
    if files.is_empty() {
        return Err(ValidationError::MissingFile.into());
    }

    let outcome = state.orchestrator.handle(engine, files).await;
    Ok((outcome.status, Json(outcome.envelope)))
}

/// Collect every `file` field, buffering at most `limit` bytes of each.
async fn read_uploads(
    multipart: &mut Multipart,
    limit: u64,
    max_files: usize,
) -> Result<Vec<UploadedFile>, ApiError> {
    let mut files = Vec::new();

    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        if files.len() == max_files {
            return Err(ApiError::TooManyFiles(max_files));
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);

        let mut data = Vec::new();
        let mut size = 0u64;
        while let Some(chunk) = field.chunk().await? {
            size += chunk.len() as u64;
            if size > limit {
                // Keep counting so validation sees the real size, but stop buffering
                data = Vec::new();
                continue;
            }
            data.extend_from_slice(&chunk);
        }

        files.push(UploadedFile {
            filename,
            content_type,
            data,
            size,
        });
    }

    Ok(files)
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.health.health(state.model.is_loaded());
    let status = if report.model_loaded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn cleanup(
    State(state): State<AppState>,
    params: Result<Query<CleanupParams>, QueryRejection>,
) -> Result<Json<CleanupReport>, ApiError> {
    let Query(params) = params.map_err(|rejection| ApiError::InvalidQuery(rejection.body_text()))?;
    let scope = params
        .into_scope(state.health.default_max_age())
        .map_err(ApiError::InvalidQuery)?;

    let health = state.health.clone();
    let report = tokio::task::spawn_blocking(move || health.cleanup(scope))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    tracing::info!(removed = report.removed, scope = ?scope, "Cleanup finished");
    Ok(Json(report))
}
