use crate::error::PipelineError;
use crate::intake::IntakeValidator;
use crate::locks::NameLocks;
use crate::model::{DetectionResult, FileError, ResponseEnvelope};
use artifacts::{ArtifactStore, Lease, MediaKind, UploadRecord};
use axum::http::StatusCode;
use chrono::Utc;
use detector::{DetectionEngine, DetectorError};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A `file` field as read from the request body.
///
/// `data` is left empty once `size` crosses the upload limit.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
    pub size: u64,
}

pub struct BatchOutcome {
    pub status: StatusCode,
    pub envelope: ResponseEnvelope,
}

/// Results of one file plus the leases keeping its outputs out of purges.
struct ProcessedFile {
    results: Vec<DetectionResult>,
    leases: Vec<Lease>,
}

struct PipelineMetrics {
    duration: Histogram<f64>,
    files: Counter<u64>,
    failures: Counter<u64>,
    detections: Counter<u64>,
}

fn init_metrics(meter_name: &'static str) -> PipelineMetrics {
    let meter = global::meter(meter_name);
    let latency_buckets = [
        0.05, 0.1, 0.25, 0.5, 0.75, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0,
    ];

    PipelineMetrics {
        duration: meter
            .f64_histogram("detect_file_duration_seconds")
            .with_description("Time to process one uploaded file (store + infer + annotate)")
            .with_unit("s")
            .with_boundaries(latency_buckets.to_vec())
            .build(),
        files: meter
            .u64_counter("detect_files_total")
            .with_description("Total uploaded files handled")
            .build(),
        failures: meter
            .u64_counter("detect_failures_total")
            .with_description("Total files that failed, by reason")
            .build(),
        detections: meter
            .u64_counter("detections_total")
            .with_description("Total detections produced")
            .build(),
    }
}

/// Drives each uploaded file through store, model, and annotation.
pub struct Orchestrator {
    store: ArtifactStore,
    intake: IntakeValidator,
    locks: NameLocks,
    timeout: Duration,
    retain_uploads: bool,
    metrics: PipelineMetrics,
}

impl Orchestrator {
    pub fn new(
        store: ArtifactStore,
        intake: IntakeValidator,
        timeout: Duration,
        retain_uploads: bool,
    ) -> Self {
        Self {
            store,
            intake,
            locks: NameLocks::new(),
            timeout,
            retain_uploads,
            metrics: init_metrics(common::SERVICE_NAME),
        }
    }

    pub fn intake(&self) -> &IntakeValidator {
        &self.intake
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Process `files` in order and package the envelope.
    ///
    /// Every file is attempted; `success` is only true when all of them
    /// succeeded.
    pub async fn handle(&self, engine: Arc<DetectionEngine>, files: Vec<UploadedFile>) -> BatchOutcome {
        let total = files.len();
        let mut results: Vec<DetectionResult> = Vec::new();
        let mut held: Vec<Lease> = Vec::new();
        let mut errors = Vec::new();
        let mut worst = StatusCode::OK;

        for file in files {
            let filename = file.filename.clone();
            let start = Instant::now();

            match self.process_file(Arc::clone(&engine), file).await {
                Ok(ProcessedFile { results: units, leases }) => {
                    let count: usize = units.iter().map(|r| r.detection_count).sum();
                    self.metrics.duration.record(start.elapsed().as_secs_f64(), &[]);
                    self.metrics.files.add(1, &[KeyValue::new("outcome", "ok")]);
                    self.metrics.detections.add(count as u64, &[]);

                    tracing::info!(
                        filename = %filename,
                        units = units.len(),
                        detections = count,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "File processed"
                    );
                    results.extend(units);
                    held.extend(leases);
                }
                Err(e) => {
                    self.metrics.files.add(1, &[KeyValue::new("outcome", "error")]);
                    self.metrics.failures.add(1, &[KeyValue::new("reason", e.reason())]);

                    tracing::warn!(filename = %filename, error = %e, "File failed");
                    worst = worst.max(e.status_code());
                    errors.push(FileError {
                        filename,
                        message: e.public_message(),
                    });
                }
            }
        }

        let failed = errors.len();
        let succeeded = total - failed;

        let (status, message) = if failed == 0 {
            (StatusCode::OK, "Detection complete".to_string())
        } else if succeeded > 0 {
            (
                StatusCode::OK,
                format!("{} of {} files processed", succeeded, total),
            )
        } else if total == 1 {
            (worst, errors[0].message.clone())
        } else {
            (worst, format!("All {} files failed", total))
        };

        let envelope = ResponseEnvelope::from_batch(message, &results, errors);
        drop(held);

        BatchOutcome { status, envelope }
    }

    async fn process_file(
        &self,
        engine: Arc<DetectionEngine>,
        file: UploadedFile,
    ) -> Result<ProcessedFile, PipelineError> {
        let record = self
            .intake
            .validate(&file.filename, file.content_type.as_deref(), file.size)?;

        // Names carry a unique counter, so this only contends on a reused name
        let guard = self.locks.lock(&record.sanitized_filename).await;
        // Held by the blocking task, so a timed-out file stays protected from purge
        let lease = self.store.lease(&record.storage_path);
        let store = self.store.clone();
        let retain = self.retain_uploads;
        let data = file.data;

        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let _lease = lease;
            run_pipeline(&store, &engine, &record, &data, retain)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => Err(PipelineError::Aborted(join_error.to_string())),
            Err(_) => Err(PipelineError::Timeout(self.timeout)),
        }
    }
}

fn run_pipeline(
    store: &ArtifactStore,
    engine: &DetectionEngine,
    record: &UploadRecord,
    data: &[u8],
    retain_uploads: bool,
) -> Result<ProcessedFile, PipelineError> {
    let _s = common::span!("detect_file");

    store.save(record, data)?;
    let outcome = materialize(store, engine, record);

    if !retain_uploads {
        if let Err(e) = store.discard(record) {
            tracing::warn!(path = %record.storage_path.display(), error = %e, "Failed to discard upload");
        }
    }

    outcome
}

fn materialize(
    store: &ArtifactStore,
    engine: &DetectionEngine,
    record: &UploadRecord,
) -> Result<ProcessedFile, PipelineError> {
    let units = match record.kind {
        MediaKind::Image => engine.infer_image_units(&record.storage_path)?,
        MediaKind::Video => engine.infer_video(&record.storage_path)?,
    };

    let mut results = Vec::with_capacity(units.len());
    let mut leases = Vec::with_capacity(units.len());
    for unit in units {
        let jpeg = engine
            .annotator()
            .render(&unit.image, &unit.detections)
            .map_err(DetectorError::inference)?;
        let stored = store.save_result(record, unit.frame, &jpeg)?;
        leases.push(stored.lease);

        results.push(DetectionResult {
            source: record.clone(),
            detection_count: unit.detections.len(),
            detections: unit.detections,
            output_path: stored.path,
            url: stored.url,
            completed_at: Utc::now(),
            frame: unit.frame,
        });
    }
    Ok(ProcessedFile { results, leases })
}
