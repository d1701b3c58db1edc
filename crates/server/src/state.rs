use crate::config::Settings;
use crate::health::HealthController;
use crate::intake::IntakeValidator;
use crate::orchestrator::Orchestrator;
use artifacts::{ArtifactStore, StorageError, StorageLayout};
use detector::DetectionEngine;
use std::sync::Arc;

/// Whether a model is available to serve detections.
pub enum ModelState {
    Ready(Arc<DetectionEngine>),
    /// Start-up continued without a model; holds the load failure.
    Unavailable(String),
}

impl ModelState {
    pub fn engine(&self) -> Option<Arc<DetectionEngine>> {
        match self {
            ModelState::Ready(engine) => Some(Arc::clone(engine)),
            ModelState::Unavailable(_) => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, ModelState::Ready(_))
    }
}

#[derive(Clone)]
pub struct AppState {
    pub model: Arc<ModelState>,
    pub orchestrator: Arc<Orchestrator>,
    pub health: Arc<HealthController>,
    pub max_batch_files: usize,
}

impl AppState {
    /// Open the artifact store under the configured root and wire the services.
    pub fn build(settings: &Settings, model: ModelState) -> Result<Self, StorageError> {
        let layout = StorageLayout::new(settings.storage.root.clone(), &settings.storage.url_prefix);
        let store = ArtifactStore::open(layout.clone())?;

        let intake = IntakeValidator::new(
            &settings.storage.allowed_extensions,
            settings.storage.max_file_size_bytes,
            layout,
        );
        let orchestrator = Orchestrator::new(
            store.clone(),
            intake,
            settings.detector.inference_timeout(),
            settings.storage.retain_uploads,
        );
        let health = HealthController::new(store, settings.storage.max_age());

        Ok(Self {
            model: Arc::new(model),
            orchestrator: Arc::new(orchestrator),
            health: Arc::new(health),
            max_batch_files: settings.server.max_batch_files,
        })
    }
}
