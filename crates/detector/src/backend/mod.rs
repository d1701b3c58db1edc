use crate::config::DetectorConfig;
use ndarray::{Array, IxDyn};

#[cfg(feature = "ort-backend")]
pub mod ort;

/// A loaded detection model.
///
/// Implementations may keep mutable session state, so callers serialise
/// access; `infer` must never alter the model weights.
pub trait InferenceBackend: Send {
    fn load_model(config: &DetectorConfig) -> anyhow::Result<Self>
    where
        Self: Sized;

    /// Run inference on a normalised `[1, 3, H, W]` batch.
    fn infer(&mut self, images: &Array<f32, IxDyn>) -> anyhow::Result<InferenceOutput>;
}

pub struct InferenceOutput {
    pub dets: ndarray::ArrayD<f32>, // [1, queries, 4] cxcywh (normalized 0-1)
    pub logits: ndarray::ArrayD<f32>, // [1, queries, num_classes] class logits
}
