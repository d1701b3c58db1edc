use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to load model from {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("Failed to decode input: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Video decoding failed: {0}")]
    Video(String),
}

impl DetectorError {
    /// Wrap a backend or processing failure, keeping the whole context chain.
    pub fn inference(err: anyhow::Error) -> Self {
        DetectorError::Inference(format!("{:#}", err))
    }
}
