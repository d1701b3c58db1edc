pub mod annotate;
pub mod backend;
pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod labels;
pub mod processing;
pub mod video;

// Re-export commonly used types for convenience
pub use backend::{InferenceBackend, InferenceOutput};
pub use config::{DetectorConfig, ExecutionProvider, FramePolicy};
pub use detection::{BoundingBox, Detection};
pub use engine::{DetectionEngine, InferenceUnit};
pub use error::DetectorError;
