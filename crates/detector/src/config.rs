use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_INPUT_SIZE: (u32, u32) = (560, 560);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    Cpu,
    Cuda,
}

/// Which frames of a video are run through the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePolicy {
    /// Process every `stride`-th frame; 1 processes all frames.
    pub stride: u32,
    /// Upper bound on processed frames per video.
    pub max_frames: u32,
}

impl Default for FramePolicy {
    fn default() -> Self {
        Self {
            stride: 1,
            max_frames: 32,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
    /// COCO class ids to keep; empty keeps every class.
    pub classes: Vec<u16>,
    pub max_detections: usize,
    pub execution_provider: ExecutionProvider,
    pub intra_threads: usize,
    pub frame_stride: u32,
    pub max_frames: u32,
    pub ffmpeg_path: PathBuf,
    pub line_thickness: u32,
    /// Draw boxes without captions.
    pub hide_labels: bool,
    /// Caption with the class name only.
    pub hide_conf: bool,
    /// TrueType font for captions; common system fonts are tried when unset.
    pub font_path: Option<PathBuf>,
}

impl DetectorConfig {
    pub fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    pub fn frame_policy(&self) -> FramePolicy {
        FramePolicy {
            stride: self.frame_stride.max(1),
            max_frames: self.max_frames.max(1),
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.input_width == 0 || self.input_height == 0 {
            return Err("input size must be non-zero".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(format!(
                "confidence threshold {} is outside [0, 1]",
                self.confidence_threshold
            ));
        }
        if self.max_detections == 0 {
            return Err("max_detections must be at least 1".to_string());
        }
        Ok(())
    }

    /// Create default configuration for testing
    pub fn test_default() -> Self {
        Self {
            model_path: PathBuf::from("/models/model.onnx"),
            input_width: 512,
            input_height: 512,
            confidence_threshold: 0.5,
            ..Self::default()
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/rf-detr-base.onnx"),
            input_width: DEFAULT_INPUT_SIZE.0,
            input_height: DEFAULT_INPUT_SIZE.1,
            confidence_threshold: 0.25,
            classes: Vec::new(),
            max_detections: 1000,
            execution_provider: ExecutionProvider::Cpu,
            intra_threads: 4,
            frame_stride: 1,
            max_frames: 32,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            line_thickness: 3,
            hide_labels: false,
            hide_conf: false,
            font_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_policy_never_zero() {
        let config = DetectorConfig {
            frame_stride: 0,
            max_frames: 0,
            ..DetectorConfig::default()
        };
        assert_eq!(
            config.frame_policy(),
            FramePolicy {
                stride: 1,
                max_frames: 1
            }
        );
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let config = DetectorConfig {
            confidence_threshold: 1.5,
            ..DetectorConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("outside [0, 1]"));
        assert!(DetectorConfig::default().validate().is_ok());
    }
}
