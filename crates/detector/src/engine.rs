use crate::annotate::Annotator;
use crate::backend::InferenceBackend;
use crate::config::DetectorConfig;
use crate::detection::Detection;
use crate::error::DetectorError;
use crate::processing::{PostProcessor, PreProcessor};
use crate::video::FrameExtractor;
use image::{DynamicImage, Rgb, RgbImage};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// One image run through the model: a still picture or a single video frame.
pub struct InferenceUnit {
    /// Source frame index for video units.
    pub frame: Option<u32>,
    pub image: DynamicImage,
    pub detections: Vec<Detection>,
}

struct Pipeline {
    backend: Box<dyn InferenceBackend>,
    preprocessor: PreProcessor,
}

/// The loaded model plus everything needed to turn files into detections.
///
/// Built once at start-up and shared behind an `Arc`. Calls are synchronous
/// and serialised on an internal lock, so run them on a blocking thread.
pub struct DetectionEngine {
    pipeline: Mutex<Pipeline>,
    postprocessor: PostProcessor,
    frames: FrameExtractor,
    annotator: Annotator,
    config: DetectorConfig,
}

impl DetectionEngine {
    /// Load the ONNX model named in `config` and warm it up.
    #[cfg(feature = "ort-backend")]
    pub fn load(config: DetectorConfig) -> Result<Self, DetectorError> {
        use crate::backend::ort::OrtBackend;

        let model_load = |reason: String| DetectorError::ModelLoad {
            path: config.model_path.clone(),
            reason,
        };

        config.validate().map_err(model_load)?;
        let backend = OrtBackend::load_model(&config).map_err(|e| model_load(format!("{:#}", e)))?;

        let engine = Self::with_backend(Box::new(backend), config);
        engine.warmup().map_err(|e| DetectorError::ModelLoad {
            path: engine.config.model_path.clone(),
            reason: e.to_string(),
        })?;
        Ok(engine)
    }

    pub fn with_backend(backend: Box<dyn InferenceBackend>, config: DetectorConfig) -> Self {
        let postprocessor = PostProcessor::new(
            config.confidence_threshold,
            config.classes.clone(),
            config.max_detections,
        );
        let preprocessor = PreProcessor::new(config.input_size());
        let frames = FrameExtractor::new(config.ffmpeg_path.clone(), config.frame_policy());
        let annotator = Annotator::from_config(&config);

        Self {
            pipeline: Mutex::new(Pipeline {
                backend,
                preprocessor,
            }),
            postprocessor,
            frames,
            annotator,
            config,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn annotator(&self) -> &Annotator {
        &self.annotator
    }

    /// Run one inference on a blank frame so the first request is not slow.
    pub fn warmup(&self) -> Result<(), DetectorError> {
        let (width, height) = self.config.input_size();
        let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([114, 114, 114])));

        let start = Instant::now();
        self.detect(&blank)?;
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model warmup complete"
        );
        Ok(())
    }

    /// Detections for a decoded image, in model query order.
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, DetectorError> {
        // Inference never mutates the weights, so a panic elsewhere leaves the
        // pipeline usable.
        let mut pipeline = self.pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        let Pipeline {
            backend,
            preprocessor,
        } = &mut *pipeline;

        let prepared = preprocessor.preprocess(image).map_err(DetectorError::inference)?;

        let output = {
            let _s = common::span!("model_inference");
            backend.infer(&prepared.input).map_err(DetectorError::inference)?
        };

        let _s = common::span!("postprocess");
        self.postprocessor
            .parse_detections(&output.dets.view(), &output.logits.view(), &prepared.transform)
            .map_err(DetectorError::inference)
    }

    /// Detections for the image stored at `path`.
    pub fn infer(&self, path: &Path) -> Result<Vec<Detection>, DetectorError> {
        let image = image::open(path)?;
        self.detect(&image)
    }

    /// A single unit for a still image, keeping the decoded pixels for annotation.
    pub fn infer_image_units(&self, path: &Path) -> Result<Vec<InferenceUnit>, DetectorError> {
        let image = image::open(path)?;
        let detections = self.detect(&image)?;
        Ok(vec![InferenceUnit {
            frame: None,
            image,
            detections,
        }])
    }

    /// One unit per frame selected by the frame policy.
    pub fn infer_video(&self, path: &Path) -> Result<Vec<InferenceUnit>, DetectorError> {
        let scratch = tempfile::Builder::new()
            .prefix("detect-frames-")
            .tempdir()
            .map_err(|e| DetectorError::Video(format!("cannot create scratch directory: {}", e)))?;

        let frames = self.frames.extract(path, scratch.path())?;

        let mut units = Vec::with_capacity(frames.len());
        for frame in frames {
            let detections = self.detect(&frame.image)?;
            tracing::trace!(frame = frame.index, detections = detections.len(), "Frame processed");
            units.push(InferenceUnit {
                frame: Some(frame.index),
                image: frame.image,
                detections,
            });
        }
        Ok(units)
    }
}
