//! Egg defect detection with a `YOLOv8` ONNX export
//!
//! Wraps an ONNX Runtime session behind the [`Detector`] trait:
//! frames are letterboxed to the model's square input, the raw
//! `[1, 4 + classes, anchors]` prediction is decoded back to frame pixels,
//! and overlapping boxes of the same class are suppressed.
//!
//! # Example
//! ```no_run
//! use egg_inspect_common::{Detector, Frame};
//! use egg_inspect_object_detection::{DetectionConfig, OnnxDetector};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut detector = OnnxDetector::new("model/best.onnx", DetectionConfig::default())?;
//! let frame = Frame::filled(0, 640, 480, [200, 180, 150]);
//!
//! for detection in detector.infer(&frame)? {
//!     println!("{}", detection.label());
//! }
//! # Ok(())
//! # }
//! ```

pub mod names;
pub mod postprocess;

use egg_inspect_common::{Detection, Detector, Frame, InferenceError};
use image::RgbImage;
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use postprocess::{decode_predictions, letterbox, non_max_suppression, Letterbox};

/// Environment variable overriding the ONNX Runtime intra-op thread count
pub const THREADS_ENV: &str = "EGG_INSPECT_THREADS";

/// Where inference runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTarget {
    #[default]
    Cpu,
    /// CUDA with CPU fallback for unsupported nodes
    Cuda,
}

/// Configuration for egg defect detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum confidence threshold for detections (0.0-1.0)
    pub confidence_threshold: f32,
    /// `IoU` threshold for non-maximum suppression (0.0-1.0)
    pub iou_threshold: f32,
    /// Maximum number of detections to return per frame
    pub max_detections: usize,
    /// Square model input size (`YOLOv8` default is 640)
    pub input_size: u32,
    /// Class names by id (None = read from model metadata)
    pub class_names: Option<Vec<String>>,
    pub execution: ExecutionTarget,
    /// Intra-op threads (None = physical cores, or `EGG_INSPECT_THREADS`)
    pub intra_threads: Option<usize>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 300,
            input_size: 640,
            class_names: None,
            execution: ExecutionTarget::Cpu,
            intra_threads: None,
        }
    }
}

impl DetectionConfig {
    /// Higher thresholds, fewer detections
    #[must_use]
    pub fn fast() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: 0.5,
            max_detections: 100,
            ..Self::default()
        }
    }

    /// Lower thresholds, more detections
    #[must_use]
    pub fn accurate() -> Self {
        Self {
            confidence_threshold: 0.15,
            iou_threshold: 0.4,
            max_detections: 500,
            ..Self::default()
        }
    }

    fn num_threads(&self) -> usize {
        std::env::var(THREADS_ENV)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .or(self.intra_threads)
            .unwrap_or_else(num_cpus::get_physical)
    }
}

/// Errors that can occur while loading or running the detector
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Unexpected model output: {0}")]
    Output(String),
}

impl From<DetectionError> for InferenceError {
    fn from(err: DetectionError) -> Self {
        match err {
            DetectionError::Output(msg) => InferenceError::Output(msg),
            DetectionError::Config(msg) => InferenceError::Input(msg),
            other => InferenceError::Execution(other.to_string()),
        }
    }
}

/// `YOLOv8` detector backed by an ONNX Runtime session
pub struct OnnxDetector {
    session: Session,
    config: DetectionConfig,
    class_names: Vec<String>,
}

impl OnnxDetector {
    /// Load the model at `model_path`
    ///
    /// # Errors
    ///
    /// Returns [`DetectionError::ModelNotFound`] if the file does not exist,
    /// [`DetectionError::Config`] for unusable thresholds or input size, and
    /// [`DetectionError::ModelLoad`] if ONNX Runtime rejects the model.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        config: DetectionConfig,
    ) -> Result<Self, DetectionError> {
        let model_path = model_path.as_ref();
        validate(&config)?;
        if !model_path.exists() {
            return Err(DetectionError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        info!("Loading detection model from {}", model_path.display());
        let session = create_session(model_path, &config)?;

        let class_names = match &config.class_names {
            Some(names) => names.clone(),
            None => metadata_names(&session).unwrap_or_else(|| {
                warn!("Model carries no class names, labels will be class_<id>");
                Vec::new()
            }),
        };

        info!(
            "Detection model loaded ({} classes: {})",
            class_names.len(),
            class_names.join(", ")
        );

        Ok(Self {
            session,
            config,
            class_names,
        })
    }

    /// Class names by id, as used for labels
    #[must_use]
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    #[must_use]
    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Detect egg defects in one RGB image
    ///
    /// # Errors
    ///
    /// Returns [`DetectionError::Inference`] if the session fails and
    /// [`DetectionError::Output`] if the prediction tensor has an unexpected
    /// shape.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectionError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectionError::Config("empty image".to_string()));
        }
        debug!(
            "Running detection on {}x{} image",
            image.width(),
            image.height()
        );

        let (input, geometry) = letterbox(image, self.config.input_size);

        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectionError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectionError::Output(format!("Failed to extract tensor: {e}")))?;
        let dims: Vec<usize> = shape
            .iter()
            .map(|&d| usize::try_from(d).unwrap_or(0))
            .collect();

        let detections =
            decode_predictions(data, &dims, &geometry, &self.config, &self.class_names)?;
        debug!("Detected {} objects", detections.len());
        Ok(detections)
    }
}

impl Detector for OnnxDetector {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        self.detect(frame.image()).map_err(Into::into)
    }
}

fn validate(config: &DetectionConfig) -> Result<(), DetectionError> {
    if !(0.0..=1.0).contains(&config.confidence_threshold) {
        return Err(DetectionError::Config(format!(
            "confidence_threshold {} outside 0-1",
            config.confidence_threshold
        )));
    }
    if !(0.0..=1.0).contains(&config.iou_threshold) {
        return Err(DetectionError::Config(format!(
            "iou_threshold {} outside 0-1",
            config.iou_threshold
        )));
    }
    // YOLO strides need a multiple of 32
    if config.input_size == 0 || config.input_size % 32 != 0 {
        return Err(DetectionError::Config(format!(
            "input_size {} is not a positive multiple of 32",
            config.input_size
        )));
    }
    Ok(())
}

fn create_session(model_path: &Path, config: &DetectionConfig) -> Result<Session, DetectionError> {
    let num_threads = config.num_threads();
    debug!("ONNX Runtime intra-op threads: {}", num_threads);

    let builder = Session::builder()
        .map_err(|e| DetectionError::ModelLoad(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| DetectionError::ModelLoad(e.to_string()))?
        .with_intra_threads(num_threads)
        .map_err(|e| DetectionError::ModelLoad(e.to_string()))?;

    let builder = match config.execution {
        ExecutionTarget::Cpu => builder
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(|e| DetectionError::ModelLoad(e.to_string()))?,
        ExecutionTarget::Cuda => builder
            .with_execution_providers([
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ])
            .map_err(|e| DetectionError::ModelLoad(e.to_string()))?,
    };

    builder
        .commit_from_file(model_path)
        .map_err(|e| DetectionError::ModelLoad(format!("{}: {e}", model_path.display())))
}

fn metadata_names(session: &Session) -> Option<Vec<String>> {
    let metadata = session.metadata().ok()?;
    let raw = metadata.custom("names").ok()??;
    let parsed = names::parse_names(&raw);
    if parsed.is_none() {
        warn!("Unrecognized `names` metadata: {}", raw);
    }
    parsed
}
