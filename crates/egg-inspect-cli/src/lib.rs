//! Egg defect inspection: library entry points
//!
//! Two calls cover the whole workflow:
//!
//! - [`load_model`] loads the detection model once per process
//! - [`full_pipeline`] turns one input video into an annotated output video
//!
//! [`full_pipeline_with`] takes a caller-created [`PipelineRun`] so another
//! thread can cancel the run or poll its progress.
//!
//! # Example
//! ```no_run
//! use egg_inspect::{default_output_path, full_pipeline, load_model};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let model = load_model("model/best.onnx")?;
//! let input = Path::new("eggs.mp4");
//! let report = full_pipeline(input, &default_output_path(input), &model)?;
//! println!("{} frames, {} detections", report.frames_written, report.detections);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;

use egg_inspect_annotator::FrameAnnotator;
use egg_inspect_common::MediaBackend;
use egg_inspect_object_detection::{DetectionConfig, DetectionError, OnnxDetector};
use egg_inspect_pipeline::PipelineController;
use std::path::{Path, PathBuf};
use tracing::warn;

pub use backend::FfmpegBackend;
pub use config::{AppConfig, ConfigError};
pub use egg_inspect_common::{ErrorKind, VideoInfo};
pub use egg_inspect_pipeline::{
    ModelHandle, PipelineError, PipelineRun, RunHandle, RunReport, RunStatus,
};

/// Model location used when none is configured
pub const DEFAULT_MODEL_PATH: &str = "model/best.onnx";

/// Input containers accepted without `--force`
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];

/// Check the input extension against [`SUPPORTED_EXTENSIONS`] (case-insensitive)
#[must_use]
pub fn is_supported_input(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
}

/// `<input file name>_detected.mp4` next to the input
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map_or_else(|| "output".into(), |n| n.to_string_lossy().into_owned());
    input.with_file_name(format!("{name}_detected.mp4"))
}

/// Load the detection model with default settings
///
/// # Errors
///
/// Returns [`DetectionError`] if the file is missing or ONNX Runtime
/// cannot load it.
pub fn load_model(path: impl AsRef<Path>) -> Result<ModelHandle, DetectionError> {
    load_model_with(path, DetectionConfig::default())
}

/// Load the detection model with explicit settings
///
/// # Errors
///
/// Same as [`load_model`], plus [`DetectionError::Config`] for invalid
/// settings.
pub fn load_model_with(
    path: impl AsRef<Path>,
    config: DetectionConfig,
) -> Result<ModelHandle, DetectionError> {
    let detector = OnnxDetector::new(path, config)?;
    Ok(ModelHandle::new(detector))
}

/// Process `input` into an annotated `output` with default settings
///
/// # Errors
///
/// The [`PipelineError`] that failed the run. A cancelled run is not an
/// error here; check [`RunReport::status`].
pub fn full_pipeline(
    input: &Path,
    output: &Path,
    model: &ModelHandle,
) -> Result<RunReport, PipelineError> {
    full_pipeline_with(&PipelineRun::new(), input, output, model, &AppConfig::default())
}

/// Process `input` into `output`, driving the caller's `run`
///
/// # Errors
///
/// Same as [`full_pipeline`], plus [`PipelineError::NotIdle`] if `run`
/// was already started.
pub fn full_pipeline_with(
    run: &PipelineRun,
    input: &Path,
    output: &Path,
    model: &ModelHandle,
    config: &AppConfig,
) -> Result<RunReport, PipelineError> {
    let controller = build_controller(FfmpegBackend::new(config.encoder.clone()), config);
    controller.run(run, input, output, &mut model.clone())
}

/// Controller over any media backend, configured from `config`
///
/// A configured font that fails to load is logged and replaced by the
/// built-in bitmap font, so labels are always drawn.
pub fn build_controller<B: MediaBackend>(backend: B, config: &AppConfig) -> PipelineController<B> {
    let annotator = FrameAnnotator::new(config.annotation.clone()).unwrap_or_else(|e| {
        warn!("{}, falling back to bitmap font", e);
        FrameAnnotator::with_bitmap_font(config.annotation.clone())
    });
    PipelineController::new(backend, annotator, config.pipeline.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_input(Path::new("eggs.mp4")));
        assert!(is_supported_input(Path::new("/videos/line_3.MOV")));
        assert!(is_supported_input(Path::new("batch.avi")));
        assert!(!is_supported_input(Path::new("eggs.mkv")));
        assert!(!is_supported_input(Path::new("eggs")));
    }

    #[test]
    fn test_default_output_path_keeps_input_name() {
        assert_eq!(
            default_output_path(Path::new("/data/eggs.mov")),
            PathBuf::from("/data/eggs.mov_detected.mp4")
        );
        assert_eq!(
            default_output_path(Path::new("eggs.mp4")),
            PathBuf::from("eggs.mp4_detected.mp4")
        );
    }

    #[test]
    fn test_load_model_missing_file() {
        assert!(matches!(
            load_model("/nonexistent/best.onnx"),
            Err(DetectionError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_bad_font_falls_back_to_bitmap() {
        let mut config = AppConfig::default();
        config.annotation.font_path = Some(PathBuf::from("/nonexistent/font.ttf"));
        let controller =
            build_controller(egg_inspect_pipeline::MemoryBackend::new(), &config);
        assert_eq!(controller.config(), &config.pipeline);
    }
}
