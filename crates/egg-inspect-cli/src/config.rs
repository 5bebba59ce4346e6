//! Application configuration
//!
//! One YAML file groups the settings of every stage. Missing sections and
//! fields keep their defaults, so an empty file is a valid configuration.
//!
//! ```yaml
//! model: model/best.onnx
//! detection:
//!   confidence_threshold: 0.4
//!   class_names: [crack, dirty, good]
//! annotation:
//!   line_thickness: 3
//! encoder:
//!   codec: h264
//!   crf: 20
//! pipeline:
//!   progress_log_interval: 50
//! ```

use egg_inspect_annotator::AnnotationStyle;
use egg_inspect_encoder::EncoderConfig;
use egg_inspect_object_detection::DetectionConfig;
use egg_inspect_pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for a whole inspection run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Detection model (None = `model/best.onnx`)
    pub model: Option<PathBuf>,
    pub detection: DetectionConfig,
    pub annotation: AnnotationStyle,
    pub encoder: EncoderConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or holds
    /// out-of-range values.
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// # Errors
    ///
    /// Same as [`AppConfig::from_yaml`], without the read step.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        // serde_yaml rejects an empty document
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Use one threshold for the detector and for what gets drawn
    pub fn set_confidence(&mut self, confidence: f32) {
        self.detection.confidence_threshold = confidence;
        self.pipeline.min_confidence = confidence;
    }

    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for thresholds outside 0-1 or an empty
    /// staging suffix.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("detection.confidence_threshold", self.detection.confidence_threshold),
            ("detection.iou_threshold", self.detection.iou_threshold),
            ("pipeline.min_confidence", self.pipeline.min_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{name} = {value} is outside 0-1")));
            }
        }
        if self.pipeline.partial_suffix.is_empty() {
            return Err(ConfigError::Invalid(
                "pipeline.partial_suffix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Model path, falling back to the default location
    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        self.model
            .clone()
            .unwrap_or_else(|| PathBuf::from(crate::DEFAULT_MODEL_PATH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egg_inspect_encoder::VideoCodec;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(AppConfig::from_yaml_str("").unwrap(), AppConfig::default());
        assert_eq!(AppConfig::from_yaml_str("{}").unwrap(), AppConfig::default());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = AppConfig::from_yaml_str(
            "model: weights/eggs.onnx\n\
             detection:\n  confidence_threshold: 0.4\n  class_names: [crack, dirty]\n\
             encoder:\n  codec: mpeg4\n\
             pipeline:\n  progress_log_interval: 10\n",
        )
        .unwrap();

        assert_eq!(config.model_path(), PathBuf::from("weights/eggs.onnx"));
        assert_eq!(config.detection.confidence_threshold, 0.4);
        assert_eq!(config.detection.iou_threshold, 0.45);
        assert_eq!(
            config.detection.class_names,
            Some(vec!["crack".to_string(), "dirty".to_string()])
        );
        assert_eq!(config.encoder.codec, VideoCodec::Mpeg4);
        assert_eq!(config.encoder.crf, 23);
        assert_eq!(config.pipeline.progress_log_interval, 10);
        assert_eq!(config.pipeline.partial_suffix, "partial");
        assert_eq!(config.annotation, AnnotationStyle::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = AppConfig::from_yaml_str("pipeline:\n  min_confidence: 2.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = AppConfig::from_yaml_str("detection: [1, 2]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_set_confidence_updates_both_stages() {
        let mut config = AppConfig::default();
        config.set_confidence(0.6);
        assert_eq!(config.detection.confidence_threshold, 0.6);
        assert_eq!(config.pipeline.min_confidence, 0.6);
    }

    #[test]
    fn test_default_model_path() {
        assert_eq!(AppConfig::default().model_path(), PathBuf::from("model/best.onnx"));
    }

    #[test]
    fn test_from_yaml_missing_file() {
        assert!(matches!(
            AppConfig::from_yaml("/nonexistent/egg-inspect.yaml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
