//! Error types for media and inference stages

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Coarse error classification reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Opening, creating, writing or finalizing a file failed
    Io,
    /// A frame could not be decoded
    Decode,
    /// A frame does not match the declared stream shape
    DimensionMismatch,
    /// The model call failed
    Inference,
    /// The run was stopped by its caller
    Cancelled,
    /// A run was started twice
    InvalidState,
}

/// Errors raised by frame sources and sinks
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to open {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("No video stream found in {}", path.display())]
    NoVideoStream { path: PathBuf },

    #[error("Failed to create {}: {reason}", path.display())]
    Create { path: PathBuf, reason: String },

    #[error("Failed to decode frame{}: {reason}", describe_index(*frame_index))]
    Decode {
        frame_index: Option<u64>,
        reason: String,
    },

    #[error(
        "Frame {frame_index} is {}x{}, stream was declared {}x{}",
        actual.0, actual.1, expected.0, expected.1
    )]
    DimensionMismatch {
        frame_index: u64,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Failed to encode frame {frame_index}: {reason}")]
    Encode { frame_index: u64, reason: String },

    #[error("Failed to finalize output: {0}")]
    Finalize(String),

    #[error("Output has already been finalized or discarded")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            MediaError::Decode { .. } => ErrorKind::Decode,
            MediaError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            _ => ErrorKind::Io,
        }
    }
}

fn describe_index(frame_index: Option<u64>) -> String {
    frame_index.map(|i| format!(" {i}")).unwrap_or_default()
}

/// Errors raised by a detector
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Failed to prepare model input: {0}")]
    Input(String),

    #[error("Model execution failed: {0}")]
    Execution(String),

    #[error("Unexpected model output: {0}")]
    Output(String),
}
