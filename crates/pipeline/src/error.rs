//! Run-level errors

use egg_inspect_common::{ErrorKind, InferenceError, MediaError};
use std::path::PathBuf;
use thiserror::Error;

/// Why a run did not complete
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Run cannot start from state {state}")]
    NotIdle { state: String },

    #[error("Cannot open input: {0}")]
    Input(#[source] MediaError),

    #[error("Cannot create output: {0}")]
    Output(#[source] MediaError),

    #[error("Frame {frame_index}: {source}")]
    Frame {
        frame_index: u64,
        #[source]
        source: MediaError,
    },

    #[error("Inference failed on frame {frame_index}: {source}")]
    Inference {
        frame_index: u64,
        #[source]
        source: InferenceError,
    },

    #[error("Cannot finalize output: {0}")]
    Finalize(#[source] MediaError),

    #[error("Cannot move finished video to {}: {source}", path.display())]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Run was cancelled after {frames_written} frames")]
    Cancelled {
        frames_written: u64,
        partial_output: Option<PathBuf>,
    },
}

impl PipelineError {
    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NotIdle { .. } => ErrorKind::InvalidState,
            PipelineError::Input(e) | PipelineError::Output(e) | PipelineError::Finalize(e) => {
                e.kind()
            }
            PipelineError::Frame { source, .. } => source.kind(),
            PipelineError::Inference { .. } => ErrorKind::Inference,
            PipelineError::Publish { .. } => ErrorKind::Io,
            PipelineError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Index of the frame the run failed on, when one was involved
    #[must_use]
    pub fn frame_index(&self) -> Option<u64> {
        match self {
            PipelineError::Frame { frame_index, .. }
            | PipelineError::Inference { frame_index, .. } => Some(*frame_index),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let decode = PipelineError::Frame {
            frame_index: 5,
            source: MediaError::Decode {
                frame_index: Some(5),
                reason: "corrupt".to_string(),
            },
        };
        assert_eq!(decode.kind(), ErrorKind::Decode);
        assert_eq!(decode.frame_index(), Some(5));

        let mismatch = PipelineError::Frame {
            frame_index: 2,
            source: MediaError::DimensionMismatch {
                frame_index: 2,
                expected: (640, 480),
                actual: (320, 240),
            },
        };
        assert_eq!(mismatch.kind(), ErrorKind::DimensionMismatch);

        let inference = PipelineError::Inference {
            frame_index: 0,
            source: InferenceError::Execution("boom".to_string()),
        };
        assert_eq!(inference.kind(), ErrorKind::Inference);

        let open = PipelineError::Input(MediaError::NoVideoStream {
            path: PathBuf::from("a.mp4"),
        });
        assert_eq!(open.kind(), ErrorKind::Io);
        assert_eq!(open.frame_index(), None);

        let cancelled = PipelineError::Cancelled {
            frames_written: 3,
            partial_output: None,
        };
        assert_eq!(cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_message_names_frame() {
        let err = PipelineError::Frame {
            frame_index: 5,
            source: MediaError::Decode {
                frame_index: Some(5),
                reason: "invalid data".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "Frame 5: Failed to decode frame 5: invalid data"
        );
    }
}
