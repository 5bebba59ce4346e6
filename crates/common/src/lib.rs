//! Common types shared by the egg inspection crates
//!
//! Frames, stream metadata, detections and the traits that connect the
//! decoding, inference and encoding stages of the pipeline.

pub mod detection;
pub mod error;
pub mod frame;
pub mod media;

pub use detection::{BoundingBox, Detection, Detector};
pub use error::{ErrorKind, InferenceError, MediaError};
pub use frame::{Frame, CHANNELS};
pub use media::{FrameRate, FrameSink, FrameSource, MediaBackend, SinkSpec, VideoInfo};

/// Result type for media operations
pub type Result<T> = std::result::Result<T, MediaError>;
