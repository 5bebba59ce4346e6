//! Frame-processing pipeline for egg defect inspection
//!
//! [`PipelineController`] drives one [`PipelineRun`] through
//! `Idle -> Running -> {Completed, Cancelled, Failed}`: it reads frames from a
//! [`FrameSource`](egg_inspect_common::FrameSource), runs the detector once
//! per frame, draws the detections and appends the result to a
//! [`FrameSink`](egg_inspect_common::FrameSink). The media implementation is
//! chosen by the [`MediaBackend`](egg_inspect_common::MediaBackend) the
//! controller is built with.
//!
//! # Output policy
//!
//! The sink writes to a staging file next to the declared output
//! (`<stem>.partial.<ext>`):
//!
//! - completed runs finalize it and rename it onto the declared path;
//! - cancelled or failed runs that wrote at least one frame finalize it and
//!   keep it as a partial artifact;
//! - runs that wrote nothing leave no file behind.
//!
//! The declared output path therefore only ever holds a complete video.
//!
//! # Example
//! ```no_run
//! use egg_inspect_annotator::{AnnotationStyle, FrameAnnotator};
//! use egg_inspect_common::{Detection, Detector, Frame, FrameRate, InferenceError};
//! use egg_inspect_pipeline::{
//!     MemoryBackend, MemoryVideo, PipelineConfig, PipelineController, PipelineRun,
//! };
//! use std::path::Path;
//!
//! struct NoDefects;
//! impl Detector for NoDefects {
//!     fn infer(&mut self, _frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = MemoryBackend::new();
//! backend.insert("eggs.mp4", MemoryVideo::generated(10, 640, 480, FrameRate::from_fps(30)));
//!
//! let controller = PipelineController::new(
//!     backend,
//!     FrameAnnotator::new(AnnotationStyle::default())?,
//!     PipelineConfig::default(),
//! );
//! let run = PipelineRun::new();
//! let report = controller.run(&run, Path::new("eggs.mp4"), Path::new("out.mp4"), &mut NoDefects)?;
//! assert_eq!(report.frames_written, 10);
//! # Ok(())
//! # }
//! ```

mod cancel;
mod controller;
mod error;
pub mod memory;
mod model;
mod run;
pub mod staging;

pub use cancel::CancellationToken;
pub use controller::{PipelineConfig, PipelineController, RunReport};
pub use error::PipelineError;
pub use memory::{MemoryBackend, MemoryVideo};
pub use model::ModelHandle;
pub use run::{PipelineRun, RunHandle, RunStatus};
pub use staging::{staging_path, StagedOutput};
