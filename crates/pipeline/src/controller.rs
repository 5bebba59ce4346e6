//! The read -> infer -> annotate -> write loop

use crate::run::RunShared;
use crate::{staging_path, PipelineError, PipelineRun, RunStatus, StagedOutput};
use egg_inspect_annotator::FrameAnnotator;
use egg_inspect_common::{
    Detection, Detector, Frame, FrameSource, MediaBackend, MediaError, SinkSpec, VideoInfo,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info};

/// Controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Detections below this confidence are dropped before annotation
    pub min_confidence: f32,
    /// Marker inserted before the extension of the staging file
    pub partial_suffix: String,
    /// Log a progress line every N frames (0 = never)
    pub progress_log_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.25,
            partial_suffix: "partial".to_string(),
            progress_log_interval: 100,
        }
    }
}

/// Summary of a run that completed or was cancelled
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub input: PathBuf,
    /// Declared output, present only when the run completed
    pub output: Option<PathBuf>,
    /// Finalized but incomplete video kept by a cancelled run
    pub partial_output: Option<PathBuf>,
    pub video: VideoInfo,
    pub frames_written: u64,
    pub frames_with_detections: u64,
    pub detections: u64,
    pub detections_by_class: BTreeMap<String, u64>,
    pub elapsed_secs: f64,
}

impl RunReport {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Treat cancellation as an error
    ///
    /// # Errors
    ///
    /// [`PipelineError::Cancelled`] if the run did not complete.
    pub fn ensure_completed(self) -> Result<Self, PipelineError> {
        if self.is_completed() {
            Ok(self)
        } else {
            Err(PipelineError::Cancelled {
                frames_written: self.frames_written,
                partial_output: self.partial_output,
            })
        }
    }
}

/// Orchestrates source -> detector -> annotator -> sink for one run at a time
pub struct PipelineController<B> {
    backend: B,
    annotator: FrameAnnotator,
    config: PipelineConfig,
}

enum Outcome {
    Completed,
    Cancelled,
    Failed(PipelineError),
}

struct RunFailure {
    error: PipelineError,
    partial_output: Option<PathBuf>,
}

impl From<PipelineError> for RunFailure {
    fn from(error: PipelineError) -> Self {
        Self {
            error,
            partial_output: None,
        }
    }
}

#[derive(Default)]
struct DetectionStats {
    total: u64,
    frames_with_detections: u64,
    by_class: BTreeMap<String, u64>,
}

impl DetectionStats {
    fn record(&mut self, detections: &[Detection]) {
        if detections.is_empty() {
            return;
        }
        self.frames_with_detections += 1;
        self.total += detections.len() as u64;
        for detection in detections {
            *self
                .by_class
                .entry(detection.class_name.clone())
                .or_default() += 1;
        }
    }
}

impl<B: MediaBackend> PipelineController<B> {
    pub fn new(backend: B, annotator: FrameAnnotator, config: PipelineConfig) -> Self {
        Self {
            backend,
            annotator,
            config,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process `input` into `output`, driving `run` from idle to a terminal state
    ///
    /// Completed and cancelled runs return a [`RunReport`]. On failure the
    /// run status carries the frame index and reason, and any partial
    /// artifact is available from [`RunHandle::partial_output`](crate::RunHandle::partial_output).
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotIdle`] if `run` was already started; otherwise the
    /// error that failed the run.
    pub fn run(
        &self,
        run: &PipelineRun,
        input: &Path,
        output: &Path,
        detector: &mut dyn Detector,
    ) -> Result<RunReport, PipelineError> {
        let shared = run.shared();
        shared
            .begin()
            .map_err(|status| PipelineError::NotIdle {
                state: status.to_string(),
            })?;

        info!("Processing {} -> {}", input.display(), output.display());
        match self.execute(shared, input, output, detector) {
            Ok(report) => {
                shared.finish(report.status.clone(), report.partial_output.clone());
                Ok(report)
            }
            Err(failure) => {
                error!("Run failed: {}", failure.error);
                shared.finish(
                    RunStatus::Failed {
                        frame_index: failure.error.frame_index(),
                        reason: failure.error.to_string(),
                    },
                    failure.partial_output,
                );
                Err(failure.error)
            }
        }
    }

    fn execute(
        &self,
        shared: &RunShared,
        input: &Path,
        output: &Path,
        detector: &mut dyn Detector,
    ) -> Result<RunReport, RunFailure> {
        let started = Instant::now();
        check_not_input(input, output, &self.config.partial_suffix)
            .map_err(PipelineError::Output)?;

        let mut source = self
            .backend
            .open_source(input)
            .map_err(PipelineError::Input)?;
        let video = source.info().clone();
        shared.set_total(video.frame_count);

        let mut staged = match StagedOutput::create(
            &self.backend,
            output,
            &self.config.partial_suffix,
            SinkSpec::from(&video),
        ) {
            Ok(staged) => staged,
            Err(e) => {
                source.close();
                return Err(PipelineError::Output(e).into());
            }
        };

        let mut stats = DetectionStats::default();
        let outcome = self.process_frames(
            shared,
            source.as_mut(),
            &mut staged,
            detector,
            &mut stats,
        );
        source.close();

        let frames_written = staged.frames_written();
        let (status, output, partial_output) = match outcome {
            Outcome::Completed => {
                let published = staged.publish()?;
                (RunStatus::Completed, Some(published), None)
            }
            Outcome::Cancelled => {
                info!("Run cancelled after {} frames", frames_written);
                (RunStatus::Cancelled, None, staged.keep_partial())
            }
            Outcome::Failed(error) => {
                return Err(RunFailure {
                    error,
                    partial_output: staged.keep_partial(),
                });
            }
        };

        let elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            "Run {}: {} frames, {} detections in {:.2}s",
            status, frames_written, stats.total, elapsed_secs
        );

        Ok(RunReport {
            status,
            input: input.to_path_buf(),
            output,
            partial_output,
            video,
            frames_written,
            frames_with_detections: stats.frames_with_detections,
            detections: stats.total,
            detections_by_class: stats.by_class,
            elapsed_secs,
        })
    }

    fn process_frames(
        &self,
        shared: &RunShared,
        frames: &mut dyn FrameSource,
        staged: &mut StagedOutput,
        detector: &mut dyn Detector,
        stats: &mut DetectionStats,
    ) -> Outcome {
        let interval = self.config.progress_log_interval;
        let mut next_index = 0u64;

        loop {
            // Between frames only: a frame that was read is always written
            if shared.token().is_cancelled() {
                return Outcome::Cancelled;
            }

            let frame = match frames.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Outcome::Completed,
                Err(source) => {
                    return Outcome::Failed(PipelineError::Frame {
                        frame_index: next_index,
                        source,
                    })
                }
            };

            if let Err(e) = self.process_frame(&frame, staged, detector, stats) {
                return Outcome::Failed(e);
            }
            shared.frame_done();
            next_index += 1;

            if interval > 0 && next_index % interval == 0 {
                info!("Processed {} frames", next_index);
            }
        }
    }

    fn process_frame(
        &self,
        frame: &Frame,
        staged: &mut StagedOutput,
        detector: &mut dyn Detector,
        stats: &mut DetectionStats,
    ) -> Result<(), PipelineError> {
        let frame_index = frame.index();

        let mut detections = detector
            .infer(frame)
            .map_err(|source| PipelineError::Inference {
                frame_index,
                source,
            })?;
        detections.retain(|d| d.confidence >= self.config.min_confidence);

        let annotated = self.annotator.annotate(frame, &detections);
        staged
            .sink_mut()
            .and_then(|sink| sink.write_frame(&annotated))
            .map_err(|source| PipelineError::Frame {
                frame_index,
                source,
            })?;

        debug!("Frame {}: {} detections", frame_index, detections.len());
        stats.record(&detections);
        Ok(())
    }
}

/// Refuse outputs whose staging or final path is the input itself
///
/// The staging file is truncated on creation and removed or renamed when
/// the run ends, so it must never alias the video being read.
fn check_not_input(input: &Path, output: &Path, suffix: &str) -> Result<(), MediaError> {
    let staging = staging_path(output, suffix);
    for candidate in [output, staging.as_path()] {
        if same_file(input, candidate) {
            return Err(MediaError::Create {
                path: candidate.to_path_buf(),
                reason: format!("would overwrite the input {}", input.display()),
            });
        }
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
