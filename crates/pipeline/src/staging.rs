//! Output staging
//!
//! Frames are encoded into `<stem>.<suffix>.<ext>` next to the declared
//! output. Only a finalized, complete video is renamed onto the declared
//! path; interrupted runs either keep the staging file as an explicit
//! partial artifact or remove it.

use crate::PipelineError;
use egg_inspect_common::{FrameSink, MediaBackend, MediaError, SinkSpec};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Staging file name for `target`, e.g. `eggs_detected.partial.mp4`
#[must_use]
pub fn staging_path(target: &Path, suffix: &str) -> PathBuf {
    let stem = target
        .file_stem()
        .map_or_else(|| "output".to_string(), |s| s.to_string_lossy().into_owned());
    let name = match target.extension() {
        Some(ext) => format!("{stem}.{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{suffix}"),
    };
    target.with_file_name(name)
}

/// Owns the sink and its staging file until the run decides their fate
///
/// Dropping an undecided guard discards the staging file.
pub struct StagedOutput {
    target: PathBuf,
    staging: PathBuf,
    sink: Option<Box<dyn FrameSink>>,
}

impl StagedOutput {
    /// Create the sink on the staging path
    ///
    /// # Errors
    ///
    /// Whatever the backend returns from `create_sink`.
    pub fn create<B: MediaBackend + ?Sized>(
        backend: &B,
        target: &Path,
        suffix: &str,
        spec: SinkSpec,
    ) -> Result<Self, MediaError> {
        let staging = staging_path(target, suffix);
        let sink = backend.create_sink(&staging, spec)?;
        debug!("Staging output at {}", staging.display());
        Ok(Self {
            target: target.to_path_buf(),
            staging,
            sink: Some(sink),
        })
    }

    #[must_use]
    pub fn staging(&self) -> &Path {
        &self.staging
    }

    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// # Errors
    ///
    /// [`MediaError::Closed`] once the output has been published or dropped.
    pub fn sink_mut(&mut self) -> Result<&mut dyn FrameSink, MediaError> {
        match self.sink.as_mut() {
            Some(sink) => Ok(sink.as_mut()),
            None => Err(MediaError::Closed),
        }
    }

    #[must_use]
    pub fn frames_written(&self) -> u64 {
        self.sink.as_ref().map_or(0, |s| s.frames_written())
    }

    /// Finalize and move the video onto the declared output path
    ///
    /// # Errors
    ///
    /// [`PipelineError::Finalize`] or [`PipelineError::Publish`]; the staging
    /// file is removed in both cases.
    pub fn publish(mut self) -> Result<PathBuf, PipelineError> {
        let mut sink = self.sink.take().ok_or(PipelineError::Finalize(MediaError::Closed))?;

        if let Err(e) = sink.finalize() {
            discard_sink(sink.as_mut(), &self.staging);
            return Err(PipelineError::Finalize(e));
        }
        drop(sink);

        if let Err(source) = std::fs::rename(&self.staging, &self.target) {
            remove_quietly(&self.staging);
            return Err(PipelineError::Publish {
                path: self.target.clone(),
                source,
            });
        }

        info!("Wrote {}", self.target.display());
        Ok(self.target.clone())
    }

    /// Keep what was written so far as a partial artifact
    ///
    /// Returns the staging path if at least one frame was written and the
    /// container could be finalized; otherwise the file is removed.
    pub fn keep_partial(mut self) -> Option<PathBuf> {
        let mut sink = self.sink.take()?;
        let frames = sink.frames_written();
        if frames == 0 {
            discard_sink(sink.as_mut(), &self.staging);
            return None;
        }

        match sink.finalize() {
            Ok(()) => {
                info!(
                    "Kept partial output {} ({} frames)",
                    self.staging.display(),
                    frames
                );
                Some(self.staging.clone())
            }
            Err(e) => {
                warn!("Could not finalize partial output: {}", e);
                discard_sink(sink.as_mut(), &self.staging);
                None
            }
        }
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            discard_sink(sink.as_mut(), &self.staging);
        }
    }
}

fn discard_sink(sink: &mut dyn FrameSink, staging: &Path) {
    if let Err(e) = sink.discard() {
        warn!("Failed to discard {}: {}", staging.display(), e);
    }
    remove_quietly(staging);
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
