//! Run lifecycle: status, progress and cancellation

use crate::CancellationToken;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Where a run is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed {
        frame_index: Option<u64>,
        reason: String,
    },
}

impl RunStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Cancelled | RunStatus::Failed { .. }
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "idle"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
            RunStatus::Failed {
                frame_index: Some(index),
                reason,
            } => write!(f, "failed at frame {index}: {reason}"),
            RunStatus::Failed {
                frame_index: None,
                reason,
            } => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Default)]
struct RunState {
    status: Option<RunStatus>,
    total: Option<u64>,
    partial_output: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub(crate) struct RunShared {
    token: CancellationToken,
    processed: AtomicU64,
    state: Mutex<RunState>,
}

impl RunShared {
    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Idle -> Running; returns the current status if the run already started
    pub(crate) fn begin(&self) -> Result<(), RunStatus> {
        let mut state = self.state();
        match &state.status {
            None => {
                state.status = Some(RunStatus::Running);
                Ok(())
            }
            Some(status) => Err(status.clone()),
        }
    }

    pub(crate) fn set_total(&self, total: Option<u64>) {
        self.state().total = total;
    }

    pub(crate) fn frame_done(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn finish(&self, status: RunStatus, partial_output: Option<PathBuf>) {
        let mut state = self.state();
        state.status = Some(status);
        state.partial_output = partial_output;
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// One input-to-output processing job
///
/// Created idle, started once by
/// [`PipelineController::run`](crate::PipelineController::run). Other
/// threads observe and cancel it through [`RunHandle`]s.
#[derive(Debug, Default)]
pub struct PipelineRun {
    shared: Arc<RunShared>,
}

impl PipelineRun {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a run that stops when `token` is cancelled
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            shared: Arc::new(RunShared {
                token,
                ..RunShared::default()
            }),
        }
    }

    /// A cloneable, thread-safe view of this run
    #[must_use]
    pub fn handle(&self) -> RunHandle {
        RunHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub(crate) fn shared(&self) -> &RunShared {
        &self.shared
    }
}

/// Cancels and polls a [`PipelineRun`] from any thread
#[derive(Debug, Clone)]
pub struct RunHandle {
    shared: Arc<RunShared>,
}

impl RunHandle {
    /// Ask the run to stop before reading its next frame
    pub fn cancel(&self) {
        self.shared.token.cancel();
    }

    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    /// Frames read, annotated and written so far
    #[must_use]
    pub fn processed_count(&self) -> u64 {
        self.shared.processed.load(Ordering::SeqCst)
    }

    /// Frame count declared by the input, if known
    #[must_use]
    pub fn total_count(&self) -> Option<u64> {
        self.shared.state().total
    }

    /// Completion fraction in [0, 1], if the total is known
    #[must_use]
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total_count().filter(|&t| t > 0)?;
        Some((self.processed_count() as f64 / total as f64).min(1.0))
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.shared
            .state()
            .status
            .clone()
            .unwrap_or(RunStatus::Idle)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Partial video kept by a cancelled or failed run
    #[must_use]
    pub fn partial_output(&self) -> Option<PathBuf> {
        self.shared.state().partial_output.clone()
    }
}
