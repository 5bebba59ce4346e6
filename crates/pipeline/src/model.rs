use egg_inspect_common::{Detection, Detector, Frame, InferenceError};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared, thread-safe handle to one loaded model
///
/// Clones share the same detector; the mutex keeps at most one inference
/// in flight per model instance.
#[derive(Clone)]
pub struct ModelHandle {
    detector: Arc<Mutex<Box<dyn Detector + Send>>>,
}

impl ModelHandle {
    pub fn new<D: Detector + Send + 'static>(detector: D) -> Self {
        Self {
            detector: Arc::new(Mutex::new(Box::new(detector))),
        }
    }

    /// Run the model on one frame, waiting for any call in progress
    ///
    /// # Errors
    ///
    /// Whatever the underlying detector returns.
    pub fn infer(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let mut detector = self
            .detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        detector.infer(frame)
    }
}

impl Detector for ModelHandle {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        ModelHandle::infer(self, frame)
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("clones", &Arc::strong_count(&self.detector))
            .finish()
    }
}
