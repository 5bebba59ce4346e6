//! Detection results and the model boundary

use crate::{Frame, InferenceError};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates of the source frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// X coordinate of the top-left corner
    pub x: f32,
    /// Y coordinate of the top-left corner
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    #[must_use]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a box from center coordinates
    #[must_use]
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    #[must_use]
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    #[must_use]
    #[inline]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    #[must_use]
    #[inline]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    #[must_use]
    #[inline]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Intersection over Union with another box
    #[must_use]
    #[inline]
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Restrict the box to a `width` x `height` frame
    #[must_use]
    pub fn clamp_to(&self, width: u32, height: u32) -> BoundingBox {
        let (w, h) = (width as f32, height as f32);
        let x1 = self.x.clamp(0.0, w);
        let y1 = self.y.clamp(0.0, h);
        let x2 = self.right().clamp(0.0, w);
        let y2 = self.bottom().clamp(0.0, h);
        BoundingBox::new(x1, y1, x2 - x1, y2 - y1)
    }
}

/// One model-predicted object instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Model class index
    pub class_id: u32,
    /// Human-readable class name
    pub class_name: String,
    /// Confidence score (0-1)
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    /// Overlay text, e.g. `"defective 0.87"`
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {:.2}", self.class_name, self.confidence)
    }
}

/// A loaded detection model
///
/// Inference dominates per-frame cost, so callers run it once per frame and
/// never speculatively. `&mut self` keeps one call in flight per instance.
pub trait Detector {
    /// Run the model on one frame
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        (**self).infer(frame)
    }
}
