//! Letterbox geometry and YOLO output decoding
//!
//! Everything here works on plain slices so it can be tested without an
//! ONNX Runtime session.

use crate::names::class_name;
use crate::{DetectionConfig, DetectionError};
use egg_inspect_common::{BoundingBox, Detection};
use image::RgbImage;
use ndarray::Array4;

/// Gray used by Ultralytics for letterbox padding
pub const PAD_VALUE: u8 = 114;

/// Mapping between source frame pixels and the square model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Source-to-input scale factor (same on both axes)
    pub scale: f32,
    /// Horizontal padding on the left, in input pixels
    pub pad_x: u32,
    /// Vertical padding on the top, in input pixels
    pub pad_y: u32,
    /// Size of the resized image inside the padded square
    pub resized: (u32, u32),
    /// Source frame size
    pub source: (u32, u32),
}

impl Letterbox {
    /// Fit a `width` x `height` frame into a `size` x `size` square
    #[must_use]
    pub fn fit(width: u32, height: u32, size: u32) -> Self {
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
        Self {
            scale,
            pad_x: (size - new_w) / 2,
            pad_y: (size - new_h) / 2,
            resized: (new_w, new_h),
            source: (width, height),
        }
    }

    /// Map a box in model input coordinates back onto the source frame
    #[must_use]
    pub fn to_source(&self, bbox: BoundingBox) -> BoundingBox {
        BoundingBox::new(
            (bbox.x - self.pad_x as f32) / self.scale,
            (bbox.y - self.pad_y as f32) / self.scale,
            bbox.width / self.scale,
            bbox.height / self.scale,
        )
        .clamp_to(self.source.0, self.source.1)
    }
}

/// Resize `image` into a padded `(1, 3, size, size)` tensor normalized to [0, 1]
#[must_use]
pub fn letterbox(image: &RgbImage, size: u32) -> (Array4<f32>, Letterbox) {
    let geometry = Letterbox::fit(image.width(), image.height(), size);
    let (new_w, new_h) = geometry.resized;

    let resized = image::imageops::resize(
        image,
        new_w,
        new_h,
        image::imageops::FilterType::Triangle,
    );

    let side = size as usize;
    let mut input = Array4::from_elem((1, 3, side, side), f32::from(PAD_VALUE) / 255.0);
    let (pad_x, pad_y) = (geometry.pad_x as usize, geometry.pad_y as usize);

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize + pad_x, y as usize + pad_y);
        input[[0, 0, y, x]] = f32::from(pixel[0]) / 255.0;
        input[[0, 1, y, x]] = f32::from(pixel[1]) / 255.0;
        input[[0, 2, y, x]] = f32::from(pixel[2]) / 255.0;
    }

    (input, geometry)
}

/// Decode a `[1, 4 + classes, anchors]` prediction tensor
///
/// Boxes come back in source frame pixels, thresholded, suppressed per
/// class and capped at `max_detections`, highest confidence first.
pub fn decode_predictions(
    data: &[f32],
    dims: &[usize],
    geometry: &Letterbox,
    config: &DetectionConfig,
    names: &[String],
) -> Result<Vec<Detection>, DetectionError> {
    if dims.len() != 3 || dims[0] != 1 || dims[1] <= 4 {
        return Err(DetectionError::Output(format!(
            "expected [1, 4 + classes, anchors], got {dims:?}"
        )));
    }
    let num_features = dims[1];
    let num_anchors = dims[2];
    if data.len() < num_features * num_anchors {
        return Err(DetectionError::Output(format!(
            "tensor holds {} values, shape {dims:?} needs {}",
            data.len(),
            num_features * num_anchors
        )));
    }

    // Layout is [feature][anchor]
    let mut candidates = Vec::with_capacity(num_anchors / 10);
    for anchor in 0..num_anchors {
        let feature = |index: usize| data[index * num_anchors + anchor];

        let (class_id, confidence) = (4..num_features)
            .map(|f| (f - 4, feature(f)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if confidence < config.confidence_threshold {
            continue;
        }

        let bbox = geometry.to_source(BoundingBox::from_center(
            feature(0),
            feature(1),
            feature(2),
            feature(3),
        ));
        if bbox.area() <= 0.0 {
            continue;
        }

        let class_id = u32::try_from(class_id).unwrap_or(u32::MAX);
        candidates.push(Detection {
            class_id,
            class_name: class_name(names, class_id),
            confidence,
            bbox,
        });
    }

    let mut detections = non_max_suppression(candidates, config.iou_threshold);
    detections.truncate(config.max_detections);
    Ok(detections)
}

/// Per-class non-maximum suppression, highest confidence first
#[must_use]
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
