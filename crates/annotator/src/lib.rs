//! Detection overlays for egg inspection frames
//!
//! Draws one box outline and one filled label plate (`"<class> <conf>"`)
//! per detection onto a copy of the frame. Colors are keyed by class id so
//! a defect class keeps its color for the whole video.
//!
//! Labels use a TrueType font when one is configured or installed, and the
//! built-in 5x7 bitmap font otherwise.

pub mod bitmap_font;
pub mod palette;

use ab_glyph::{FontArc, PxScale};
use egg_inspect_common::{Detection, Frame};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Fonts tried when no `font_path` is configured
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Visual settings for overlays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationStyle {
    /// Box outline thickness in pixels
    pub line_thickness: u32,
    /// Label text height in pixels (TrueType)
    pub font_size: f32,
    /// Integer magnification of the bitmap font
    pub bitmap_scale: u32,
    /// Space between label text and plate border
    pub label_padding: u32,
    /// TrueType font file (None = look for a system font)
    pub font_path: Option<PathBuf>,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            line_thickness: 2,
            font_size: 16.0,
            bitmap_scale: 2,
            label_padding: 3,
            font_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AnnotatorError {
    #[error("Failed to read font {path}: {source}")]
    FontRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid font {path}: {reason}")]
    FontParse { path: PathBuf, reason: String },
}

enum LabelFont {
    TrueType { font: FontArc, scale: PxScale },
    Bitmap { scale: u32 },
}

/// Draws detections onto frames
pub struct FrameAnnotator {
    style: AnnotationStyle,
    font: LabelFont,
}

impl FrameAnnotator {
    /// Create an annotator, loading the configured or a system font
    ///
    /// # Errors
    ///
    /// Fails only if `style.font_path` is set and that font cannot be read
    /// or parsed. Missing system fonts fall back to the bitmap font.
    pub fn new(style: AnnotationStyle) -> Result<Self, AnnotatorError> {
        let font = match &style.font_path {
            Some(path) => Some(load_font(path)?),
            None => SYSTEM_FONTS
                .iter()
                .map(Path::new)
                .filter(|p| p.exists())
                .find_map(|p| load_font(p).ok()),
        };

        let font = match font {
            Some(font) => LabelFont::TrueType {
                font,
                scale: PxScale::from(style.font_size),
            },
            None => {
                info!("No TrueType font available, using built-in bitmap font");
                LabelFont::Bitmap {
                    scale: style.bitmap_scale.max(1),
                }
            }
        };

        Ok(Self { style, font })
    }

    /// Create an annotator that always uses the bitmap font
    #[must_use]
    pub fn with_bitmap_font(style: AnnotationStyle) -> Self {
        let scale = style.bitmap_scale.max(1);
        Self {
            style,
            font: LabelFont::Bitmap { scale },
        }
    }

    #[must_use]
    pub fn style(&self) -> &AnnotationStyle {
        &self.style
    }

    #[must_use]
    pub fn uses_truetype(&self) -> bool {
        matches!(self.font, LabelFont::TrueType { .. })
    }

    /// Return an annotated copy of `frame`
    ///
    /// With no detections the copy is pixel-identical to the input.
    #[must_use]
    pub fn annotate(&self, frame: &Frame, detections: &[Detection]) -> Frame {
        let mut image = frame.image().clone();
        for detection in detections {
            self.draw_detection(&mut image, detection);
        }
        if !detections.is_empty() {
            debug!(
                "Annotated frame {} with {} detections",
                frame.index(),
                detections.len()
            );
        }
        frame.with_image(image)
    }

    fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
        let (width, height) = image.dimensions();
        let bbox = detection.bbox.clamp_to(width, height);
        if width == 0 || height == 0 {
            return;
        }

        let color = palette::color_for(detection.class_id);

        let x0 = (bbox.x.floor() as i32).min(width as i32 - 1);
        let y0 = (bbox.y.floor() as i32).min(height as i32 - 1);
        let box_w = (bbox.right().ceil() as i32 - x0).max(1) as u32;
        let box_h = (bbox.bottom().ceil() as i32 - y0).max(1) as u32;

        for t in 0..self.style.line_thickness {
            let inner_w = box_w.saturating_sub(2 * t);
            let inner_h = box_h.saturating_sub(2 * t);
            if inner_w == 0 || inner_h == 0 {
                break;
            }
            let rect = Rect::at(x0 + t as i32, y0 + t as i32).of_size(inner_w, inner_h);
            draw_hollow_rect_mut(image, rect, color);
        }

        self.draw_label(image, x0, y0, &detection.label(), color);
    }

    /// Plate above the box, or inside its top edge when there is no room
    fn draw_label(&self, image: &mut RgbImage, x0: i32, y0: i32, text: &str, color: Rgb<u8>) {
        let padding = self.style.label_padding;
        let (text_w, text_h) = self.text_size(text);
        let plate_w = (text_w + 2 * padding).max(1);
        let plate_h = (text_h + 2 * padding).max(1);

        let plate_y = if y0 >= plate_h as i32 {
            y0 - plate_h as i32
        } else {
            y0
        };

        // imageproc clips drawing to the canvas
        draw_filled_rect_mut(image, Rect::at(x0, plate_y).of_size(plate_w, plate_h), color);

        let text_color = palette::text_color_on(color);
        let text_x = x0 + padding as i32;
        let text_y = plate_y + padding as i32;
        match &self.font {
            LabelFont::TrueType { font, scale } => {
                draw_text_mut(image, text_color, text_x, text_y, *scale, font, text);
            }
            LabelFont::Bitmap { scale } => {
                bitmap_font::draw_text(image, text_x, text_y, *scale, text_color, text);
            }
        }
    }

    fn text_size(&self, text: &str) -> (u32, u32) {
        match &self.font {
            LabelFont::TrueType { font, scale } => {
                imageproc::drawing::text_size(*scale, font, text)
            }
            LabelFont::Bitmap { scale } => bitmap_font::text_size(text, *scale),
        }
    }
}

fn load_font(path: &Path) -> Result<FontArc, AnnotatorError> {
    let data = std::fs::read(path).map_err(|source| AnnotatorError::FontRead {
        path: path.to_path_buf(),
        source,
    })?;
    let font = FontArc::try_from_vec(data).map_err(|e| AnnotatorError::FontParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    debug!("Loaded label font {}", path.display());
    Ok(font)
}

#[cfg(test)]
mod tests {
    use super::*;
    use egg_inspect_common::BoundingBox;

    fn detection(class_id: u32, bbox: BoundingBox) -> Detection {
        Detection {
            class_id,
            class_name: "crack".to_string(),
            confidence: 0.87,
            bbox,
        }
    }

    fn annotator() -> FrameAnnotator {
        FrameAnnotator::with_bitmap_font(AnnotationStyle::default())
    }

    #[test]
    fn test_style_defaults() {
        let style = AnnotationStyle::default();
        assert_eq!(style.line_thickness, 2);
        assert_eq!(style.bitmap_scale, 2);
        assert!(style.font_path.is_none());
    }

    #[test]
    fn test_box_outline_uses_class_color() {
        let frame = Frame::filled(0, 200, 150, [0, 0, 0]);
        let bbox = BoundingBox::new(50.0, 60.0, 80.0, 70.0);
        let out = annotator().annotate(&frame, &[detection(4, bbox)]);

        let color = palette::color_for(4);
        // Left and right edges at mid-height, both thickness rows
        assert_eq!(out.image().get_pixel(50, 95), &color);
        assert_eq!(out.image().get_pixel(51, 95), &color);
        assert_eq!(out.image().get_pixel(129, 95), &color);
        // Interior untouched
        assert_eq!(out.image().get_pixel(90, 95), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_label_above_box() {
        let frame = Frame::filled(0, 200, 150, [0, 0, 0]);
        let bbox = BoundingBox::new(50.0, 60.0, 80.0, 70.0);
        let out = annotator().annotate(&frame, &[detection(0, bbox)]);

        // Bitmap text is 14px high at scale 2, plus 3px padding each side
        let plate_top = 60 - 20;
        assert_eq!(out.image().get_pixel(51, plate_top + 1), &palette::color_for(0));
        assert_eq!(out.image().get_pixel(51, plate_top - 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_label_inside_box_at_top_edge() {
        let frame = Frame::filled(0, 200, 150, [0, 0, 0]);
        let bbox = BoundingBox::new(20.0, 5.0, 100.0, 100.0);
        let out = annotator().annotate(&frame, &[detection(2, bbox)]);

        assert_eq!(out.image().get_pixel(21, 6), &palette::color_for(2));
        assert_eq!(out.image().get_pixel(21, 4), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_plate_is_clipped_not_dropped() {
        let frame = Frame::filled(0, 64, 48, [10, 10, 10]);
        // Label is far wider than the space left of the right edge
        let bbox = BoundingBox::new(55.0, 30.0, 20.0, 30.0);
        let out = annotator().annotate(&frame, &[detection(1, bbox)]);

        assert_eq!(out.dimensions(), (64, 48));
        assert_eq!(out.image().get_pixel(63, 11), &palette::color_for(1));
    }

    #[test]
    fn test_box_entirely_outside_frame_does_not_panic() {
        let frame = Frame::filled(0, 32, 32, [0, 0, 0]);
        let bbox = BoundingBox::new(100.0, 100.0, 10.0, 10.0);
        let out = annotator().annotate(&frame, &[detection(0, bbox)]);
        assert_eq!(out.dimensions(), (32, 32));
    }

    #[test]
    fn test_missing_font_file_is_an_error() {
        let style = AnnotationStyle {
            font_path: Some(PathBuf::from("/nonexistent/font.ttf")),
            ..AnnotationStyle::default()
        };
        assert!(matches!(
            FrameAnnotator::new(style),
            Err(AnnotatorError::FontRead { .. })
        ));
    }

    #[test]
    fn test_invalid_font_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ttf");
        std::fs::write(&path, b"not a font").unwrap();

        let style = AnnotationStyle {
            font_path: Some(path),
            ..AnnotationStyle::default()
        };
        assert!(matches!(
            FrameAnnotator::new(style),
            Err(AnnotatorError::FontParse { .. })
        ));
    }
}
