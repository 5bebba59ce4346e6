//! Decoded video frames

use crate::MediaError;
use image::{Rgb, RgbImage};

/// Channels per pixel (8-bit RGB)
pub const CHANNELS: usize = 3;

/// One decoded image at a fixed position in a video
///
/// Frames are immutable once produced; stages that change pixels build a new
/// frame with [`Frame::with_image`] so the original stays untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    index: u64,
    timestamp: Option<f64>,
    image: RgbImage,
}

impl Frame {
    /// Create a frame from an RGB image
    #[must_use]
    pub fn new(index: u64, timestamp: Option<f64>, image: RgbImage) -> Self {
        Self {
            index,
            timestamp,
            image,
        }
    }

    /// Create a frame from a tightly packed RGB24 buffer (row-major, no padding)
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::Decode`] if `data` does not hold exactly
    /// `width * height * 3` bytes.
    pub fn from_raw(
        index: u64,
        timestamp: Option<f64>,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> Result<Self, MediaError> {
        let len = data.len();
        let image = RgbImage::from_raw(width, height, data).ok_or_else(|| MediaError::Decode {
            frame_index: Some(index),
            reason: format!("buffer of {len} bytes does not hold a {width}x{height} RGB frame"),
        })?;
        Ok(Self::new(index, timestamp, image))
    }

    /// Create a frame filled with a single color
    #[must_use]
    pub fn filled(index: u64, width: u32, height: u32, color: [u8; 3]) -> Self {
        Self::new(index, None, RgbImage::from_pixel(width, height, Rgb(color)))
    }

    /// Zero-based position of the frame in its stream
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Presentation time in seconds, if the container provided one
    #[must_use]
    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// `(width, height)` in pixels
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Pixel buffer
    #[must_use]
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Raw RGB24 bytes, row-major without padding
    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Build a frame at the same position carrying different pixels
    #[must_use]
    pub fn with_image(&self, image: RgbImage) -> Frame {
        Frame::new(self.index, self.timestamp, image)
    }

    /// Take ownership of the pixel buffer
    #[must_use]
    pub fn into_image(self) -> RgbImage {
        self.image
    }
}
