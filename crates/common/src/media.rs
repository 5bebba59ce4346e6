//! Stream metadata and the source/sink traits

use crate::{Frame, MediaError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Rational frame rate (`num / den` frames per second)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    #[must_use]
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Whole frames per second
    #[must_use]
    pub const fn from_fps(fps: u32) -> Self {
        Self::new(fps, 1)
    }

    /// Frames per second as a float
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            f64::from(self.num) / f64::from(self.den)
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::from_fps(30)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Metadata of an opened video stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    /// Total frames, when the container declares it
    pub frame_count: Option<u64>,
    /// Duration in seconds, when known
    pub duration: Option<f64>,
    /// Codec name as reported by the demuxer
    pub codec: String,
}

/// Shape an output stream is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSpec {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
}

impl SinkSpec {
    #[must_use]
    pub fn new(width: u32, height: u32, frame_rate: FrameRate) -> Self {
        Self {
            width,
            height,
            frame_rate,
        }
    }

    /// Reject frames whose shape differs from the declared one
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::DimensionMismatch`] on any width or height difference.
    pub fn check(&self, frame: &Frame) -> Result<(), MediaError> {
        let actual = frame.dimensions();
        if actual == (self.width, self.height) {
            Ok(())
        } else {
            Err(MediaError::DimensionMismatch {
                frame_index: frame.index(),
                expected: (self.width, self.height),
                actual,
            })
        }
    }
}

impl From<&VideoInfo> for SinkSpec {
    fn from(info: &VideoInfo) -> Self {
        Self::new(info.width, info.height, info.frame_rate)
    }
}

/// Ordered, finite, non-restartable supply of frames
pub trait FrameSource {
    /// Metadata read when the source was opened
    fn info(&self) -> &VideoInfo;

    /// Next frame in file order, `None` at end of stream
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::Decode`] when a frame cannot be decoded.
    fn next_frame(&mut self) -> Result<Option<Frame>, MediaError>;

    /// Release the underlying resources. Safe to call more than once.
    fn close(&mut self);
}

/// Append-only video output
pub trait FrameSink {
    fn spec(&self) -> &SinkSpec;

    /// Append a frame after the previously written ones
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::DimensionMismatch`] if the frame shape differs
    /// from [`FrameSink::spec`], or an encoding error.
    fn write_frame(&mut self, frame: &Frame) -> Result<(), MediaError>;

    /// Number of frames accepted so far
    fn frames_written(&self) -> u64;

    /// Flush and close the container. The file is playable only after this
    /// returns `Ok`.
    fn finalize(&mut self) -> Result<(), MediaError>;

    /// Abandon the output and remove whatever was written
    fn discard(&mut self) -> Result<(), MediaError>;
}

/// Opens sources and creates sinks for a container/codec implementation
pub trait MediaBackend {
    /// # Errors
    ///
    /// Returns an IO-class [`MediaError`] if the file is unreadable or the
    /// container is not recognized.
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, MediaError>;

    /// # Errors
    ///
    /// Returns an IO-class [`MediaError`] if the destination is not writable
    /// or no suitable encoder is available.
    fn create_sink(&self, path: &Path, spec: SinkSpec) -> Result<Box<dyn FrameSink>, MediaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rate() {
        let ntsc = FrameRate::new(30000, 1001);
        assert!((ntsc.as_f64() - 29.97).abs() < 0.01);
        assert_eq!(ntsc.to_string(), "30000/1001");
        assert_eq!(FrameRate::from_fps(25).to_string(), "25");
        assert!(!FrameRate::new(0, 1).is_valid());
        assert_eq!(FrameRate::new(1, 0).as_f64(), 0.0);
    }

    #[test]
    fn test_sink_spec_check() {
        let spec = SinkSpec::new(640, 480, FrameRate::from_fps(30));
        assert!(spec.check(&Frame::filled(0, 640, 480, [0, 0, 0])).is_ok());

        let err = spec.check(&Frame::filled(4, 320, 240, [0, 0, 0])).unwrap_err();
        assert!(matches!(
            err,
            MediaError::DimensionMismatch {
                frame_index: 4,
                expected: (640, 480),
                actual: (320, 240),
            }
        ));
    }
}
