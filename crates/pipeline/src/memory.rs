//! Codec-free media backend
//!
//! Sources are registered in memory; sinks write a small raw container
//! (`EGGMEM1` header line followed by packed RGB24 frames) to real files,
//! so staging, renaming and cleanup behave exactly as with encoded video.
//! Files written by a sink can be opened again as sources.

use egg_inspect_common::{
    Frame, FrameRate, FrameSink, FrameSource, MediaBackend, MediaError, SinkSpec, VideoInfo,
    CHANNELS,
};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

const MAGIC: &str = "EGGMEM1 ";
const CODEC: &str = "rawvideo";

/// A video held in memory
#[derive(Debug, Clone)]
pub struct MemoryVideo {
    width: u32,
    height: u32,
    frame_rate: FrameRate,
    frames: Vec<RgbImage>,
    declare_length: bool,
    fail_at: Option<u64>,
}

impl MemoryVideo {
    /// An empty video with the given stream shape
    #[must_use]
    pub fn new(width: u32, height: u32, frame_rate: FrameRate) -> Self {
        Self {
            width,
            height,
            frame_rate,
            frames: Vec::new(),
            declare_length: true,
            fail_at: None,
        }
    }

    /// `count` frames, each with a distinct pattern derived from its index
    #[must_use]
    pub fn generated(count: u64, width: u32, height: u32, frame_rate: FrameRate) -> Self {
        let frames = (0..count)
            .map(|i| {
                RgbImage::from_fn(width, height, |x, y| {
                    image::Rgb([
                        (i.wrapping_mul(37) % 256) as u8,
                        ((x + i as u32) % 256) as u8,
                        ((y * 2) % 256) as u8,
                    ])
                })
            })
            .collect();
        Self {
            frames,
            ..Self::new(width, height, frame_rate)
        }
    }

    /// Append a frame; it may differ in size from the declared stream
    #[must_use]
    pub fn with_frame(mut self, image: RgbImage) -> Self {
        self.frames.push(image);
        self
    }

    /// Report an unknown frame count, like a live or damaged stream
    #[must_use]
    pub fn without_length(mut self) -> Self {
        self.declare_length = false;
        self
    }

    /// Fail to decode the frame at `index`
    #[must_use]
    pub fn failing_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Frames as the source will yield them
    #[must_use]
    pub fn frames(&self) -> Vec<Frame> {
        self.frames
            .iter()
            .enumerate()
            .map(|(i, image)| Frame::new(i as u64, self.timestamp(i as u64), image.clone()))
            .collect()
    }

    fn timestamp(&self, index: u64) -> Option<f64> {
        let fps = self.frame_rate.as_f64();
        (fps > 0.0).then(|| index as f64 / fps)
    }

    fn info(&self) -> VideoInfo {
        let count = self.frames.len() as u64;
        let fps = self.frame_rate.as_f64();
        VideoInfo {
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
            frame_count: self.declare_length.then_some(count),
            duration: (self.declare_length && fps > 0.0).then(|| count as f64 / fps),
            codec: CODEC.to_string(),
        }
    }
}

/// Media backend over in-memory sources and raw files
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    videos: Arc<Mutex<HashMap<PathBuf, MemoryVideo>>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `video` openable at `path`
    pub fn insert(&self, path: impl Into<PathBuf>, video: MemoryVideo) {
        self.videos
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), video);
    }

    /// Read a file written by a [`MemoryBackend`] sink
    ///
    /// # Errors
    ///
    /// [`MediaError::Open`] if the file is missing, unfinished or malformed.
    pub fn read_file(path: &Path) -> Result<(SinkSpec, Vec<Frame>), MediaError> {
        let invalid = |reason: &str| MediaError::Open {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let bytes = std::fs::read(path).map_err(|e| invalid(&e.to_string()))?;
        let newline = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| invalid("not a finalized raw video"))?;
        let header = std::str::from_utf8(&bytes[..newline])
            .ok()
            .and_then(|line| line.strip_prefix(MAGIC))
            .ok_or_else(|| invalid("not a finalized raw video"))?;
        let header: FileHeader =
            serde_json::from_str(header).map_err(|e| invalid(&e.to_string()))?;

        let frame_len = header.width as usize * header.height as usize * CHANNELS;
        let data = &bytes[newline + 1..];
        if frame_len == 0 || data.len() != frame_len * header.frames as usize {
            return Err(invalid("frame data does not match header"));
        }

        let fps = header.frame_rate.as_f64();
        let frames = data
            .chunks_exact(frame_len)
            .enumerate()
            .map(|(i, chunk)| {
                let index = i as u64;
                Frame::from_raw(
                    index,
                    (fps > 0.0).then(|| index as f64 / fps),
                    header.width,
                    header.height,
                    chunk.to_vec(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok((
            SinkSpec::new(header.width, header.height, header.frame_rate),
            frames,
        ))
    }
}

impl MediaBackend for MemoryBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, MediaError> {
        let registered = self
            .videos
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned();

        let video = match registered {
            Some(video) => video,
            None => {
                let (spec, frames) = Self::read_file(path)?;
                let mut video = MemoryVideo::new(spec.width, spec.height, spec.frame_rate);
                video.frames = frames.into_iter().map(Frame::into_image).collect();
                video
            }
        };

        Ok(Box::new(MemorySource {
            info: video.info(),
            frames: video.frames(),
            fail_at: video.fail_at,
            next: 0,
            closed: false,
        }))
    }

    fn create_sink(&self, path: &Path, spec: SinkSpec) -> Result<Box<dyn FrameSink>, MediaError> {
        let create_error = |reason: String| MediaError::Create {
            path: path.to_path_buf(),
            reason,
        };
        if spec.width == 0 || spec.height == 0 || !spec.frame_rate.is_valid() {
            return Err(create_error(format!(
                "invalid stream shape {}x{} @ {} fps",
                spec.width, spec.height, spec.frame_rate
            )));
        }
        let file = File::create(path).map_err(|e| create_error(e.to_string()))?;

        Ok(Box::new(MemorySink {
            path: path.to_path_buf(),
            spec,
            frames: Vec::new(),
            file: Some(file),
        }))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FileHeader {
    width: u32,
    height: u32,
    frame_rate: FrameRate,
    frames: u64,
}

struct MemorySource {
    info: VideoInfo,
    frames: Vec<Frame>,
    fail_at: Option<u64>,
    next: usize,
    closed: bool,
}

impl FrameSource for MemorySource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, MediaError> {
        if self.closed {
            return Ok(None);
        }
        let index = self.next as u64;
        if self.fail_at == Some(index) {
            return Err(MediaError::Decode {
                frame_index: Some(index),
                reason: "corrupt frame data".to_string(),
            });
        }
        let frame = self.frames.get(self.next).cloned();
        if frame.is_some() {
            self.next += 1;
        }
        Ok(frame)
    }

    fn close(&mut self) {
        self.closed = true;
        self.frames.clear();
    }
}

struct MemorySink {
    path: PathBuf,
    spec: SinkSpec,
    frames: Vec<Frame>,
    file: Option<File>,
}

impl FrameSink for MemorySink {
    fn spec(&self) -> &SinkSpec {
        &self.spec
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), MediaError> {
        if self.file.is_none() {
            return Err(MediaError::Closed);
        }
        self.spec.check(frame)?;
        self.frames.push(frame.clone());
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames.len() as u64
    }

    fn finalize(&mut self) -> Result<(), MediaError> {
        let file = self.file.take().ok_or(MediaError::Closed)?;
        let header = FileHeader {
            width: self.spec.width,
            height: self.spec.height,
            frame_rate: self.spec.frame_rate,
            frames: self.frames.len() as u64,
        };
        let header =
            serde_json::to_string(&header).map_err(|e| MediaError::Finalize(e.to_string()))?;

        let mut writer = BufWriter::new(file);
        writeln!(writer, "{MAGIC}{header}")?;
        for frame in &self.frames {
            writer.write_all(frame.as_raw())?;
        }
        writer
            .into_inner()
            .map_err(|e| MediaError::Finalize(e.to_string()))?
            .sync_all()?;
        Ok(())
    }

    fn discard(&mut self) -> Result<(), MediaError> {
        drop(self.file.take());
        self.frames.clear();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
