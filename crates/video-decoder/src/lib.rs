//! FFmpeg-backed frame source
//!
//! Demuxes the best video stream of a container, decodes it frame by frame
//! and converts every decoded picture to tightly packed RGB24.
//!
//! Frames are produced lazily: nothing is decoded until
//! [`FrameSource::next_frame`] asks for it, and the decoder is flushed at end
//! of stream so trailing frames held back by B-frame reordering are not lost.

use egg_inspect_common::{Frame, FrameRate, FrameSource, MediaError, VideoInfo};
use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Initialize the `FFmpeg` libraries once per process
///
/// # Errors
///
/// Returns the `FFmpeg` error if initialization failed (cached for later calls).
pub fn init_ffmpeg() -> Result<(), ffmpeg::Error> {
    static INIT: OnceLock<Result<(), ffmpeg::Error>> = OnceLock::new();
    *INIT.get_or_init(|| {
        ffmpeg::init()?;
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
        Ok(())
    })
}

/// Read stream metadata without decoding any frame
///
/// # Errors
///
/// Same as [`FfmpegSource::open`].
pub fn probe(path: &Path) -> Result<VideoInfo, MediaError> {
    let mut source = FfmpegSource::open(path)?;
    let info = source.info().clone();
    source.close();
    Ok(info)
}

/// Sequential RGB24 frame reader over one video file
pub struct FfmpegSource {
    path: PathBuf,
    info: VideoInfo,
    next_index: u64,
    state: Option<DecodeState>,
}

impl FfmpegSource {
    /// Open `path` and prepare a decoder for its best video stream
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::Open`] if the file cannot be read or the
    /// container is not recognized, and [`MediaError::NoVideoStream`] if it
    /// holds no video.
    pub fn open(path: &Path) -> Result<Self, MediaError> {
        init_ffmpeg().map_err(|e| open_error(path, &e))?;

        let input = ffmpeg::format::input(&path).map_err(|e| open_error(path, &e))?;

        let (stream_index, time_base, frame_rate, frame_count, parameters) = {
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| MediaError::NoVideoStream {
                    path: path.to_path_buf(),
                })?;
            (
                stream.index(),
                stream.time_base(),
                frame_rate_of(stream.avg_frame_rate(), stream.rate()),
                u64::try_from(stream.frames()).ok().filter(|&n| n > 0),
                stream.parameters(),
            )
        };

        let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
            .and_then(|context| context.decoder().video())
            .map_err(|e| open_error(path, &e))?;

        let (width, height) = (decoder.width(), decoder.height());
        if width == 0 || height == 0 {
            return Err(MediaError::Open {
                path: path.to_path_buf(),
                reason: "video stream has no dimensions".to_string(),
            });
        }

        let codec = decoder
            .codec()
            .map_or_else(|| "unknown".to_string(), |c| c.name().to_string());
        let duration = (input.duration() > 0)
            .then(|| input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE));

        let info = VideoInfo {
            width,
            height,
            frame_rate,
            frame_count,
            duration,
            codec,
        };

        info!(
            "Opened {}: {}x{} @ {} fps, {} frames ({})",
            path.display(),
            info.width,
            info.height,
            info.frame_rate,
            info.frame_count
                .map_or_else(|| "unknown".to_string(), |n| n.to_string()),
            info.codec
        );

        Ok(Self {
            path: path.to_path_buf(),
            info,
            next_index: 0,
            state: Some(DecodeState {
                input,
                decoder,
                stream_index,
                time_base,
                decoded: ffmpeg::util::frame::video::Video::empty(),
                converted: ffmpeg::util::frame::video::Video::empty(),
                scaler: None,
                eof_sent: false,
            }),
        })
    }

    /// Path the source was opened from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, MediaError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };

        let index = self.next_index;
        let frame = state.next_decoded(index)?;
        if frame.is_some() {
            self.next_index += 1;
        } else {
            debug!("End of stream after {} frames", self.next_index);
        }
        Ok(frame)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            debug!("Closed {}", self.path.display());
        }
    }
}

/// Scaler cache key: source pixel format and size
type ScalerKey = (ffmpeg::format::Pixel, u32, u32);

struct DecodeState {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    decoded: ffmpeg::util::frame::video::Video,
    converted: ffmpeg::util::frame::video::Video,
    scaler: Option<(ScalerKey, ffmpeg::software::scaling::Context)>,
    eof_sent: bool,
}

impl DecodeState {
    fn next_decoded(&mut self, index: u64) -> Result<Option<Frame>, MediaError> {
        loop {
            match self.decoder.receive_frame(&mut self.decoded) {
                Ok(()) => return self.convert(index).map(Some),
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {}
                Err(e) => return Err(decode_error(index, &e)),
            }

            if self.eof_sent {
                return Ok(None);
            }
            self.feed(index)?;
        }
    }

    /// Send the next packet of our stream to the decoder, or EOF
    fn feed(&mut self, index: u64) -> Result<(), MediaError> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    return self
                        .decoder
                        .send_packet(&packet)
                        .map_err(|e| decode_error(index, &e));
                }
                Err(ffmpeg::Error::Eof) => {
                    self.eof_sent = true;
                    return self.decoder.send_eof().map_err(|e| decode_error(index, &e));
                }
                Err(e) => return Err(decode_error(index, &e)),
            }
        }
    }

    fn convert(&mut self, index: u64) -> Result<Frame, MediaError> {
        let key: ScalerKey = (
            self.decoded.format(),
            self.decoded.width(),
            self.decoded.height(),
        );
        let (_, width, height) = key;

        // Resolution changes mid-stream get a fresh scaler at the new size
        if self.scaler.as_ref().map_or(true, |(cached, _)| *cached != key) {
            let context = ffmpeg::software::scaling::Context::get(
                key.0,
                width,
                height,
                ffmpeg::format::Pixel::RGB24,
                width,
                height,
                ffmpeg::software::scaling::Flags::BILINEAR,
            )
            .map_err(|e| decode_error(index, &e))?;
            self.scaler = Some((key, context));
            self.converted = ffmpeg::util::frame::video::Video::empty();
        }

        let (_, scaler) = self.scaler.as_mut().ok_or_else(|| MediaError::Decode {
            frame_index: Some(index),
            reason: "no pixel format converter".to_string(),
        })?;
        scaler
            .run(&self.decoded, &mut self.converted)
            .map_err(|e| decode_error(index, &e))?;

        let timestamp = self
            .decoded
            .timestamp()
            .or_else(|| self.decoded.pts())
            .map(|ts| {
                ts as f64 * f64::from(self.time_base.numerator())
                    / f64::from(self.time_base.denominator())
            });

        Frame::from_raw(
            index,
            timestamp,
            width,
            height,
            copy_rgb_plane(&self.converted),
        )
    }
}

/// Copy an RGB24 frame into a contiguous buffer, dropping row padding
fn copy_rgb_plane(frame: &ffmpeg::util::frame::video::Video) -> Vec<u8> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let stride = frame.stride(0);
    let plane = frame.data(0);

    let mut data = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let row_start = y * stride;
        data.extend_from_slice(&plane[row_start..row_start + width * 3]);
    }
    data
}

/// Pick the first usable rate: average rate, then the stream's base rate
fn frame_rate_of(average: ffmpeg::Rational, base: ffmpeg::Rational) -> FrameRate {
    [average, base]
        .into_iter()
        .find_map(|rate| {
            let num = u32::try_from(rate.numerator()).ok()?;
            let den = u32::try_from(rate.denominator()).ok()?;
            let rate = FrameRate::new(num, den);
            rate.is_valid().then_some(rate)
        })
        .unwrap_or_default()
}

fn open_error(path: &Path, err: &ffmpeg::Error) -> MediaError {
    MediaError::Open {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn decode_error(index: u64, err: &ffmpeg::Error) -> MediaError {
    MediaError::Decode {
        frame_index: Some(index),
        reason: err.to_string(),
    }
}
