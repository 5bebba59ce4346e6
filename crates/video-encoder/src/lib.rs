//! FFmpeg-backed frame sink
//!
//! Encodes RGB24 frames to H.264 (or MPEG-4 Part 2 when libx264 is not
//! available) in YUV420P and muxes them into the container implied by the
//! output file extension.
//!
//! # Example
//! ```no_run
//! use egg_inspect_common::{Frame, FrameRate, FrameSink, SinkSpec};
//! use egg_inspect_encoder::{EncoderConfig, FfmpegSink};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let spec = SinkSpec::new(640, 480, FrameRate::from_fps(30));
//! let mut sink = FfmpegSink::create(Path::new("out.mp4"), spec, &EncoderConfig::default())?;
//! sink.write_frame(&Frame::filled(0, 640, 480, [255, 255, 255]))?;
//! sink.finalize()?;
//! # Ok(())
//! # }
//! ```

use egg_inspect_common::{Frame, FrameRate, FrameSink, MediaError, SinkSpec};
use egg_inspect_decoder::init_ffmpeg;
use ffmpeg_next as ffmpeg;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Supported output video codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.264/AVC via libx264 - plays everywhere, including browsers
    H264,
    /// MPEG-4 Part 2 - built into every libavcodec
    Mpeg4,
}

impl VideoCodec {
    fn find(self) -> Option<ffmpeg::codec::Codec> {
        match self {
            VideoCodec::H264 => ffmpeg::encoder::find_by_name("libx264")
                .or_else(|| ffmpeg::encoder::find(ffmpeg::codec::Id::H264)),
            VideoCodec::Mpeg4 => ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4),
        }
    }
}

/// Encoder settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Preferred codec
    pub codec: VideoCodec,
    /// Codec to use when the preferred one is not compiled into `FFmpeg`
    pub fallback: Option<VideoCodec>,
    /// Constant rate factor for H.264 (lower = better quality)
    pub crf: u8,
    /// x264 speed preset
    pub preset: String,
    /// Target bit rate in bits/s (None = encoder default / CRF)
    pub bit_rate: Option<usize>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            fallback: Some(VideoCodec::Mpeg4),
            crf: 23,
            preset: "medium".to_string(),
            bit_rate: None,
        }
    }
}

impl EncoderConfig {
    /// Fast encode, larger files
    #[must_use]
    pub fn fast() -> Self {
        Self {
            crf: 28,
            preset: "veryfast".to_string(),
            ..Self::default()
        }
    }

    fn select_encoder(&self) -> Option<(VideoCodec, ffmpeg::codec::Codec)> {
        std::iter::once(self.codec)
            .chain(self.fallback)
            .find_map(|kind| kind.find().map(|codec| (kind, codec)))
    }
}

/// Sequential writer of annotated frames into one video file
pub struct FfmpegSink {
    path: PathBuf,
    spec: SinkSpec,
    frames_written: u64,
    state: Option<EncodeState>,
}

impl FfmpegSink {
    /// Create the output container and open the encoder
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::Create`] if the destination is not writable, no
    /// encoder is available, or the encoder rejects the stream shape (odd
    /// dimensions with YUV420P, for instance).
    pub fn create(path: &Path, spec: SinkSpec, config: &EncoderConfig) -> Result<Self, MediaError> {
        init_ffmpeg().map_err(|e| create_error(path, &e))?;

        if spec.width == 0 || spec.height == 0 || !spec.frame_rate.is_valid() {
            return Err(MediaError::Create {
                path: path.to_path_buf(),
                reason: format!(
                    "invalid stream shape {}x{} @ {} fps",
                    spec.width, spec.height, spec.frame_rate
                ),
            });
        }

        let (kind, codec) = config.select_encoder().ok_or_else(|| MediaError::Create {
            path: path.to_path_buf(),
            reason: format!("no encoder available for {:?}", config.codec),
        })?;

        let sink = Self::open_container(path, spec, config, kind, codec);
        if sink.is_err() {
            // Do not leave a header-less file behind
            remove_unfinished(path);
        }
        sink
    }

    fn open_container(
        path: &Path,
        spec: SinkSpec,
        config: &EncoderConfig,
        kind: VideoCodec,
        codec: ffmpeg::codec::Codec,
    ) -> Result<Self, MediaError> {
        let mut output = ffmpeg::format::output(&path).map_err(|e| create_error(path, &e))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::flag::Flags::GLOBAL_HEADER);

        let rate = match kind {
            VideoCodec::Mpeg4 => limit_frame_rate(spec.frame_rate, MPEG4_MAX_TIME_BASE),
            VideoCodec::H264 => spec.frame_rate,
        };
        if rate != spec.frame_rate {
            debug!("Frame rate {} approximated as {} for {:?}", spec.frame_rate, rate, kind);
        }
        let frame_rate = ffmpeg::Rational::new(
            i32::try_from(rate.num).unwrap_or(i32::MAX),
            i32::try_from(rate.den).unwrap_or(1),
        );
        let encoder_time_base = frame_rate.invert();

        let mut stream = output.add_stream(codec).map_err(|e| create_error(path, &e))?;
        let stream_index = stream.index();

        let mut context = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| create_error(path, &e))?;
        context.set_width(spec.width);
        context.set_height(spec.height);
        context.set_format(ffmpeg::format::Pixel::YUV420P);
        context.set_time_base(encoder_time_base);
        context.set_frame_rate(Some(frame_rate));
        if let Some(bit_rate) = config.bit_rate {
            context.set_bit_rate(bit_rate);
        }
        if global_header {
            context.set_flags(ffmpeg::codec::flag::Flags::GLOBAL_HEADER);
        }

        let mut options = ffmpeg::Dictionary::new();
        if kind == VideoCodec::H264 {
            options.set("crf", &config.crf.to_string());
            options.set("preset", &config.preset);
        }

        let encoder = context
            .open_with(options)
            .map_err(|e| create_error(path, &e))?;
        stream.set_parameters(&encoder);
        stream.set_time_base(encoder_time_base);

        output
            .write_header()
            .map_err(|e| create_error(path, &e))?;

        // The muxer may pick its own stream time base while writing the header
        let stream_time_base = output
            .stream(stream_index)
            .map_or(encoder_time_base, |s| s.time_base());

        let scaler = ffmpeg::software::scaling::Context::get(
            ffmpeg::format::Pixel::RGB24,
            spec.width,
            spec.height,
            ffmpeg::format::Pixel::YUV420P,
            spec.width,
            spec.height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| create_error(path, &e))?;

        info!(
            "Created {} ({:?}, {}x{} @ {} fps)",
            path.display(),
            kind,
            spec.width,
            spec.height,
            spec.frame_rate
        );

        Ok(Self {
            path: path.to_path_buf(),
            spec,
            frames_written: 0,
            state: Some(EncodeState {
                output,
                encoder,
                stream_index,
                encoder_time_base,
                stream_time_base,
                scaler,
                rgb: ffmpeg::util::frame::video::Video::new(
                    ffmpeg::format::Pixel::RGB24,
                    spec.width,
                    spec.height,
                ),
            }),
        })
    }

    /// Path the container is written to
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for FfmpegSink {
    fn spec(&self) -> &SinkSpec {
        &self.spec
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), MediaError> {
        let state = self.state.as_mut().ok_or(MediaError::Closed)?;
        self.spec.check(frame)?;

        let pts = i64::try_from(self.frames_written).unwrap_or(i64::MAX);
        state
            .encode(frame, pts)
            .map_err(|e| MediaError::Encode {
                frame_index: frame.index(),
                reason: e.to_string(),
            })?;

        self.frames_written += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn finalize(&mut self) -> Result<(), MediaError> {
        let mut state = self.state.take().ok_or(MediaError::Closed)?;
        state.finish().map_err(|e| MediaError::Finalize(e.to_string()))?;
        info!(
            "Finalized {} ({} frames)",
            self.path.display(),
            self.frames_written
        );
        Ok(())
    }

    fn discard(&mut self) -> Result<(), MediaError> {
        // Dropping the muxer closes the file before it is removed
        drop(self.state.take());
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Discarded {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

struct EncodeState {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::video::Encoder,
    stream_index: usize,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
    scaler: ffmpeg::software::scaling::Context,
    rgb: ffmpeg::util::frame::video::Video,
}

impl EncodeState {
    fn encode(&mut self, frame: &Frame, pts: i64) -> Result<(), ffmpeg::Error> {
        let row_bytes = frame.width() as usize * 3;
        let stride = self.rgb.stride(0);
        let plane = self.rgb.data_mut(0);
        for (y, row) in frame.as_raw().chunks_exact(row_bytes).enumerate() {
            plane[y * stride..y * stride + row_bytes].copy_from_slice(row);
        }

        // A fresh picture per frame: the encoder may keep a reference to it
        let mut yuv = ffmpeg::util::frame::video::Video::empty();
        self.scaler.run(&self.rgb, &mut yuv)?;
        yuv.set_pts(Some(pts));

        self.encoder.send_frame(&yuv)?;
        self.write_packets()
    }

    fn finish(&mut self) -> Result<(), ffmpeg::Error> {
        self.encoder.send_eof()?;
        self.write_packets()?;
        self.output.write_trailer()
    }

    fn write_packets(&mut self) -> Result<(), ffmpeg::Error> {
        let mut packet = ffmpeg::Packet::empty();
        loop {
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    packet.set_stream(self.stream_index);
                    packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
                    packet.write_interleaved(&mut self.output)?;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
                    return Ok(())
                }
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

/// MPEG-4 Part 2 stores the time base in 16 bits
const MPEG4_MAX_TIME_BASE: u32 = 65_535;

/// Closest rate whose numerator and denominator both fit in `max`
///
/// Walks the continued-fraction convergents of `num / den` and keeps the
/// last one inside the bound.
fn limit_frame_rate(rate: FrameRate, max: u32) -> FrameRate {
    let g = gcd(rate.num, rate.den);
    let (num, den) = (rate.num / g.max(1), rate.den / g.max(1));
    if num <= max && den <= max {
        return FrameRate::new(num, den);
    }

    let max = u64::from(max);
    let (mut p0, mut q0, mut p1, mut q1) = (0u64, 1u64, 1u64, 0u64);
    let (mut n, mut d) = (u64::from(num), u64::from(den));
    while d != 0 {
        let a = n / d;
        let (p2, q2) = (a * p1 + p0, a * q1 + q0);
        if p2 > max || q2 > max {
            break;
        }
        (p0, q0, p1, q1) = (p1, q1, p2, q2);
        (n, d) = (d, n - a * d);
    }

    if q1 == 0 {
        // Faster than `max` fps
        return FrameRate::new(max as u32, 1);
    }
    FrameRate::new(p1 as u32, q1 as u32)
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn remove_unfinished(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed unfinished {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

fn create_error(path: &Path, err: &ffmpeg::Error) -> MediaError {
    MediaError::Create {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}
