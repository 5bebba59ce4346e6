use egg_inspect_common::{FrameSink, FrameSource, MediaBackend, MediaError, SinkSpec};
use egg_inspect_decoder::FfmpegSource;
use egg_inspect_encoder::{EncoderConfig, FfmpegSink};
use std::path::Path;

/// Media backend over the `FFmpeg` decoder and encoder
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend {
    encoder: EncoderConfig,
}

impl FfmpegBackend {
    #[must_use]
    pub fn new(encoder: EncoderConfig) -> Self {
        Self { encoder }
    }

    #[must_use]
    pub fn encoder(&self) -> &EncoderConfig {
        &self.encoder
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, MediaError> {
        Ok(Box::new(FfmpegSource::open(path)?))
    }

    fn create_sink(&self, path: &Path, spec: SinkSpec) -> Result<Box<dyn FrameSink>, MediaError> {
        Ok(Box::new(FfmpegSink::create(path, spec, &self.encoder)?))
    }
}
