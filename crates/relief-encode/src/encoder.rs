use relief_core::{EncodeConfig, ExportFormat, FrameBuffer, ReliefError, ReliefResult, VideoBackend};
use tracing::info;

use crate::artifact::Artifact;
use crate::ffmpeg::FfmpegEncoder;
use crate::gif::{gif_delay_centiseconds, GifLoopEncoder};
use crate::mjpeg::MotionJpegEncoder;

/// Parameters for one encode.
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    pub format: ExportFormat,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub palette_levels: u8,
    pub gif_speed: i32,
    pub jpeg_quality: u8,
    pub video_backend: VideoBackend,
    pub max_dimension: u32,
    pub max_fps: f64,
}

impl EncodeSettings {
    pub fn from_config(
        config: &EncodeConfig,
        format: ExportFormat,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Self {
        Self {
            format,
            width,
            height,
            fps,
            palette_levels: config.palette_levels,
            gif_speed: config.gif_speed,
            jpeg_quality: config.jpeg_quality,
            video_backend: config.video_backend,
            max_dimension: config.max_dimension,
            max_fps: config.max_fps,
        }
    }

    pub fn validate(&self) -> ReliefResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ReliefError::encoding(format!(
                "resolution {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.width > self.max_dimension || self.height > self.max_dimension {
            return Err(ReliefError::encoding(format!(
                "resolution {}x{} exceeds the {} pixel limit",
                self.width, self.height, self.max_dimension
            )));
        }
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(ReliefError::encoding(format!("frame rate {} must be positive", self.fps)));
        }
        if self.fps > self.max_fps {
            return Err(ReliefError::encoding(format!(
                "frame rate {} exceeds the {} fps limit",
                self.fps, self.max_fps
            )));
        }
        if self.format == ExportFormat::LoopImage && gif_delay_centiseconds(self.fps).is_none() {
            return Err(ReliefError::encoding(format!(
                "frame rate {} has no exact looping-image frame delay; use 100/k fps for a whole k >= 2",
                self.fps
            )));
        }
        if !(2..=6).contains(&self.palette_levels) {
            return Err(ReliefError::encoding(format!(
                "palette levels {} outside 2..=6",
                self.palette_levels
            )));
        }
        Ok(())
    }

    /// Fails unless `frame` matches the configured resolution.
    pub fn check_frame(&self, index: u64, frame: &FrameBuffer) -> ReliefResult<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(ReliefError::encoding(format!(
                "frame {} has dimensions {}x{}, expected {}x{}",
                index, frame.width, frame.height, self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Append-only streaming encoder. Frames are pushed one at a time in
/// presentation order; `finish` seals the artifact.
pub trait FrameEncoder: Send {
    fn push_frame(&mut self, frame: &FrameBuffer) -> ReliefResult<()>;

    fn frames_written(&self) -> u64;

    fn finish(self: Box<Self>) -> ReliefResult<Artifact>;
}

/// Encoder for `settings.format` (and `video_backend` for video).
pub fn create_encoder(settings: &EncodeSettings) -> ReliefResult<Box<dyn FrameEncoder>> {
    settings.validate()?;
    let encoder: Box<dyn FrameEncoder> = match (settings.format, settings.video_backend) {
        (ExportFormat::LoopImage, _) => Box::new(GifLoopEncoder::new(settings.clone())?),
        (ExportFormat::Video, VideoBackend::MotionJpeg) => {
            Box::new(MotionJpegEncoder::new(settings.clone())?)
        }
        (ExportFormat::Video, VideoBackend::Ffmpeg) => Box::new(FfmpegEncoder::new(settings.clone())?),
    };
    Ok(encoder)
}

/// Drain a frame stream into a new encoder. The first stream error aborts
/// the encode and is returned as is.
pub fn encode_stream<I>(settings: &EncodeSettings, frames: I) -> ReliefResult<Artifact>
where
    I: IntoIterator<Item = ReliefResult<FrameBuffer>>,
{
    let mut encoder = create_encoder(settings)?;
    for frame in frames {
        encoder.push_frame(&frame?)?;
    }
    let artifact = encoder.finish()?;
    info!(
        format = %settings.format,
        codec = ?artifact.metadata.codec,
        frames = artifact.metadata.frame_count,
        bytes = artifact.payload.len(),
        duration = artifact.metadata.duration_seconds,
        "encoded artifact"
    );
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relief_core::ErrorKind;

    fn settings(format: ExportFormat) -> EncodeSettings {
        EncodeSettings::from_config(&EncodeConfig::default(), format, 8, 8, 12.0)
    }

    #[test]
    fn test_rejects_bad_settings() {
        let mut s = settings(ExportFormat::LoopImage);
        s.width = 0;
        assert_eq!(s.validate().unwrap_err().kind(), ErrorKind::Encoding);
        let mut s = settings(ExportFormat::LoopImage);
        s.height = 10_000;
        assert!(s.validate().is_err());
        let mut s = settings(ExportFormat::Video);
        s.fps = 0.0;
        assert!(s.validate().is_err());
        s.fps = 240.0;
        assert!(s.validate().is_err());
        let s = settings(ExportFormat::LoopImage);
        assert_eq!(s.validate().unwrap_err().kind(), ErrorKind::Encoding);
        assert!(settings(ExportFormat::Video).validate().is_ok());
        let mut s = settings(ExportFormat::LoopImage);
        s.fps = 10.0;
        assert!(s.validate().is_ok());
        s.palette_levels = 7;
        assert!(create_encoder(&s).is_err());
    }

    #[test]
    fn test_stream_error_propagates() {
        let frames = vec![
            Ok(FrameBuffer::solid(8, 8, &relief_core::Color::WHITE)),
            Err(ReliefError::cancelled("render")),
        ];
        let err = encode_stream(&settings(ExportFormat::Video), frames).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
