use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use relief_core::{ExportFormat, FrameBuffer, ReliefError, ReliefResult};

use crate::artifact::{Artifact, ArtifactMetadata, Codec};
use crate::encoder::{EncodeSettings, FrameEncoder};

/// Motion-JPEG: one baseline JPEG per frame, concatenated, with a per-frame
/// size table and timestamps `i / fps` in the artifact metadata.
pub struct MotionJpegEncoder {
    settings: EncodeSettings,
    payload: Vec<u8>,
    frame_sizes: Vec<u64>,
}

impl MotionJpegEncoder {
    pub fn new(settings: EncodeSettings) -> ReliefResult<Self> {
        if !(1..=100).contains(&settings.jpeg_quality) {
            return Err(ReliefError::encoding(format!(
                "JPEG quality {} outside 1..=100",
                settings.jpeg_quality
            )));
        }
        Ok(Self {
            settings,
            payload: Vec::new(),
            frame_sizes: Vec::new(),
        })
    }
}

impl FrameEncoder for MotionJpegEncoder {
    fn push_frame(&mut self, frame: &FrameBuffer) -> ReliefResult<()> {
        let index = self.frame_sizes.len() as u64;
        self.settings.check_frame(index, frame)?;
        let rgb = frame.to_rgb8();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.settings.jpeg_quality)
            .encode(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
            .map_err(|e| ReliefError::encoding(format!("failed to encode frame {}: {}", index, e)))?;
        self.frame_sizes.push(jpeg.len() as u64);
        self.payload.extend_from_slice(&jpeg);
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frame_sizes.len() as u64
    }

    fn finish(self: Box<Self>) -> ReliefResult<Artifact> {
        if self.frame_sizes.is_empty() {
            return Err(ReliefError::encoding("no frames to encode"));
        }
        let mut metadata = ArtifactMetadata::new(
            ExportFormat::Video,
            Codec::Mjpeg,
            self.settings.width,
            self.settings.height,
            self.settings.fps,
            self.frame_sizes.len() as u64,
        );
        metadata.frame_sizes = self.frame_sizes;
        tracing::info!(
            frames = metadata.frame_count,
            bytes = self.payload.len(),
            fps = metadata.fps,
            "encoded Motion-JPEG"
        );
        Ok(Artifact {
            metadata,
            payload: self.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relief_core::{Color, EncodeConfig};

    #[test]
    fn test_frames_are_individually_decodable() {
        let settings =
            EncodeSettings::from_config(&EncodeConfig::default(), ExportFormat::Video, 16, 8, 25.0);
        let mut enc = Box::new(MotionJpegEncoder::new(settings).unwrap());
        for c in [Color::RED, Color::GREEN, Color::BLUE] {
            enc.push_frame(&FrameBuffer::solid(16, 8, &c)).unwrap();
        }
        let artifact = enc.finish().unwrap();
        let frames = artifact.mjpeg_frames().unwrap();
        assert_eq!(frames.len(), 3);
        let decoded = FrameBuffer::decode(frames[1]).unwrap();
        assert_eq!((decoded.width, decoded.height), (16, 8));
        let px = decoded.get_pixel(8, 4).unwrap();
        assert!(px[1] > 200 && px[0] < 60);
        assert!((artifact.metadata.timestamps[2] - 0.08).abs() < 1e-12);
        assert!((artifact.duration_seconds() - 0.12).abs() < 1e-12);
    }

    #[test]
    fn test_empty_video_fails() {
        let settings =
            EncodeSettings::from_config(&EncodeConfig::default(), ExportFormat::Video, 16, 8, 25.0);
        let enc = Box::new(MotionJpegEncoder::new(settings).unwrap());
        assert_eq!(
            enc.finish().unwrap_err().kind(),
            relief_core::ErrorKind::Encoding
        );
    }
}
