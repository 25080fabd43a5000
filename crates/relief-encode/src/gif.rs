use std::io::Write;
use std::sync::Arc;

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, RgbaImage};
use parking_lot::Mutex;
use relief_core::{ExportFormat, FrameBuffer, ReliefError, ReliefResult};

use crate::artifact::{Artifact, ArtifactMetadata, Codec};
use crate::encoder::{EncodeSettings, FrameEncoder};

/// In-memory sink the GIF encoder writes through.
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Snap every channel to one of `levels` evenly spaced values, so all
/// frames share one fixed palette of at most `levels^3` colors.
pub fn posterize(frame: &FrameBuffer, levels: u8) -> Vec<u8> {
    let rgba = frame.clone().into_rgba8();
    let steps = (levels.max(2) - 1) as f64;
    let lut: Vec<u8> = (0..=255u8)
        .map(|c| {
            let q = (c as f64 * steps / 255.0).round();
            (q * 255.0 / steps).round() as u8
        })
        .collect();
    rgba.data
        .chunks_exact(4)
        .flat_map(|px| [lut[px[0] as usize], lut[px[1] as usize], lut[px[2] as usize], 255])
        .collect()
}

/// Per-frame GIF delay for `fps`, if the rate is exactly representable.
/// GIF delays are whole centiseconds and viewers clamp anything below 2.
pub fn gif_delay_centiseconds(fps: f64) -> Option<u32> {
    if !(fps.is_finite() && fps > 0.0) {
        return None;
    }
    let exact = 100.0 / fps;
    let rounded = exact.round();
    (rounded >= 2.0 && (exact - rounded).abs() < 1e-6).then_some(rounded as u32)
}

/// Animated GIF, looping forever, fixed per-frame delay from the frame rate.
pub struct GifLoopEncoder {
    settings: EncodeSettings,
    buffer: SharedBuffer,
    encoder: GifEncoder<SharedBuffer>,
    delay_cs: u32,
    frames: u64,
}

impl GifLoopEncoder {
    pub fn new(settings: EncodeSettings) -> ReliefResult<Self> {
        let buffer = SharedBuffer::default();
        let mut encoder = GifEncoder::new_with_speed(buffer.clone(), settings.gif_speed);
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| ReliefError::encoding(format!("failed to set GIF repeat: {}", e)))?;
        let delay_cs = gif_delay_centiseconds(settings.fps).ok_or_else(|| {
            ReliefError::encoding(format!(
                "a looping image cannot play at {} fps; use 100/k fps for a whole k >= 2",
                settings.fps
            ))
        })?;
        Ok(Self {
            settings,
            buffer,
            encoder,
            delay_cs,
            frames: 0,
        })
    }

    pub fn delay_centiseconds(&self) -> u32 {
        self.delay_cs
    }
}

impl FrameEncoder for GifLoopEncoder {
    fn push_frame(&mut self, frame: &FrameBuffer) -> ReliefResult<()> {
        self.settings.check_frame(self.frames, frame)?;
        let pixels = posterize(frame, self.settings.palette_levels);
        let image = RgbaImage::from_raw(frame.width, frame.height, pixels).ok_or_else(|| {
            ReliefError::encoding(format!("invalid frame data at frame {}", self.frames))
        })?;
        let gif_frame = image::Frame::from_parts(
            image,
            0,
            0,
            Delay::from_numer_denom_ms(self.delay_cs * 10, 1),
        );
        self.encoder.encode_frame(gif_frame).map_err(|e| {
            ReliefError::encoding(format!("failed to encode GIF frame {}: {}", self.frames, e))
        })?;
        self.frames += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }

    fn finish(self: Box<Self>) -> ReliefResult<Artifact> {
        if self.frames == 0 {
            return Err(ReliefError::encoding("no frames to encode for GIF"));
        }
        let this = *self;
        // dropping the encoder writes the GIF trailer
        drop(this.encoder);
        let payload = std::mem::take(&mut *this.buffer.0.lock());
        tracing::info!(
            frames = this.frames,
            width = this.settings.width,
            height = this.settings.height,
            fps = this.settings.fps,
            delay_cs = this.delay_cs,
            "encoded GIF"
        );
        Ok(Artifact {
            metadata: ArtifactMetadata::new(
                ExportFormat::LoopImage,
                Codec::Gif,
                this.settings.width,
                this.settings.height,
                this.settings.fps,
                this.frames,
            ),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relief_core::{Color, EncodeConfig};

    fn settings() -> EncodeSettings {
        EncodeSettings::from_config(&EncodeConfig::default(), ExportFormat::LoopImage, 4, 4, 10.0)
    }

    #[test]
    fn test_posterize_levels() {
        let mut frame = FrameBuffer::new(3, 1, relief_core::PixelFormat::Rgba8);
        frame.set_pixel(0, 0, [0, 30, 255, 255]);
        frame.set_pixel(1, 0, [128, 200, 26, 255]);
        let out = posterize(&frame, 6);
        for c in out.iter().enumerate().filter(|(i, _)| i % 4 != 3).map(|(_, c)| *c) {
            assert_eq!(c % 51, 0, "{} is not a palette level", c);
        }
        assert_eq!(&out[..3], &[0, 51, 255]);
    }

    #[test]
    fn test_gif_loop_encodes_frames() {
        let mut enc = Box::new(GifLoopEncoder::new(settings()).unwrap());
        assert_eq!(enc.delay_centiseconds(), 10);
        for i in 0..5u8 {
            let mut fb = FrameBuffer::new(4, 4, relief_core::PixelFormat::Rgba8);
            for y in 0..4 {
                for x in 0..4 {
                    fb.set_pixel(x, y, [255, i * 50, 0, 255]);
                }
            }
            enc.push_frame(&fb).unwrap();
        }
        let artifact = enc.finish().unwrap();
        assert!(artifact.payload.starts_with(b"GIF89a"));
        assert_eq!(artifact.payload.last(), Some(&0x3B));
        assert_eq!(artifact.metadata.frame_count, 5);
        assert!((artifact.metadata.duration_seconds - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_gif_delay_only_for_exact_rates() {
        assert_eq!(gif_delay_centiseconds(10.0), Some(10));
        assert_eq!(gif_delay_centiseconds(25.0), Some(4));
        assert_eq!(gif_delay_centiseconds(50.0), Some(2));
        assert_eq!(gif_delay_centiseconds(100.0 / 3.0), Some(3));
        assert_eq!(gif_delay_centiseconds(12.0), None);
        assert_eq!(gif_delay_centiseconds(60.0), None);
        assert_eq!(gif_delay_centiseconds(100.0), None);
        assert_eq!(gif_delay_centiseconds(0.0), None);
    }

    #[test]
    fn test_gif_rejects_inexact_frame_rate() {
        let mut s = settings();
        s.fps = 12.0;
        let err = GifLoopEncoder::new(s).err().unwrap();
        assert_eq!(err.kind(), relief_core::ErrorKind::Encoding);
    }

    #[test]
    fn test_gif_empty_sequence_fails() {
        let enc = Box::new(GifLoopEncoder::new(settings()).unwrap());
        assert!(enc.finish().is_err());
    }

    #[test]
    fn test_gif_rejects_wrong_size_frame() {
        let mut enc = GifLoopEncoder::new(settings()).unwrap();
        let err = enc
            .push_frame(&FrameBuffer::solid(5, 4, &Color::WHITE))
            .unwrap_err();
        assert!(err.to_string().contains("expected 4x4"));
    }
}
