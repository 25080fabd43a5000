use relief_core::{FrameBuffer, PixelFormat, ReliefError, ReliefResult};
use relief_scene::BoundingBox;

/// Per-pixel scalar depth, row-major, top row first.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    pub width: u32,
    pub height: u32,
    pub values: Vec<f32>,
}

impl DepthMap {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> ReliefResult<Self> {
        let expected = width as usize * height as usize;
        if values.len() != expected {
            return Err(ReliefError::validation(format!(
                "depth map {}x{} needs {} values, got {}",
                width,
                height,
                expected,
                values.len()
            )));
        }
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn uniform(width: u32, height: u32, depth: f32) -> Self {
        Self {
            width,
            height,
            values: vec![depth; width as usize * height as usize],
        }
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> f32) -> Self {
        let mut values = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                values.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            values,
        }
    }

    /// Relative depth from the luminance of a grayscale image, in [0, 1].
    pub fn from_image(image: &FrameBuffer) -> Self {
        let bpp = image.format.bytes_per_pixel();
        let values = image
            .data
            .chunks_exact(bpp)
            .map(|px| luma(px) as f32 / 255.0)
            .collect();
        Self {
            width: image.width,
            height: image.height,
            values,
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Min and max over finite values.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.values
            .iter()
            .filter(|d| d.is_finite())
            .fold(None, |acc, &d| match acc {
                None => Some((d, d)),
                Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
            })
    }

    /// Grayscale visualization: nearest is brightest, non-finite is black.
    pub fn to_preview(&self) -> FrameBuffer {
        let mut frame = FrameBuffer::new(self.width, self.height, PixelFormat::Rgba8);
        let (lo, hi) = self.min_max().unwrap_or((0.0, 0.0));
        let span = hi - lo;
        for y in 0..self.height {
            for x in 0..self.width {
                let d = self.values[y as usize * self.width as usize + x as usize];
                let level = if !d.is_finite() {
                    0
                } else if span > 0.0 {
                    (255.0 * (1.0 - (d - lo) / span)).round() as u8
                } else {
                    255
                };
                frame.set_pixel(x, y, [level, level, level, 255]);
            }
        }
        frame
    }
}

/// Soft segmentation mask: per-pixel alpha in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub alpha: Vec<f32>,
}

impl Mask {
    pub fn new(width: u32, height: u32, alpha: Vec<f32>) -> ReliefResult<Self> {
        let expected = width as usize * height as usize;
        if alpha.len() != expected {
            return Err(ReliefError::validation(format!(
                "mask {}x{} needs {} values, got {}",
                width,
                height,
                expected,
                alpha.len()
            )));
        }
        if alpha.iter().any(|a| !(0.0..=1.0).contains(a)) {
            return Err(ReliefError::validation("mask alpha must be within [0, 1]"));
        }
        Ok(Self {
            width,
            height,
            alpha,
        })
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            alpha: vec![1.0; width as usize * height as usize],
        }
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> f32) -> Self {
        let mut alpha = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                alpha.push(f(x, y).clamp(0.0, 1.0));
            }
        }
        Self {
            width,
            height,
            alpha,
        }
    }

    /// Mask from an image: the alpha channel if the image has any
    /// transparency, luminance otherwise.
    pub fn from_image(image: &FrameBuffer) -> Self {
        let bpp = image.format.bytes_per_pixel();
        let has_alpha = image.format == PixelFormat::Rgba8
            && image.data.chunks_exact(4).any(|px| px[3] < 255);
        let alpha = image
            .data
            .chunks_exact(bpp)
            .map(|px| {
                if has_alpha {
                    px[3] as f32 / 255.0
                } else {
                    luma(px) as f32 / 255.0
                }
            })
            .collect();
        Self {
            width: image.width,
            height: image.height,
            alpha,
        }
    }

    /// Opaque grayscale image of the mask, suitable for PNG storage.
    pub fn to_image(&self) -> FrameBuffer {
        let mut frame = FrameBuffer::new(self.width, self.height, PixelFormat::Rgba8);
        for (i, a) in self.alpha.iter().enumerate() {
            let level = (a.clamp(0.0, 1.0) * 255.0).round() as u8;
            let x = (i % self.width as usize) as u32;
            let y = (i / self.width as usize) as u32;
            frame.set_pixel(x, y, [level, level, level, 255]);
        }
        frame
    }

    pub fn is_masked(&self, x: u32, y: u32, threshold: f32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.alpha[y as usize * self.width as usize + x as usize] >= threshold
    }

    pub fn count(&self, threshold: f32) -> usize {
        self.alpha.iter().filter(|a| **a >= threshold).count()
    }

    /// Tight bounding box of masked pixels; `None` when nothing is masked.
    pub fn bounding_box(&self, threshold: f32) -> Option<BoundingBox> {
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0;
        let mut max_y = 0;
        let mut any = false;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.is_masked(x, y, threshold) {
                    any = true;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }
        any.then(|| BoundingBox::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
    }
}

/// Pinhole camera intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    /// `fx = fy = focal_factor * width`, principal point at the image center.
    pub fn default_for(width: u32, height: u32, focal_factor: f64) -> Self {
        let f = focal_factor * width as f64;
        Self {
            fx: f,
            fy: f,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
        }
    }

    pub fn validate(&self) -> ReliefResult<()> {
        if !(self.fx.is_finite() && self.fx > 0.0 && self.fy.is_finite() && self.fy > 0.0) {
            return Err(ReliefError::validation(format!(
                "focal lengths must be finite and positive (fx={}, fy={})",
                self.fx, self.fy
            )));
        }
        if !(self.cx.is_finite() && self.cy.is_finite()) {
            return Err(ReliefError::validation("principal point must be finite"));
        }
        Ok(())
    }
}

fn luma(px: &[u8]) -> u8 {
    if px.len() < 3 {
        return px.first().copied().unwrap_or(0);
    }
    let y = 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64;
    y.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_map_length_checked() {
        assert!(DepthMap::new(2, 2, vec![1.0; 3]).is_err());
        assert!(DepthMap::new(2, 2, vec![1.0; 4]).is_ok());
    }

    #[test]
    fn test_depth_preview_brightest_is_nearest() {
        let depth = DepthMap::new(2, 1, vec![1.0, 3.0]).unwrap();
        let preview = depth.to_preview();
        assert_eq!(preview.get_pixel(0, 0), Some([255, 255, 255, 255]));
        assert_eq!(preview.get_pixel(1, 0), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_mask_bounding_box() {
        let mask = Mask::from_fn(8, 8, |x, y| if (2..5).contains(&x) && y == 6 { 1.0 } else { 0.0 });
        assert_eq!(mask.count(0.5), 3);
        assert_eq!(mask.bounding_box(0.5), Some(BoundingBox::new(2, 6, 3, 1)));
        assert_eq!(Mask::from_fn(4, 4, |_, _| 0.2).bounding_box(0.5), None);
    }

    #[test]
    fn test_mask_image_round_trip_levels() {
        let mask = Mask::from_fn(3, 1, |x, _| x as f32 * 0.5);
        let back = Mask::from_image(&mask.to_image());
        for (a, b) in mask.alpha.iter().zip(&back.alpha) {
            assert!((a - b).abs() < 1.0 / 255.0 + 1e-6);
        }
    }

    #[test]
    fn test_mask_from_transparent_image_uses_alpha() {
        let data = vec![10, 10, 10, 0, 10, 10, 10, 255];
        let image = FrameBuffer::from_rgba(2, 1, data).unwrap();
        let mask = Mask::from_image(&image);
        assert_eq!(mask.alpha, vec![0.0, 1.0]);
    }

    #[test]
    fn test_default_intrinsics() {
        let k = Intrinsics::default_for(100, 50, 0.7);
        assert!((k.fx - 70.0).abs() < 1e-12);
        assert_eq!(k.cx, 50.0);
        assert_eq!(k.cy, 25.0);
        let bad = Intrinsics { fx: 0.0, ..k };
        assert!(bad.validate().is_err());
    }
}
