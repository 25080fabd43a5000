use glam::{DVec2, DVec4};
use relief_core::{Color, FrameBuffer, PixelFormat};

/// A vertex after projection: screen position, NDC depth, clip `w` and UV.
#[derive(Debug, Clone, Copy)]
pub struct ScreenVertex {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
    pub uv: DVec2,
}

impl ScreenVertex {
    /// Project a clip-space position onto a `width` x `height` viewport
    /// (y down). Callers must reject `w <= near` first.
    pub fn from_clip(clip: DVec4, uv: DVec2, width: u32, height: u32) -> Self {
        let inv_w = 1.0 / clip.w;
        let ndc_x = clip.x * inv_w;
        let ndc_y = clip.y * inv_w;
        Self {
            x: (ndc_x + 1.0) * 0.5 * width as f64,
            y: (1.0 - ndc_y) * 0.5 * height as f64,
            z: clip.z * inv_w,
            w: clip.w,
            uv,
        }
    }
}

/// Color and depth buffers for one frame.
pub struct RenderTarget {
    pub color: FrameBuffer,
    depth: Vec<f64>,
}

impl RenderTarget {
    pub fn new(width: u32, height: u32, background: &Color) -> Self {
        let mut color = FrameBuffer::solid(width, height, background);
        color.format = PixelFormat::Rgba8;
        Self {
            color,
            depth: vec![f64::INFINITY; width as usize * height as usize],
        }
    }

    pub fn into_frame(self) -> FrameBuffer {
        self.color
    }

    /// Fill a triangle with nearest-texel samples scaled by `shade`.
    ///
    /// Either winding is accepted. Depth test is strict, so on equal depth
    /// the first triangle drawn keeps the pixel. Fragments outside the NDC
    /// depth range `[0, 1]` are discarded.
    pub fn draw_triangle(&mut self, v: [ScreenVertex; 3], texture: &FrameBuffer, shade: f64) {
        let (width, height) = (self.color.width, self.color.height);
        let area = edge(v[0].x, v[0].y, v[1].x, v[1].y, v[2].x, v[2].y);
        if area == 0.0 || !area.is_finite() {
            return;
        }

        let min_x = v.iter().map(|p| p.x).fold(f64::INFINITY, f64::min).floor().max(0.0);
        let max_x = v
            .iter()
            .map(|p| p.x)
            .fold(f64::NEG_INFINITY, f64::max)
            .ceil()
            .min(width as f64 - 1.0);
        let min_y = v.iter().map(|p| p.y).fold(f64::INFINITY, f64::min).floor().max(0.0);
        let max_y = v
            .iter()
            .map(|p| p.y)
            .fold(f64::NEG_INFINITY, f64::max)
            .ceil()
            .min(height as f64 - 1.0);
        if min_x > max_x || min_y > max_y {
            return;
        }

        let inv_w = [1.0 / v[0].w, 1.0 / v[1].w, 1.0 / v[2].w];
        for py in min_y as u32..=max_y as u32 {
            let sy = py as f64 + 0.5;
            for px in min_x as u32..=max_x as u32 {
                let sx = px as f64 + 0.5;
                let b0 = edge(v[1].x, v[1].y, v[2].x, v[2].y, sx, sy) / area;
                let b1 = edge(v[2].x, v[2].y, v[0].x, v[0].y, sx, sy) / area;
                let b2 = edge(v[0].x, v[0].y, v[1].x, v[1].y, sx, sy) / area;
                if b0 < 0.0 || b1 < 0.0 || b2 < 0.0 {
                    continue;
                }
                let z = b0 * v[0].z + b1 * v[1].z + b2 * v[2].z;
                if !(0.0..=1.0).contains(&z) {
                    continue;
                }
                let idx = py as usize * width as usize + px as usize;
                if z >= self.depth[idx] {
                    continue;
                }

                let p0 = b0 * inv_w[0];
                let p1 = b1 * inv_w[1];
                let p2 = b2 * inv_w[2];
                let norm = p0 + p1 + p2;
                let uv = (v[0].uv * p0 + v[1].uv * p1 + v[2].uv * p2) / norm;
                let texel = texture.sample_nearest(uv.x, uv.y);

                self.depth[idx] = z;
                self.color.set_pixel(
                    px,
                    py,
                    [
                        scale_channel(texel[0], shade),
                        scale_channel(texel[1], shade),
                        scale_channel(texel[2], shade),
                        255,
                    ],
                );
            }
        }
    }
}

fn edge(ax: f64, ay: f64, bx: f64, by: f64, px: f64, py: f64) -> f64 {
    (bx - ax) * (py - ay) - (by - ay) * (px - ax)
}

fn scale_channel(c: u8, shade: f64) -> u8 {
    (c as f64 * shade).round().clamp(0.0, 255.0) as u8
}
