use glam::DVec3;
use relief_core::{Color, EncodeConfig, RenderConfig, ReliefError, ReliefResult};

/// Output and shading parameters for one render.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    /// Trajectory sample `i` is rendered at animation time `i / fps`.
    pub fps: f64,
    pub background: Color,
    /// Direction light travels, from the light into the scene.
    pub light_direction: DVec3,
    pub ambient: f64,
    pub near: f64,
    pub far: f64,
    /// Frames rendered in parallel per batch; 0 uses the pool size.
    pub batch_size: usize,
}

impl RenderSettings {
    pub fn from_config(render: &RenderConfig, encode: &EncodeConfig) -> Self {
        Self {
            width: render.width,
            height: render.height,
            fps: encode.fps,
            background: render.background,
            light_direction: DVec3::from_array(render.light_direction),
            ambient: render.ambient,
            near: render.near,
            far: render.far,
            batch_size: render.batch_size,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }

    pub fn validate(&self) -> ReliefResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ReliefError::render(format!(
                "resolution {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(ReliefError::render(format!("fps {} must be positive", self.fps)));
        }
        if !(self.near > 0.0 && self.near < self.far && self.far.is_finite()) {
            return Err(ReliefError::render("clip planes must satisfy 0 < near < far"));
        }
        if self.light_direction.length_squared() == 0.0 || !self.light_direction.is_finite() {
            return Err(ReliefError::render("light direction must be a non-zero vector"));
        }
        Ok(())
    }

    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::from_config(&RenderConfig::default(), &EncodeConfig::default())
    }
}
