use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::error::{ReliefError, ReliefResult};
use crate::types::{ExportFormat, VideoBackend};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Quads whose depth spread exceeds this (in scaled depth units) are not triangulated.
    pub discontinuity_threshold: f64,
    /// Multiplier applied to provider depth (relative vs metric units).
    pub unit_scale: f64,
    /// Soft-mask alpha at or above which a pixel counts as foreground.
    pub mask_threshold: f32,
    /// Minimum fraction of masked pixels that must end up in the mesh.
    pub min_survival_fraction: f64,
    /// Normalize depth to [0, 1] (min-max) before applying `unit_scale`.
    pub normalize_depth: bool,
    /// Pixels whose scaled depth is at or below this value are invalid.
    pub min_depth: f64,
    /// Default focal length as a factor of image width when intrinsics are unknown.
    pub focal_length_factor: f64,
    /// Optional triangle budget; enables vertex-clustering decimation.
    pub decimation_target: Option<usize>,
    /// Grid neighbours compared per pixel by the statistical outlier filter. 0 disables it.
    pub outlier_neighbors: usize,
    /// Pixels whose mean neighbour depth distance exceeds `mean + outlier_std_ratio * std` are dropped.
    pub outlier_std_ratio: f64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            discontinuity_threshold: 0.1,
            unit_scale: 1.0,
            mask_threshold: 0.5,
            min_survival_fraction: 0.01,
            normalize_depth: false,
            min_depth: 0.0,
            focal_length_factor: 0.7,
            decimation_target: None,
            outlier_neighbors: 20,
            outlier_std_ratio: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransformConfig {
    pub min_scale: f64,
    pub max_scale: f64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            min_scale: 1e-4,
            max_scale: 1e4,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub background: Color,
    /// Direction the light travels (from the light towards the scene).
    pub light_direction: [f64; 3],
    /// Minimum shading factor so unlit faces never go pure black.
    pub ambient: f64,
    pub near: f64,
    pub far: f64,
    pub fov_degrees: f64,
    /// Frames rendered in parallel per batch; 0 uses the pool size.
    pub batch_size: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 480,
            height: 480,
            background: Color::rgb(0.08, 0.08, 0.1),
            light_direction: [-0.3, -0.5, -0.8],
            ambient: 0.25,
            near: 0.01,
            far: 1000.0,
            fov_degrees: 50.0,
            batch_size: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EncodeConfig {
    pub default_format: ExportFormat,
    /// Looping images need 100/k fps for a whole k >= 2 (whole-centisecond delays).
    pub fps: f64,
    /// Levels per channel for the global GIF palette (2..=6).
    pub palette_levels: u8,
    /// GIF encoder speed, 1 (best) ..= 30 (fastest).
    pub gif_speed: i32,
    /// JPEG quality for Motion-JPEG frames, 1..=100.
    pub jpeg_quality: u8,
    pub video_backend: VideoBackend,
    pub max_dimension: u32,
    pub max_fps: f64,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            default_format: ExportFormat::LoopImage,
            fps: 10.0,
            palette_levels: 6,
            gif_speed: 10,
            jpeg_quality: 85,
            video_backend: VideoBackend::MotionJpeg,
            max_dimension: 4096,
            max_fps: 120.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker threads for stage execution; 0 sizes the pool to available cores.
    pub worker_threads: usize,
    /// Fail reconstruction if any segment fails instead of composing the survivors.
    pub require_all_segments: bool,
    /// Segments below this confidence are dropped at segmentation time.
    pub min_segment_confidence: f32,
    pub orbit_frames: u32,
    /// Orbit radius as a multiple of the scene's bounding radius.
    pub orbit_radius_factor: f64,
    /// Orbit height as a multiple of the scene's bounding radius.
    pub orbit_height_factor: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            require_all_segments: false,
            min_segment_confidence: 0.0,
            orbit_frames: 36,
            orbit_radius_factor: 2.5,
            orbit_height_factor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 50,
            factor: 2.0,
            max_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ReliefConfig {
    #[serde(default)]
    pub mesh: MeshConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub encode: EncodeConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl ReliefConfig {
    pub fn load_from_file(path: &std::path::Path) -> ReliefResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> ReliefResult<Self> {
        let config: ReliefConfig =
            toml::from_str(contents).map_err(|e| ReliefError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &std::path::Path) -> ReliefResult<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ReliefError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> ReliefResult<()> {
        let m = &self.mesh;
        if !(m.unit_scale.is_finite() && m.unit_scale > 0.0) {
            return Err(ReliefError::Config("mesh.unit_scale must be positive".into()));
        }
        if !(m.discontinuity_threshold.is_finite() && m.discontinuity_threshold > 0.0) {
            return Err(ReliefError::Config(
                "mesh.discontinuity_threshold must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&m.min_survival_fraction) {
            return Err(ReliefError::Config(
                "mesh.min_survival_fraction must be within [0, 1]".into(),
            ));
        }
        if !(m.focal_length_factor.is_finite() && m.focal_length_factor > 0.0) {
            return Err(ReliefError::Config(
                "mesh.focal_length_factor must be positive".into(),
            ));
        }
        if m.decimation_target == Some(0) {
            return Err(ReliefError::Config(
                "mesh.decimation_target must be at least 1".into(),
            ));
        }
        if !(m.outlier_std_ratio.is_finite() && m.outlier_std_ratio > 0.0) {
            return Err(ReliefError::Config(
                "mesh.outlier_std_ratio must be positive".into(),
            ));
        }

        let t = &self.transform;
        if !(t.min_scale > 0.0 && t.min_scale < t.max_scale && t.max_scale.is_finite()) {
            return Err(ReliefError::Config(
                "transform scale bounds must satisfy 0 < min_scale < max_scale".into(),
            ));
        }

        let r = &self.render;
        if r.width == 0 || r.height == 0 {
            return Err(ReliefError::Config("render resolution must be non-zero".into()));
        }
        if !(r.fov_degrees > 0.0 && r.fov_degrees < 180.0) {
            return Err(ReliefError::Config(
                "render.fov_degrees must be within (0, 180)".into(),
            ));
        }
        if !(r.near > 0.0 && r.near < r.far) {
            return Err(ReliefError::Config(
                "render clip planes must satisfy 0 < near < far".into(),
            ));
        }
        if !(0.0..=1.0).contains(&r.ambient) {
            return Err(ReliefError::Config("render.ambient must be within [0, 1]".into()));
        }

        let e = &self.encode;
        if !(2..=6).contains(&e.palette_levels) {
            return Err(ReliefError::Config(
                "encode.palette_levels must be within 2..=6".into(),
            ));
        }
        if !(1..=30).contains(&e.gif_speed) {
            return Err(ReliefError::Config("encode.gif_speed must be within 1..=30".into()));
        }
        if !(1..=100).contains(&e.jpeg_quality) {
            return Err(ReliefError::Config(
                "encode.jpeg_quality must be within 1..=100".into(),
            ));
        }
        if !(e.fps > 0.0 && e.fps <= e.max_fps) {
            return Err(ReliefError::Config("encode.fps must be within (0, max_fps]".into()));
        }
        if e.default_format == ExportFormat::LoopImage {
            let delay_cs = 100.0 / e.fps;
            if delay_cs.round() < 2.0 || (delay_cs - delay_cs.round()).abs() > 1e-6 {
                return Err(ReliefError::Config(format!(
                    "encode.fps {} has no whole-centisecond loop-image delay",
                    e.fps
                )));
            }
        }

        if self.pipeline.orbit_frames == 0 {
            return Err(ReliefError::Config("pipeline.orbit_frames must be non-zero".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ReliefError::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ReliefConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = ReliefConfig::from_toml_str(
            r#"
            [mesh]
            discontinuity_threshold = 0.25
            decimation_target = 5000

            [encode]
            default_format = "video"
            "#,
        )
        .unwrap();
        assert!((config.mesh.discontinuity_threshold - 0.25).abs() < 1e-12);
        assert_eq!(config.mesh.decimation_target, Some(5000));
        assert!((config.mesh.unit_scale - 1.0).abs() < 1e-12);
        assert_eq!(config.encode.default_format, ExportFormat::Video);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_outlier_filter_settings() {
        let config = ReliefConfig::default();
        assert_eq!(config.mesh.outlier_neighbors, 20);
        assert!((config.mesh.outlier_std_ratio - 2.0).abs() < 1e-12);
        let off = ReliefConfig::from_toml_str("[mesh]\noutlier_neighbors = 0\n").unwrap();
        assert_eq!(off.mesh.outlier_neighbors, 0);
        let err = ReliefConfig::from_toml_str("[mesh]\noutlier_std_ratio = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("outlier_std_ratio"));
    }

    #[test]
    fn test_invalid_palette_levels_rejected() {
        let err = ReliefConfig::from_toml_str("[encode]\npalette_levels = 9\n").unwrap_err();
        assert!(err.to_string().contains("palette_levels"));
    }

    #[test]
    fn test_loop_image_fps_must_have_exact_delay() {
        let err = ReliefConfig::from_toml_str("[encode]\nfps = 12.0\n").unwrap_err();
        assert!(err.to_string().contains("encode.fps"));
        assert!(ReliefConfig::from_toml_str("[encode]\nfps = 25.0\n").is_ok());
        assert!(ReliefConfig::from_toml_str(
            "[encode]\nfps = 24.0\ndefault_format = \"video\"\n"
        )
        .is_ok());
    }

    #[test]
    fn test_config_round_trips_through_file() {
        let path = std::env::temp_dir().join(format!("relief_config_{}.toml", std::process::id()));
        let mut config = ReliefConfig::default();
        config.pipeline.orbit_frames = 24;
        config.save_to_file(&path).unwrap();
        let loaded = ReliefConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.pipeline.orbit_frames, 24);
        let _ = std::fs::remove_file(&path);
    }
}
