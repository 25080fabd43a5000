use glam::{DVec2, DVec3};
use relief_core::{FrameBuffer, MeshConfig, ReliefError, ReliefResult};
use relief_scene::{MeshGeometry, MeshStats};
use tracing::{debug, info};

use crate::cleanup::cleanup;
use crate::decimate::decimate;
use crate::outlier::remove_outliers;
use crate::raster::{DepthMap, Intrinsics, Mask};

/// Scaled depth at or below this is invalid when normalizing and no explicit
/// minimum is configured.
const NORMALIZED_MIN_DEPTH: f64 = 0.01;

/// Geometry plus the statistics gathered while building it.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltMesh {
    pub geometry: MeshGeometry,
    pub stats: MeshStats,
}

/// Back-projects a masked depth map into a triangulated, UV-mapped surface.
#[derive(Debug, Clone, Default)]
pub struct MeshBuilder {
    config: MeshConfig,
}

impl MeshBuilder {
    pub fn new(config: MeshConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Build a mesh from one segment.
    ///
    /// All rasters must share dimensions. `intrinsics` defaults to
    /// `fx = fy = focal_length_factor * width` centered on the image.
    pub fn build(
        &self,
        depth: &DepthMap,
        mask: &Mask,
        texture: &FrameBuffer,
        intrinsics: Option<Intrinsics>,
    ) -> ReliefResult<BuiltMesh> {
        let (w, h) = (depth.width, depth.height);
        if (mask.width, mask.height) != (w, h) || (texture.width, texture.height) != (w, h) {
            return Err(ReliefError::validation(format!(
                "raster size mismatch: depth {}x{}, mask {}x{}, image {}x{}",
                w, h, mask.width, mask.height, texture.width, texture.height
            )));
        }
        let k = intrinsics
            .unwrap_or_else(|| Intrinsics::default_for(w, h, self.config.focal_length_factor));
        k.validate()?;

        let scaled = self.scaled_depth(depth, mask);
        let masked_pixels = mask.count(self.config.mask_threshold);
        if masked_pixels == 0 {
            return Err(ReliefError::reconstruction("segment mask is empty"));
        }

        let min_depth = self.effective_min_depth();
        let mut valid: Vec<bool> = (0..(w as usize * h as usize))
            .map(|i| {
                let d = scaled[i];
                mask.alpha[i] >= self.config.mask_threshold && d.is_finite() && d > min_depth
            })
            .collect();
        let removed_outliers = remove_outliers(
            &scaled,
            &mut valid,
            w,
            h,
            self.config.outlier_neighbors,
            self.config.outlier_std_ratio,
        );
        if removed_outliers > 0 {
            debug!(removed_outliers, "dropped statistical depth outliers");
        }

        let idx = |x: u32, y: u32| y as usize * w as usize + x as usize;
        let mut vertex_of = vec![u32::MAX; w as usize * h as usize];
        let mut geometry = MeshGeometry::default();
        let mut vertex = |x: u32, y: u32, geometry: &mut MeshGeometry| -> u32 {
            let i = idx(x, y);
            if vertex_of[i] == u32::MAX {
                let z = scaled[i];
                let px = (x as f64 - k.cx) * z / k.fx;
                let py = (y as f64 - k.cy) * z / k.fy;
                vertex_of[i] = geometry.vertices.len() as u32;
                geometry.vertices.push(DVec3::new(px, -py, -z));
                geometry.uvs.push(DVec2::new(
                    (x as f64 + 0.5) / w as f64,
                    (y as f64 + 0.5) / h as f64,
                ));
            }
            vertex_of[i]
        };

        let threshold = self.config.discontinuity_threshold;
        for y in 0..h.saturating_sub(1) {
            for x in 0..w.saturating_sub(1) {
                let quad = [idx(x, y), idx(x + 1, y), idx(x, y + 1), idx(x + 1, y + 1)];
                if quad.iter().any(|&i| !valid[i]) {
                    continue;
                }
                let depths = quad.map(|i| scaled[i]);
                let lo = depths.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = depths.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                if hi - lo > threshold {
                    continue;
                }
                let p00 = vertex(x, y, &mut geometry);
                let p01 = vertex(x + 1, y, &mut geometry);
                let p10 = vertex(x, y + 1, &mut geometry);
                let p11 = vertex(x + 1, y + 1, &mut geometry);
                // counter-clockwise seen from +Z
                geometry.triangles.push([p00, p10, p01]);
                geometry.triangles.push([p01, p10, p11]);
            }
        }

        let report = cleanup(&mut geometry);
        let surviving_pixels = geometry.vertex_count();
        let fraction = surviving_pixels as f64 / masked_pixels as f64;
        if fraction < self.config.min_survival_fraction || geometry.triangles.is_empty() {
            return Err(ReliefError::reconstruction(format!(
                "only {} of {} masked pixels ({:.2}%) survived discontinuity filtering, need {:.2}%",
                surviving_pixels,
                masked_pixels,
                fraction * 100.0,
                self.config.min_survival_fraction * 100.0
            )));
        }

        if let Some(target) = self.config.decimation_target {
            let before = geometry.triangle_count();
            geometry = decimate(&geometry, target);
            debug!(before, after = geometry.triangle_count(), target, "decimated mesh");
            if geometry.triangles.is_empty() || geometry.triangle_count() > target {
                return Err(ReliefError::reconstruction(format!(
                    "decimation to {} triangles left {} of {}",
                    target,
                    geometry.triangle_count(),
                    before
                )));
            }
        }

        let stats = MeshStats {
            masked_pixels,
            surviving_pixels,
            vertex_count: geometry.vertex_count(),
            triangle_count: geometry.triangle_count(),
            removed_degenerate: report.degenerate,
            removed_duplicate: report.duplicate,
            removed_outliers,
        };
        info!(
            masked = stats.masked_pixels,
            surviving = stats.surviving_pixels,
            vertices = stats.vertex_count,
            triangles = stats.triangle_count,
            "built mesh"
        );
        Ok(BuiltMesh { geometry, stats })
    }

    fn effective_min_depth(&self) -> f64 {
        if self.config.min_depth > 0.0 {
            self.config.min_depth
        } else if self.config.normalize_depth {
            NORMALIZED_MIN_DEPTH
        } else {
            0.0
        }
    }

    /// Depth after optional min-max normalization and unit scaling.
    fn scaled_depth(&self, depth: &DepthMap, mask: &Mask) -> Vec<f64> {
        let range = if self.config.normalize_depth {
            let masked = depth
                .values
                .iter()
                .zip(&mask.alpha)
                .filter(|(d, a)| d.is_finite() && **a >= self.config.mask_threshold)
                .map(|(d, _)| *d as f64);
            masked.fold(None, |acc: Option<(f64, f64)>, d| match acc {
                None => Some((d, d)),
                Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
            })
        } else {
            None
        };
        depth
            .values
            .iter()
            .map(|&d| {
                let d = d as f64;
                let d = match range {
                    Some((lo, hi)) if hi > lo => (d - lo) / (hi - lo),
                    _ => d,
                };
                d * self.config.unit_scale
            })
            .collect()
    }
}
