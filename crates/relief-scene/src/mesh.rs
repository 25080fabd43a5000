use chrono::{DateTime, Utc};
use glam::{DVec2, DVec3};
use relief_core::hash::{ContentHash, ContentHasher};
use relief_core::{Bounds3, ReliefError, ReliefResult};
use serde::{Deserialize, Serialize};

use crate::ids::{BlobRef, MeshId, SegmentId};

/// Raw triangle-mesh geometry with per-vertex UVs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshGeometry {
    pub vertices: Vec<DVec3>,
    pub uvs: Vec<DVec2>,
    pub triangles: Vec<[u32; 3]>,
}

impl MeshGeometry {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Every triangle index is in bounds and every vertex has a UV.
    pub fn validate(&self) -> ReliefResult<()> {
        if self.uvs.len() != self.vertices.len() {
            return Err(ReliefError::validation(format!(
                "mesh has {} vertices but {} uvs",
                self.vertices.len(),
                self.uvs.len()
            )));
        }
        let n = self.vertices.len();
        for (i, tri) in self.triangles.iter().enumerate() {
            if let Some(bad) = tri.iter().find(|&&idx| idx as usize >= n) {
                return Err(ReliefError::validation(format!(
                    "triangle {} references vertex {} of {}",
                    i, bad, n
                )));
            }
        }
        Ok(())
    }

    pub fn bounds(&self) -> Option<Bounds3> {
        Bounds3::from_points(&self.vertices)
    }

    /// Hash of the geometry; equal geometry hashes equally.
    pub fn content_hash(&self) -> ContentHash {
        let mut h = ContentHasher::new();
        h.update_u64(self.vertices.len() as u64);
        for v in &self.vertices {
            h.update_f64(v.x).update_f64(v.y).update_f64(v.z);
        }
        for uv in &self.uvs {
            h.update_f64(uv.x).update_f64(uv.y);
        }
        h.update_u64(self.triangles.len() as u64);
        for t in &self.triangles {
            for idx in t {
                h.update_u64(*idx as u64);
            }
        }
        h.finish()
    }
}

/// Reconstruction statistics recorded alongside a mesh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshStats {
    pub masked_pixels: usize,
    /// Masked pixels that ended up as vertices of at least one triangle.
    pub surviving_pixels: usize,
    pub vertex_count: usize,
    pub triangle_count: usize,
    pub removed_degenerate: usize,
    pub removed_duplicate: usize,
    /// Pixels dropped by the statistical depth outlier filter.
    #[serde(default)]
    pub removed_outliers: usize,
}

impl MeshStats {
    pub fn survival_fraction(&self) -> f64 {
        if self.masked_pixels == 0 {
            0.0
        } else {
            self.surviving_pixels as f64 / self.masked_pixels as f64
        }
    }
}

/// A textured mesh reconstructed from one segment. Never mutated after
/// creation; a rebuild creates a new version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshAsset {
    pub id: MeshId,
    pub segment_id: SegmentId,
    /// 1-based, increasing per segment.
    pub version: u32,
    pub geometry: MeshGeometry,
    pub texture: BlobRef,
    pub stats: MeshStats,
    pub created_at: DateTime<Utc>,
}

impl MeshAsset {
    pub fn new(
        segment_id: SegmentId,
        version: u32,
        geometry: MeshGeometry,
        texture: BlobRef,
        stats: MeshStats,
    ) -> ReliefResult<Self> {
        geometry.validate()?;
        Ok(Self {
            id: MeshId::generate(),
            segment_id,
            version,
            geometry,
            texture,
            stats,
            created_at: Utc::now(),
        })
    }

    pub fn bounds(&self) -> Option<Bounds3> {
        self.geometry.bounds()
    }
}
