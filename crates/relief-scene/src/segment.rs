use chrono::{DateTime, Utc};
use relief_core::{ReliefError, ReliefResult};
use serde::{Deserialize, Serialize};

use crate::ids::{BlobRef, ProjectId, SegmentId};

/// Pixel-space bounding box of a segment within its source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x
            && py >= self.y
            && (px - self.x) < self.width
            && (py - self.y) < self.height
    }
}

/// A segmented subject cut from one source image. Immutable once created;
/// re-segmentation supersedes it with a new segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub project_id: ProjectId,
    /// Index into the project's source images.
    pub source_index: usize,
    pub mask: BlobRef,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub superseded: bool,
    pub created_at: DateTime<Utc>,
}

impl Segment {
    pub fn new(
        project_id: ProjectId,
        source_index: usize,
        mask: BlobRef,
        bbox: BoundingBox,
        confidence: f32,
    ) -> ReliefResult<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ReliefError::validation(format!(
                "segment confidence {} outside [0, 1]",
                confidence
            )));
        }
        Ok(Self {
            id: SegmentId::generate(),
            project_id,
            source_index,
            mask,
            bbox,
            confidence,
            superseded: false,
            created_at: Utc::now(),
        })
    }

    pub fn is_active(&self) -> bool {
        !self.superseded
    }
}
