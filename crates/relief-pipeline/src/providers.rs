//! External collaborators: segmentation, depth estimation and captions.
//!
//! Providers are explicit service handles. The orchestrator calls `load`
//! once at construction and `close` at shutdown.

use dashmap::DashMap;
use relief_core::hash::{hash_frame, ContentHash};
use relief_core::{FrameBuffer, PixelFormat, ReliefError, ReliefResult};
use relief_mesh::{DepthMap, Mask};
use relief_scene::{BoundingBox, ProjectId, SceneId};
use serde::{Deserialize, Serialize};

/// One subject found by a segmentation provider.
#[derive(Debug, Clone)]
pub struct SegmentProposal {
    pub mask: Mask,
    /// Computed from the mask when the provider does not supply one.
    pub bbox: Option<BoundingBox>,
    pub confidence: f32,
}

pub trait SegmentationProvider: Send + Sync {
    fn name(&self) -> &str;

    fn load(&self) -> ReliefResult<()> {
        Ok(())
    }

    fn close(&self) {}

    fn segment(&self, image: &FrameBuffer) -> ReliefResult<Vec<SegmentProposal>>;
}

pub trait DepthProvider: Send + Sync {
    fn name(&self) -> &str;

    fn load(&self) -> ReliefResult<()> {
        Ok(())
    }

    fn close(&self) {}

    /// Depth with the same dimensions as `image`.
    fn estimate_depth(&self, image: &FrameBuffer) -> ReliefResult<DepthMap>;
}

/// What the caption service gets to see of an exported scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneContext {
    pub project_id: ProjectId,
    pub scene_id: SceneId,
    pub object_names: Vec<String>,
    pub frame_count: u64,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionSuggestion {
    pub text: String,
    pub relevance_score: f32,
}

pub trait CaptionService: Send + Sync {
    fn name(&self) -> &str;

    fn load(&self) -> ReliefResult<()> {
        Ok(())
    }

    fn close(&self) {}

    fn suggest(&self, context: &SceneContext) -> ReliefResult<Vec<CaptionSuggestion>>;
}

/// Segments a cutout by its alpha channel; an opaque image becomes one
/// full-frame segment.
#[derive(Debug, Clone, Default)]
pub struct AlphaSegmenter;

impl SegmentationProvider for AlphaSegmenter {
    fn name(&self) -> &str {
        "alpha"
    }

    fn segment(&self, image: &FrameBuffer) -> ReliefResult<Vec<SegmentProposal>> {
        let opaque = image.format == PixelFormat::Rgb8
            || image.data.chunks_exact(4).all(|px| px[3] == 255);
        let mask = if opaque {
            Mask::full(image.width, image.height)
        } else {
            Mask::from_image(image)
        };
        Ok(vec![SegmentProposal {
            mask,
            bbox: None,
            confidence: 1.0,
        }])
    }
}

/// Serves depth maps registered ahead of time for specific images.
#[derive(Debug, Default)]
pub struct StaticDepth {
    maps: DashMap<ContentHash, DepthMap>,
}

impl StaticDepth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, image: &FrameBuffer, depth: DepthMap) {
        self.maps.insert(hash_frame(image), depth);
    }
}

impl DepthProvider for StaticDepth {
    fn name(&self) -> &str {
        "static"
    }

    fn estimate_depth(&self, image: &FrameBuffer) -> ReliefResult<DepthMap> {
        self.maps
            .get(&hash_frame(image))
            .map(|d| d.clone())
            .ok_or_else(|| ReliefError::not_found("no depth map registered for this image"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relief_core::Color;

    #[test]
    fn test_alpha_segmenter_full_frame_for_opaque() {
        let image = FrameBuffer::solid(4, 4, &Color::WHITE);
        let proposals = AlphaSegmenter.segment(&image).unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].mask.count(0.5), 16);
    }

    #[test]
    fn test_alpha_segmenter_uses_transparency() {
        let mut image = FrameBuffer::solid(4, 4, &Color::WHITE);
        image.set_pixel(0, 0, [255, 255, 255, 0]);
        let proposals = AlphaSegmenter.segment(&image).unwrap();
        assert_eq!(proposals[0].mask.count(0.5), 15);
    }

    #[test]
    fn test_static_depth_lookup() {
        let provider = StaticDepth::new();
        let image = FrameBuffer::solid(2, 2, &Color::RED);
        assert_eq!(
            provider.estimate_depth(&image).unwrap_err().kind(),
            relief_core::ErrorKind::NotFound
        );
        provider.register(&image, DepthMap::uniform(2, 2, 1.5));
        assert_eq!(provider.estimate_depth(&image).unwrap().get(1, 1), Some(1.5));
    }
}
