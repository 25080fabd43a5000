use std::collections::HashMap;
use std::sync::Arc;

use relief_core::{FrameBuffer, ReliefError, ReliefResult};
use relief_scene::{MeshAsset, MeshGeometry, MeshId};

/// Geometry and decoded texture of one mesh, shared across frames.
#[derive(Debug, Clone)]
pub struct MeshResource {
    pub geometry: Arc<MeshGeometry>,
    pub texture: Arc<FrameBuffer>,
}

/// Meshes a scene references, resolved ahead of rendering.
#[derive(Debug, Clone, Default)]
pub struct SceneAssets {
    meshes: HashMap<MeshId, MeshResource>,
}

impl SceneAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: MeshId, geometry: MeshGeometry, texture: FrameBuffer) {
        self.meshes.insert(
            id,
            MeshResource {
                geometry: Arc::new(geometry),
                texture: Arc::new(texture.into_rgba8()),
            },
        );
    }

    pub fn insert_asset(&mut self, asset: &MeshAsset, texture: FrameBuffer) {
        self.insert(asset.id.clone(), asset.geometry.clone(), texture);
    }

    pub fn get(&self, id: &MeshId) -> ReliefResult<&MeshResource> {
        self.meshes
            .get(id)
            .ok_or_else(|| ReliefError::not_found(format!("mesh {} has no resolved asset", id)))
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}
