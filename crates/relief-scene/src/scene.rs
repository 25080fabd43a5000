use chrono::{DateTime, Utc};
use relief_core::{Bounds3, ReliefError, ReliefResult};
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::graph::{ObjectId, SceneGraph, SceneObject};
use crate::ids::{BlobRef, ProjectId, SceneId};

/// A composed scene: the object graph, its camera and the latest export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: SceneId,
    pub project_id: ProjectId,
    pub graph: SceneGraph,
    pub camera: Camera,
    /// Bumped by every committed edit.
    pub version: u64,
    pub export_artifact: Option<BlobRef>,
    pub created_at: DateTime<Utc>,
}

impl Scene {
    pub fn new(project_id: ProjectId, camera: Camera) -> Self {
        Self {
            id: SceneId::generate(),
            project_id,
            graph: SceneGraph::new(),
            camera,
            version: 0,
            export_artifact: None,
            created_at: Utc::now(),
        }
    }

    pub fn add_object(&mut self, object: SceneObject) -> ObjectId {
        self.graph.insert(object)
    }

    /// Fails with a conflict error when `expected` is not the current version.
    pub fn check_version(&self, expected: u64) -> ReliefResult<()> {
        if expected != self.version {
            return Err(ReliefError::conflict(
                format!("scene {}", self.id),
                expected,
                self.version,
            ));
        }
        Ok(())
    }

    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// Reparent `object` under an optimistic version check.
    pub fn reparent(
        &mut self,
        expected_version: u64,
        object: ObjectId,
        parent: Option<ObjectId>,
    ) -> ReliefResult<u64> {
        self.check_version(expected_version)?;
        self.graph.attach(object, parent)?;
        Ok(self.bump_version())
    }

    /// Replace the camera under an optimistic version check.
    pub fn set_camera(&mut self, expected_version: u64, camera: Camera) -> ReliefResult<u64> {
        self.check_version(expected_version)?;
        camera.validate()?;
        self.camera = camera;
        Ok(self.bump_version())
    }

    /// Combined world-space bounds given each mesh's local bounds.
    pub fn world_bounds<F>(&self, mesh_bounds: F) -> ReliefResult<Option<Bounds3>>
    where
        F: Fn(&crate::ids::MeshId) -> Option<Bounds3>,
    {
        let mut out: Option<Bounds3> = None;
        for (id, obj) in self.graph.iter() {
            let Some(local) = mesh_bounds(&obj.mesh) else {
                continue;
            };
            let world = local.transformed(&self.graph.world_transform(id)?);
            out = Some(match out {
                Some(b) => b.union(&world),
                None => world,
            });
        }
        Ok(out)
    }
}
