use glam::{DQuat, DVec3};
use relief_core::{ReliefError, ReliefResult, Transform3D, TransformConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::ObjectId;
use crate::keyframe::Keyframe;
use crate::scene::Scene;

/// An edit to one scene object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformEdit {
    /// Replace the local transform.
    Set { transform: Transform3D },
    /// Offset the position.
    Translate { offset: DVec3 },
    /// Pre-multiply the rotation (rotate in the parent frame).
    Rotate { rotation: DQuat },
    /// Multiply the scale component-wise.
    ScaleBy { factor: DVec3 },
    SetKeyframe {
        name: String,
        time: f64,
        transform: Transform3D,
    },
    RemoveKeyframe { name: String },
}

/// Validates and commits transform edits.
#[derive(Debug, Clone)]
pub struct TransformEngine {
    min_scale: f64,
    max_scale: f64,
}

impl Default for TransformEngine {
    fn default() -> Self {
        Self::new(&TransformConfig::default())
    }
}

impl TransformEngine {
    pub fn new(config: &TransformConfig) -> Self {
        Self {
            min_scale: config.min_scale,
            max_scale: config.max_scale,
        }
    }

    /// Check a proposed transform and return it with a normalized rotation.
    pub fn validate(&self, t: &Transform3D) -> ReliefResult<Transform3D> {
        if !t.position.is_finite() {
            return Err(ReliefError::validation(format!(
                "position {:?} is not finite",
                t.position
            )));
        }
        if !t.scale.is_finite() {
            return Err(ReliefError::validation(format!(
                "scale {:?} is not finite",
                t.scale
            )));
        }
        for s in t.scale.to_array() {
            if !(s > 0.0 && s >= self.min_scale && s <= self.max_scale) {
                return Err(ReliefError::validation(format!(
                    "scale component {} outside [{}, {}]",
                    s, self.min_scale, self.max_scale
                )));
            }
        }
        let len = t.rotation.length();
        if !len.is_finite() || len == 0.0 {
            return Err(ReliefError::validation(format!(
                "rotation {:?} has zero or non-finite length",
                t.rotation
            )));
        }
        Ok(Transform3D {
            position: t.position,
            rotation: t.rotation / len,
            scale: t.scale,
        })
    }

    /// The transform that `edit` would produce from `current`, validated.
    /// Keyframe edits leave the static transform as is.
    pub fn preview(&self, current: &Transform3D, edit: &TransformEdit) -> ReliefResult<Transform3D> {
        let proposed = match edit {
            TransformEdit::Set { transform } => *transform,
            TransformEdit::Translate { offset } => Transform3D {
                position: current.position + *offset,
                ..*current
            },
            TransformEdit::Rotate { rotation } => {
                let r = self.validate(&Transform3D::identity().with_rotation(*rotation))?;
                Transform3D {
                    rotation: r.rotation * current.rotation,
                    ..*current
                }
            }
            TransformEdit::ScaleBy { factor } => Transform3D {
                scale: current.scale * *factor,
                ..*current
            },
            TransformEdit::SetKeyframe { .. } | TransformEdit::RemoveKeyframe { .. } => *current,
        };
        self.validate(&proposed)
    }

    /// Apply `edit` to `object` if the scene is still at `expected_version`.
    /// Returns the new scene version. Nothing changes on error.
    pub fn apply(
        &self,
        scene: &mut Scene,
        object: ObjectId,
        edit: &TransformEdit,
        expected_version: u64,
    ) -> ReliefResult<u64> {
        scene.check_version(expected_version)?;
        let node = scene
            .graph
            .get(object)
            .ok_or_else(|| ReliefError::not_found(format!("{} is not in scene {}", object, scene.id)))?;
        let next = self.preview(&node.local, edit)?;

        let node = scene
            .graph
            .get_mut(object)
            .ok_or_else(|| ReliefError::not_found(format!("{} is not in scene", object)))?;
        match edit {
            TransformEdit::SetKeyframe {
                name,
                time,
                transform,
            } => {
                let transform = self.validate(transform)?;
                node.keyframes.insert(Keyframe {
                    name: name.clone(),
                    time: *time,
                    transform,
                })?;
            }
            TransformEdit::RemoveKeyframe { name } => {
                if node.keyframes.remove(name).is_none() {
                    return Err(ReliefError::not_found(format!(
                        "keyframe '{}' on {}",
                        name, object
                    )));
                }
            }
            _ => node.local = next,
        }
        let version = scene.bump_version();
        debug!(scene = %scene.id, %object, version, "applied transform edit");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::graph::SceneObject;
    use crate::ids::{MeshId, ProjectId};
    use relief_core::ErrorKind;

    fn scene_with_object() -> (Scene, ObjectId) {
        let mut scene = Scene::new(
            ProjectId::new("p"),
            Camera::new(DVec3::new(0.0, 0.0, 5.0), DVec3::ZERO, 50.0).unwrap(),
        );
        let id = scene.add_object(SceneObject::new(MeshId::new("m"), "subject"));
        (scene, id)
    }

    #[test]
    fn test_rejects_non_positive_scale() {
        let engine = TransformEngine::default();
        let t = Transform3D::identity().with_scale(DVec3::new(1.0, 0.0, 1.0));
        assert_eq!(engine.validate(&t).unwrap_err().kind(), ErrorKind::Validation);
        let t = Transform3D::identity().with_scale(DVec3::new(1.0, -2.0, 1.0));
        assert!(engine.validate(&t).is_err());
    }

    #[test]
    fn test_rejects_scale_outside_bounds() {
        let engine = TransformEngine::default();
        assert!(engine
            .validate(&Transform3D::identity().with_scale(DVec3::splat(1e5)))
            .is_err());
        assert!(engine
            .validate(&Transform3D::identity().with_scale(DVec3::splat(1e-5)))
            .is_err());
        assert!(engine
            .validate(&Transform3D::identity().with_scale(DVec3::splat(1e4)))
            .is_ok());
    }

    #[test]
    fn test_rejects_non_finite_position() {
        let engine = TransformEngine::default();
        let t = Transform3D::from_position(DVec3::new(f64::INFINITY, 0.0, 0.0));
        assert!(engine.validate(&t).is_err());
    }

    #[test]
    fn test_normalizes_rotation() {
        let engine = TransformEngine::default();
        let t = Transform3D::identity().with_rotation(DQuat::from_xyzw(0.0, 0.0, 0.0, 3.0));
        let v = engine.validate(&t).unwrap();
        assert!((v.rotation.length() - 1.0).abs() < 1e-12);
        let zero = Transform3D::identity().with_rotation(DQuat::from_xyzw(0.0, 0.0, 0.0, 0.0));
        assert!(engine.validate(&zero).is_err());
    }

    #[test]
    fn test_apply_bumps_version_and_rejects_stale() {
        let engine = TransformEngine::default();
        let (mut scene, id) = scene_with_object();
        let edit = TransformEdit::Translate {
            offset: DVec3::new(1.0, 0.0, 0.0),
        };
        assert_eq!(engine.apply(&mut scene, id, &edit, 0).unwrap(), 1);
        let err = engine.apply(&mut scene, id, &edit, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(engine.apply(&mut scene, id, &edit, 1).unwrap(), 2);
        assert_eq!(scene.graph.get(id).unwrap().local.position.x, 2.0);
    }

    #[test]
    fn test_invalid_edit_leaves_scene_untouched() {
        let engine = TransformEngine::default();
        let (mut scene, id) = scene_with_object();
        let edit = TransformEdit::ScaleBy {
            factor: DVec3::new(1.0, 0.0, 1.0),
        };
        assert!(engine.apply(&mut scene, id, &edit, 0).is_err());
        assert_eq!(scene.version, 0);
        assert_eq!(scene.graph.get(id).unwrap().local, Transform3D::identity());
    }

    #[test]
    fn test_rotate_composes_in_parent_frame() {
        let engine = TransformEngine::default();
        let current = Transform3D::identity().with_rotation(DQuat::from_rotation_y(0.5));
        let next = engine
            .preview(
                &current,
                &TransformEdit::Rotate {
                    rotation: DQuat::from_rotation_y(0.25),
                },
            )
            .unwrap();
        assert!(next.rotation.angle_between(DQuat::from_rotation_y(0.75)) < 1e-9);
    }

    #[test]
    fn test_keyframe_edits() {
        let engine = TransformEngine::default();
        let (mut scene, id) = scene_with_object();
        let add = TransformEdit::SetKeyframe {
            name: "lift".into(),
            time: 1.0,
            transform: Transform3D::from_position(DVec3::Y),
        };
        engine.apply(&mut scene, id, &add, 0).unwrap();
        assert_eq!(scene.graph.get(id).unwrap().keyframes.len(), 1);
        let remove = TransformEdit::RemoveKeyframe {
            name: "lift".into(),
        };
        engine.apply(&mut scene, id, &remove, 1).unwrap();
        let missing = engine.apply(&mut scene, id, &remove, 2).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert_eq!(scene.version, 2);
    }
}
