use std::collections::HashMap;

use glam::DMat4;
use relief_core::{ReliefError, ReliefResult, Transform3D};
use serde::{Deserialize, Serialize};

use crate::ids::MeshId;
use crate::keyframe::KeyframeTrack;

/// Index of an object in a [`SceneGraph`] arena. Never reused after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub usize);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// A placed instance of a mesh asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneObject {
    pub mesh: MeshId,
    pub name: String,
    pub local: Transform3D,
    pub keyframes: KeyframeTrack,
    parent: Option<ObjectId>,
    children: Vec<ObjectId>,
}

impl SceneObject {
    pub fn new(mesh: MeshId, name: impl Into<String>) -> Self {
        Self {
            mesh,
            name: name.into(),
            local: Transform3D::identity(),
            keyframes: KeyframeTrack::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn with_transform(mut self, local: Transform3D) -> Self {
        self.local = local;
        self
    }

    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    pub fn children(&self) -> &[ObjectId] {
        &self.children
    }

    /// Local transform at animation time `t`: the keyframe track if it has
    /// any keyframes, the static local transform otherwise.
    pub fn local_at(&self, t: f64) -> Transform3D {
        self.keyframes.sample(t).unwrap_or(self.local)
    }
}

/// Arena-backed tree of scene objects. Parents are indices; there are no
/// back-pointers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneGraph {
    slots: Vec<Option<SceneObject>>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `object` as a new root.
    pub fn insert(&mut self, mut object: SceneObject) -> ObjectId {
        object.parent = None;
        object.children.clear();
        let id = ObjectId(self.slots.len());
        self.slots.push(Some(object));
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<&SceneObject> {
        self.slots.get(id.0).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut SceneObject> {
        self.slots.get_mut(id.0).and_then(|s| s.as_mut())
    }

    fn require(&self, id: ObjectId) -> ReliefResult<&SceneObject> {
        self.get(id)
            .ok_or_else(|| ReliefError::not_found(format!("{} is not in the scene", id)))
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live objects in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &SceneObject)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|o| (ObjectId(i), o)))
    }

    /// Root objects in insertion order.
    pub fn roots(&self) -> Vec<ObjectId> {
        self.iter()
            .filter(|(_, o)| o.parent.is_none())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn children(&self, id: ObjectId) -> ReliefResult<&[ObjectId]> {
        Ok(self.require(id)?.children())
    }

    /// Ancestors from the direct parent up to the root.
    pub fn ancestors(&self, id: ObjectId) -> ReliefResult<Vec<ObjectId>> {
        let mut out = Vec::new();
        let mut cur = self.require(id)?.parent;
        while let Some(p) = cur {
            out.push(p);
            cur = self.require(p)?.parent;
        }
        Ok(out)
    }

    /// Whether `candidate` lies in the subtree rooted at `ancestor`
    /// (an object counts as its own descendant).
    pub fn is_descendant(&self, candidate: ObjectId, ancestor: ObjectId) -> ReliefResult<bool> {
        if candidate == ancestor {
            return Ok(true);
        }
        Ok(self.ancestors(candidate)?.contains(&ancestor))
    }

    /// Attach `object` under `parent`, or make it a root when `parent` is
    /// `None`. Fails with a cycle error if `parent` is `object` or one of its
    /// descendants; the graph is unchanged on failure.
    pub fn attach(&mut self, object: ObjectId, parent: Option<ObjectId>) -> ReliefResult<()> {
        self.require(object)?;
        if let Some(p) = parent {
            self.require(p)?;
            if self.is_descendant(p, object)? {
                return Err(ReliefError::cycle(object, p));
            }
        }
        self.unlink(object);
        if let Some(p) = parent {
            if let Some(parent_obj) = self.get_mut(p) {
                parent_obj.children.push(object);
            }
        }
        if let Some(obj) = self.get_mut(object) {
            obj.parent = parent;
        }
        Ok(())
    }

    /// Make `object` a root, keeping its subtree.
    pub fn detach(&mut self, object: ObjectId) -> ReliefResult<()> {
        self.attach(object, None)
    }

    fn unlink(&mut self, object: ObjectId) {
        let old_parent = self.get(object).and_then(|o| o.parent);
        if let Some(p) = old_parent {
            if let Some(parent_obj) = self.get_mut(p) {
                parent_obj.children.retain(|c| *c != object);
            }
        }
        if let Some(obj) = self.get_mut(object) {
            obj.parent = None;
        }
    }

    /// Remove `object` and its whole subtree. Returns the removed ids,
    /// parents before children.
    pub fn remove(&mut self, object: ObjectId) -> ReliefResult<Vec<ObjectId>> {
        self.require(object)?;
        self.unlink(object);
        let mut removed = Vec::new();
        let mut stack = vec![object];
        while let Some(id) = stack.pop() {
            if let Some(obj) = self.slots.get_mut(id.0).and_then(|s| s.take()) {
                removed.push(id);
                stack.extend(obj.children.iter().rev().copied());
            }
        }
        Ok(removed)
    }

    /// Root-to-leaf chain ending at `object`.
    fn chain(&self, object: ObjectId) -> ReliefResult<Vec<ObjectId>> {
        let mut chain = self.ancestors(object)?;
        chain.reverse();
        chain.push(object);
        Ok(chain)
    }

    /// World matrix of `object`: `parent_world * local`, folded from the root.
    pub fn world_transform(&self, object: ObjectId) -> ReliefResult<DMat4> {
        let mut world = DMat4::IDENTITY;
        for id in self.chain(object)? {
            world *= self.require(id)?.local.to_matrix();
        }
        Ok(world)
    }

    /// World matrix at animation time `t`, evaluating keyframe tracks along
    /// the chain.
    pub fn world_transform_at(&self, object: ObjectId, t: f64) -> ReliefResult<DMat4> {
        let mut world = DMat4::IDENTITY;
        for id in self.chain(object)? {
            world *= self.require(id)?.local_at(t).to_matrix();
        }
        Ok(world)
    }

    /// World matrices of every live object at time `t`, computed top-down so
    /// each parent's matrix is reused by its children. Insertion order.
    pub fn world_transforms_at(&self, t: f64) -> Vec<(ObjectId, DMat4)> {
        let mut cache: HashMap<ObjectId, DMat4> = HashMap::new();
        let mut stack: Vec<(ObjectId, DMat4)> = self
            .roots()
            .into_iter()
            .rev()
            .map(|r| (r, DMat4::IDENTITY))
            .collect();
        while let Some((id, parent_world)) = stack.pop() {
            let Some(obj) = self.get(id) else { continue };
            let world = parent_world * obj.local_at(t).to_matrix();
            cache.insert(id, world);
            for child in obj.children.iter().rev() {
                stack.push((*child, world));
            }
        }
        self.iter()
            .filter_map(|(id, _)| cache.get(&id).map(|m| (id, *m)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{DQuat, DVec3};

    fn obj(name: &str) -> SceneObject {
        SceneObject::new(MeshId::new(name), name)
    }

    #[test]
    fn test_attach_and_children() {
        let mut g = SceneGraph::new();
        let a = g.insert(obj("a"));
        let b = g.insert(obj("b"));
        g.attach(b, Some(a)).unwrap();
        assert_eq!(g.children(a).unwrap(), &[b]);
        assert_eq!(g.roots(), vec![a]);
        assert_eq!(g.ancestors(b).unwrap(), vec![a]);
    }

    #[test]
    fn test_attach_to_self_is_cycle() {
        let mut g = SceneGraph::new();
        let a = g.insert(obj("a"));
        let err = g.attach(a, Some(a)).unwrap_err();
        assert_eq!(err.kind(), relief_core::ErrorKind::Cycle);
    }

    #[test]
    fn test_attach_under_descendant_is_cycle_and_leaves_graph_intact() {
        let mut g = SceneGraph::new();
        let a = g.insert(obj("a"));
        let b = g.insert(obj("b"));
        let c = g.insert(obj("c"));
        g.attach(b, Some(a)).unwrap();
        g.attach(c, Some(b)).unwrap();
        assert!(g.attach(a, Some(c)).is_err());
        assert!(g.attach(a, Some(b)).is_err());
        assert_eq!(g.get(a).unwrap().parent(), None);
        assert_eq!(g.ancestors(c).unwrap(), vec![b, a]);
    }

    #[test]
    fn test_reattach_moves_between_parents() {
        let mut g = SceneGraph::new();
        let a = g.insert(obj("a"));
        let b = g.insert(obj("b"));
        let c = g.insert(obj("c"));
        g.attach(c, Some(a)).unwrap();
        g.attach(c, Some(b)).unwrap();
        assert!(g.children(a).unwrap().is_empty());
        assert_eq!(g.children(b).unwrap(), &[c]);
        g.detach(c).unwrap();
        assert_eq!(g.roots(), vec![a, b, c]);
    }

    #[test]
    fn test_remove_subtree() {
        let mut g = SceneGraph::new();
        let a = g.insert(obj("a"));
        let b = g.insert(obj("b"));
        let c = g.insert(obj("c"));
        let d = g.insert(obj("d"));
        g.attach(b, Some(a)).unwrap();
        g.attach(c, Some(b)).unwrap();
        let removed = g.remove(b).unwrap();
        assert_eq!(removed, vec![b, c]);
        assert!(!g.contains(c));
        assert!(g.children(a).unwrap().is_empty());
        assert_eq!(g.len(), 2);
        assert_eq!(g.roots(), vec![a, d]);
        let e = g.insert(obj("e"));
        assert_eq!(e, ObjectId(4));
    }

    #[test]
    fn test_world_transform_composes_parent_first() {
        let mut g = SceneGraph::new();
        let parent = g.insert(obj("p").with_transform(
            Transform3D::from_position(DVec3::new(10.0, 0.0, 0.0))
                .with_rotation(DQuat::from_rotation_z(std::f64::consts::FRAC_PI_2)),
        ));
        let child =
            g.insert(obj("c").with_transform(Transform3D::from_position(DVec3::new(1.0, 0.0, 0.0))));
        g.attach(child, Some(parent)).unwrap();
        let p = g.world_transform(child).unwrap().transform_point3(DVec3::ZERO);
        assert!((p - DVec3::new(10.0, 1.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_cached_and_recomputed_world_transforms_agree() {
        let mut g = SceneGraph::new();
        let a = g.insert(obj("a").with_transform(
            Transform3D::from_position(DVec3::new(1.0, 2.0, 3.0))
                .with_rotation(DQuat::from_rotation_y(0.3))
                .with_scale(DVec3::splat(1.5)),
        ));
        let b = g.insert(obj("b").with_transform(
            Transform3D::from_position(DVec3::new(-0.5, 0.25, 4.0))
                .with_rotation(DQuat::from_rotation_x(1.1)),
        ));
        let c = g.insert(obj("c").with_transform(
            Transform3D::from_position(DVec3::new(0.1, 0.2, 0.3))
                .with_scale(DVec3::new(2.0, 0.5, 1.0)),
        ));
        g.attach(b, Some(a)).unwrap();
        g.attach(c, Some(b)).unwrap();

        let cached = g.world_transforms_at(0.0);
        for (id, m) in &cached {
            assert_eq!(*m, g.world_transform(*id).unwrap());
        }
        let expected = g.get(a).unwrap().local.to_matrix()
            * g.get(b).unwrap().local.to_matrix()
            * g.get(c).unwrap().local.to_matrix();
        let got = g.world_transform(c).unwrap();
        assert!(got.abs_diff_eq(expected, 1e-12));
    }

    #[test]
    fn test_world_transform_at_uses_keyframes() {
        use crate::keyframe::Keyframe;
        let mut g = SceneGraph::new();
        let a = g.insert(obj("a"));
        let track = &mut g.get_mut(a).unwrap().keyframes;
        track
            .insert(Keyframe {
                name: "k0".into(),
                time: 0.0,
                transform: Transform3D::identity(),
            })
            .unwrap();
        track
            .insert(Keyframe {
                name: "k1".into(),
                time: 1.0,
                transform: Transform3D::from_position(DVec3::new(0.0, 4.0, 0.0)),
            })
            .unwrap();
        let p = g
            .world_transform_at(a, 0.25)
            .unwrap()
            .transform_point3(DVec3::ZERO);
        assert!((p.y - 1.0).abs() < 1e-12);
        // static transform is untouched by the track
        assert_eq!(g.world_transform(a).unwrap(), DMat4::IDENTITY);
    }
}
