use serde::{Deserialize, Serialize};

pub use glam::{DMat4, DQuat, DVec2, DVec3, DVec4};

/// A 3D rigid-plus-scale transform: position, unit-quaternion rotation and
/// per-axis scale.
///
/// The matrix form applies scale first, then rotation, then translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3D {
    pub position: DVec3,
    pub rotation: DQuat,
    pub scale: DVec3,
}

impl Transform3D {
    pub fn identity() -> Self {
        Self {
            position: DVec3::ZERO,
            rotation: DQuat::IDENTITY,
            scale: DVec3::ONE,
        }
    }

    pub fn from_position(position: DVec3) -> Self {
        Self {
            position,
            ..Self::identity()
        }
    }

    pub fn with_rotation(mut self, rotation: DQuat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: DVec3) -> Self {
        self.scale = scale;
        self
    }

    /// `T * R * S`.
    pub fn to_matrix(&self) -> DMat4 {
        DMat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Linear interpolation for position and scale, spherical for rotation.
    pub fn interpolate(&self, other: &Transform3D, t: f64) -> Transform3D {
        let t = t.clamp(0.0, 1.0);
        Transform3D {
            position: self.position.lerp(other.position, t),
            rotation: self.rotation.slerp(other.rotation, t),
            scale: self.scale.lerp(other.scale, t),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds3 {
    pub min: DVec3,
    pub max: DVec3,
}

impl Bounds3 {
    /// Bounds of a point set; `None` for an empty set.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a DVec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        let mut b = Bounds3 {
            min: first,
            max: first,
        };
        for p in iter {
            b.min = b.min.min(*p);
            b.max = b.max.max(*p);
        }
        Some(b)
    }

    pub fn union(&self, other: &Bounds3) -> Bounds3 {
        Bounds3 {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> DVec3 {
        self.max - self.min
    }

    /// Radius of the bounding sphere around `center`.
    pub fn radius(&self) -> f64 {
        self.extent().length() * 0.5
    }

    /// Bounds of the eight transformed corners.
    pub fn transformed(&self, m: &DMat4) -> Bounds3 {
        let corners = [
            DVec3::new(self.min.x, self.min.y, self.min.z),
            DVec3::new(self.max.x, self.min.y, self.min.z),
            DVec3::new(self.min.x, self.max.y, self.min.z),
            DVec3::new(self.max.x, self.max.y, self.min.z),
            DVec3::new(self.min.x, self.min.y, self.max.z),
            DVec3::new(self.max.x, self.min.y, self.max.z),
            DVec3::new(self.min.x, self.max.y, self.max.z),
            DVec3::new(self.max.x, self.max.y, self.max.z),
        ];
        let moved: Vec<DVec3> = corners.iter().map(|c| m.transform_point3(*c)).collect();
        // Eight corners, never empty.
        Bounds3::from_points(&moved).unwrap_or(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_identity_matrix() {
        assert_eq!(Transform3D::identity().to_matrix(), DMat4::IDENTITY);
    }

    #[test]
    fn test_transform_applies_scale_then_rotate_then_translate() {
        let t = Transform3D::from_position(DVec3::new(10.0, 0.0, 0.0))
            .with_rotation(DQuat::from_rotation_z(std::f64::consts::FRAC_PI_2))
            .with_scale(DVec3::new(2.0, 1.0, 1.0));
        let p = t.to_matrix().transform_point3(DVec3::X);
        // (1,0,0) -> scale (2,0,0) -> rotate 90deg about Z (0,2,0) -> translate (10,2,0)
        assert!((p - DVec3::new(10.0, 2.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_interpolate_midpoint() {
        let a = Transform3D::identity();
        let b = Transform3D::from_position(DVec3::new(4.0, 0.0, 0.0))
            .with_rotation(DQuat::from_rotation_y(std::f64::consts::FRAC_PI_2))
            .with_scale(DVec3::splat(3.0));
        let mid = a.interpolate(&b, 0.5);
        assert!((mid.position.x - 2.0).abs() < 1e-12);
        assert!((mid.scale.x - 2.0).abs() < 1e-12);
        let expected = DQuat::from_rotation_y(std::f64::consts::FRAC_PI_4);
        assert!(mid.rotation.dot(expected).abs() > 1.0 - 1e-9);
    }

    #[test]
    fn test_bounds_center_and_radius() {
        let pts = [DVec3::new(-1.0, -1.0, -1.0), DVec3::new(1.0, 1.0, 1.0)];
        let b = Bounds3::from_points(&pts).unwrap();
        assert_eq!(b.center(), DVec3::ZERO);
        assert!((b.radius() - 3f64.sqrt()).abs() < 1e-12);
        assert!(Bounds3::from_points(&[]).is_none());
    }
}
