use glam::{DMat4, DVec3};
use relief_core::{ReliefError, ReliefResult};
use serde::{Deserialize, Serialize};

const DEGENERATE_EPSILON: f64 = 1e-9;

/// A look-at camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub position: DVec3,
    pub target: DVec3,
    /// Vertical field of view, in (0, 180) degrees.
    pub fov_degrees: f64,
    pub up: DVec3,
}

impl Camera {
    /// Validates the field of view and finiteness. A target coincident
    /// with the position is accepted here and rejected at render time.
    pub fn new(position: DVec3, target: DVec3, fov_degrees: f64) -> ReliefResult<Self> {
        let camera = Self {
            position,
            target,
            fov_degrees,
            up: DVec3::Y,
        };
        camera.validate()?;
        Ok(camera)
    }

    pub fn with_up(mut self, up: DVec3) -> Self {
        self.up = up;
        self
    }

    pub fn validate(&self) -> ReliefResult<()> {
        if !(self.position.is_finite() && self.target.is_finite() && self.up.is_finite()) {
            return Err(ReliefError::validation("camera components must be finite"));
        }
        if !(self.fov_degrees > 0.0 && self.fov_degrees < 180.0) {
            return Err(ReliefError::validation(format!(
                "camera fov {} outside (0, 180)",
                self.fov_degrees
            )));
        }
        Ok(())
    }

    pub fn is_degenerate(&self) -> bool {
        (self.target - self.position).length() <= DEGENERATE_EPSILON
    }

    /// Right-handed view matrix. Falls back to another up axis when `up` is
    /// parallel to the view direction.
    pub fn view_matrix(&self) -> ReliefResult<DMat4> {
        if self.is_degenerate() {
            return Err(ReliefError::render(format!(
                "camera target {:?} coincides with its position",
                self.target
            )));
        }
        let forward = (self.target - self.position).normalize();
        let mut up = self.up.normalize_or_zero();
        if up == DVec3::ZERO || forward.cross(up).length() < 1e-6 {
            up = if forward.cross(DVec3::Z).length() < 1e-6 {
                DVec3::X
            } else {
                DVec3::Z
            };
        }
        Ok(DMat4::look_at_rh(self.position, self.target, up))
    }

    pub fn projection_matrix(&self, aspect: f64, near: f64, far: f64) -> DMat4 {
        DMat4::perspective_rh(self.fov_degrees.to_radians(), aspect, near, far)
    }
}
