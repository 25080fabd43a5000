use chrono::{DateTime, Utc};
use glam::DVec3;
use relief_core::{ExportFormat, ReliefError, ReliefResult};
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::ids::{BlobRef, ExportJobId, SceneId};

/// N evenly spaced samples of a full orbit around `pivot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrbitSpec {
    pub pivot: DVec3,
    pub radius: f64,
    /// Camera height above the pivot.
    pub height: f64,
    pub samples: u32,
    /// Angle of the first sample; 0 places the camera on the pivot's +Z side.
    pub start_angle_degrees: f64,
    pub fov_degrees: f64,
}

/// How the camera moves during an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trajectory {
    Orbit(OrbitSpec),
    Poses { cameras: Vec<Camera> },
}

impl Trajectory {
    pub fn orbit(pivot: DVec3, radius: f64, height: f64, samples: u32, fov_degrees: f64) -> Self {
        Trajectory::Orbit(OrbitSpec {
            pivot,
            radius,
            height,
            samples,
            start_angle_degrees: 0.0,
            fov_degrees,
        })
    }

    pub fn len(&self) -> usize {
        match self {
            Trajectory::Orbit(o) => o.samples as usize,
            Trajectory::Poses { cameras } => cameras.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Camera for every sample, in trajectory order.
    pub fn poses(&self) -> ReliefResult<Vec<Camera>> {
        let poses = match self {
            Trajectory::Orbit(o) => {
                if !(o.radius.is_finite() && o.radius >= 0.0) {
                    return Err(ReliefError::validation(format!(
                        "orbit radius {} must be finite and non-negative",
                        o.radius
                    )));
                }
                if !(o.height.is_finite() && o.start_angle_degrees.is_finite()) {
                    return Err(ReliefError::validation("orbit parameters must be finite"));
                }
                let n = o.samples.max(1) as f64;
                (0..o.samples)
                    .map(|i| {
                        let theta =
                            o.start_angle_degrees.to_radians() + std::f64::consts::TAU * i as f64 / n;
                        let offset =
                            DVec3::new(o.radius * theta.sin(), o.height, o.radius * theta.cos());
                        Camera::new(o.pivot + offset, o.pivot, o.fov_degrees)
                    })
                    .collect::<ReliefResult<Vec<_>>>()?
            }
            Trajectory::Poses { cameras } => {
                for c in cameras {
                    c.validate()?;
                }
                cameras.clone()
            }
        };
        if poses.is_empty() {
            return Err(ReliefError::validation("trajectory has no samples"));
        }
        Ok(poses)
    }
}

/// Requested output of an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    pub format: ExportFormat,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub trajectory: Trajectory,
}

/// One export of a scene and its resulting artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: ExportJobId,
    pub scene_id: SceneId,
    pub settings: ExportSettings,
    pub artifact: Option<BlobRef>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExportJob {
    pub fn new(scene_id: SceneId, settings: ExportSettings) -> Self {
        Self {
            id: ExportJobId::generate(),
            scene_id,
            settings,
            artifact: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn complete(&mut self, artifact: BlobRef) {
        self.artifact = Some(artifact);
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orbit_yields_samples_in_order() {
        let t = Trajectory::orbit(DVec3::ZERO, 2.0, 0.5, 4, 50.0);
        let poses = t.poses().unwrap();
        assert_eq!(poses.len(), 4);
        assert!((poses[0].position - DVec3::new(0.0, 0.5, 2.0)).length() < 1e-12);
        assert!((poses[1].position - DVec3::new(2.0, 0.5, 0.0)).length() < 1e-12);
        assert!((poses[2].position - DVec3::new(0.0, 0.5, -2.0)).length() < 1e-12);
        for p in &poses {
            assert_eq!(p.target, DVec3::ZERO);
        }
    }

    #[test]
    fn test_orbit_start_angle() {
        let mut spec = OrbitSpec {
            pivot: DVec3::ZERO,
            radius: 1.0,
            height: 0.0,
            samples: 1,
            start_angle_degrees: 90.0,
            fov_degrees: 50.0,
        };
        let poses = Trajectory::Orbit(spec.clone()).poses().unwrap();
        assert!((poses[0].position - DVec3::X).length() < 1e-12);
        spec.radius = -1.0;
        assert!(Trajectory::Orbit(spec).poses().is_err());
    }

    #[test]
    fn test_empty_trajectory_rejected() {
        assert!(Trajectory::orbit(DVec3::ZERO, 1.0, 0.0, 0, 50.0).poses().is_err());
        assert!(Trajectory::Poses { cameras: vec![] }.poses().is_err());
    }

    #[test]
    fn test_export_job_completion() {
        let settings = ExportSettings {
            format: ExportFormat::LoopImage,
            width: 64,
            height: 64,
            fps: 12.0,
            trajectory: Trajectory::orbit(DVec3::ZERO, 2.0, 0.0, 12, 50.0),
        };
        let mut job = ExportJob::new(SceneId::new("s"), settings);
        assert!(job.artifact.is_none());
        job.complete(BlobRef::for_bytes(b"artifact"));
        assert!(job.completed_at.is_some());
        let json = serde_json::to_string(&job).unwrap();
        let back: ExportJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.settings, job.settings);
    }
}
