//! # relief-scene
//!
//! The Relief data model. Projects own segments and scenes; segments yield
//! immutable, versioned mesh assets; scenes place those meshes in an
//! arena-backed object graph that the transform engine edits.

pub mod camera;
pub mod export;
pub mod graph;
pub mod ids;
pub mod keyframe;
pub mod mesh;
pub mod project;
pub mod scene;
pub mod segment;
pub mod transform;

pub use camera::Camera;
pub use export::{ExportJob, ExportSettings, OrbitSpec, Trajectory};
pub use graph::{ObjectId, SceneGraph, SceneObject};
pub use ids::{BlobRef, ExportJobId, MeshId, ProjectId, SceneId, SegmentId, UserId};
pub use keyframe::{Keyframe, KeyframeTrack};
pub use mesh::{MeshAsset, MeshGeometry, MeshStats};
pub use project::{FailureInfo, Project, ProjectStatus, Stage};
pub use scene::Scene;
pub use segment::{BoundingBox, Segment};
pub use transform::{TransformEdit, TransformEngine};
