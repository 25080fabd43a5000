//! # relief-mesh
//!
//! Depth-map reconstruction. Turns a per-pixel depth map, a soft
//! segmentation mask and the source image into a UV-mapped triangle mesh.

pub mod builder;
pub mod cleanup;
pub mod decimate;
pub mod export;
pub mod outlier;
pub mod raster;

pub use builder::{BuiltMesh, MeshBuilder};
pub use cleanup::{cleanup, CleanupReport};
pub use decimate::decimate;
pub use export::{to_obj, to_ply, write_mesh, MeshFormat};
pub use outlier::remove_outliers;
pub use raster::{DepthMap, Intrinsics, Mask};
