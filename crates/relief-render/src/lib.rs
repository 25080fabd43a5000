//! # relief-render
//!
//! CPU rasterizer for Relief scenes. Projects every placed mesh through a
//! camera trajectory and produces an ordered sequence of RGBA frames with
//! depth-buffered, Lambert-shaded, perspective-correct textured triangles.

pub mod assets;
pub mod raster;
pub mod renderer;
pub mod settings;

pub use assets::{MeshResource, SceneAssets};
pub use renderer::{FrameSequence, RenderOutput, Renderer};
pub use settings::RenderSettings;
