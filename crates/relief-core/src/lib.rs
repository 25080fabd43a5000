//! # relief-core
//!
//! Core types and primitives for the Relief image-to-3D pipeline.
//! Shared by every Relief crate: frame buffers, colors, timestamps, 3D
//! transforms, content hashing, configuration and the error taxonomy.

pub mod cancel;
pub mod color;
pub mod config;
pub mod error;
pub mod frame;
pub mod hash;
pub mod math;
pub mod time;
pub mod types;

pub use config::*;

pub use cancel::CancelToken;
pub use color::Color;
pub use error::{ErrorKind, ReliefError, ReliefResult};
pub use frame::{FrameBuffer, PixelFormat};
pub use math::{Bounds3, Transform3D};
pub use time::Timestamp;
pub use types::{ExportFormat, VideoBackend};
