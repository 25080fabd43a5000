//! # relief-encode
//!
//! Streaming frame encoders. Frames are pushed one at a time and sealed into
//! a self-describing artifact: an infinitely looping GIF, a Motion-JPEG
//! stream, or H.264 MP4 through a system FFmpeg.

pub mod artifact;
pub mod encoder;
pub mod ffmpeg;
pub mod gif;
pub mod mjpeg;

pub use artifact::{Artifact, ArtifactMetadata, Codec};
pub use encoder::{create_encoder, encode_stream, EncodeSettings, FrameEncoder};
pub use ffmpeg::FfmpegEncoder;
pub use gif::{gif_delay_centiseconds, posterize, GifLoopEncoder};
pub use mjpeg::MotionJpegEncoder;
