use serde::{Deserialize, Serialize};

/// Container family of an export artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Infinitely looping animated image (GIF).
    LoopImage,
    /// Timestamped video stream.
    Video,
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat::LoopImage
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::LoopImage => write!(f, "loop-image"),
            ExportFormat::Video => write!(f, "video"),
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = crate::ReliefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "loop-image" | "loop_image" | "gif" => Ok(ExportFormat::LoopImage),
            "video" | "mjpeg" | "mp4" => Ok(ExportFormat::Video),
            other => Err(crate::ReliefError::encoding(format!(
                "unsupported export format '{}'",
                other
            ))),
        }
    }
}

/// Encoder used for [`ExportFormat::Video`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoBackend {
    /// Pure-Rust Motion-JPEG stream inside the Relief artifact container.
    MotionJpeg,
    /// H.264 MP4 produced by a system `ffmpeg` binary.
    Ffmpeg,
}

impl Default for VideoBackend {
    fn default() -> Self {
        VideoBackend::MotionJpeg
    }
}
