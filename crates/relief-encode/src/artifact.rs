use relief_core::{ExportFormat, ReliefError, ReliefResult, Timestamp};
use serde::{Deserialize, Serialize};

/// Leading bytes of every artifact.
pub const MAGIC: &[u8; 4] = b"RLFA";
pub const CONTAINER_VERSION: u16 = 1;

/// Codec of an artifact payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    /// Animated GIF, infinite loop.
    Gif,
    /// Concatenated baseline JPEG frames.
    Mjpeg,
    /// H.264 in an MP4 container.
    H264,
}

/// Self-describing header of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub format: ExportFormat,
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
    /// `frame_count / fps` seconds.
    pub duration_seconds: f64,
    /// Presentation time of frame `i`: `i / fps` seconds.
    pub timestamps: Vec<f64>,
    /// Byte length of each frame in the payload (Motion-JPEG only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frame_sizes: Vec<u64>,
}

impl ArtifactMetadata {
    pub fn new(format: ExportFormat, codec: Codec, width: u32, height: u32, fps: f64, frame_count: u64) -> Self {
        Self {
            format,
            codec,
            width,
            height,
            fps,
            frame_count,
            duration_seconds: frame_count as f64 / fps,
            timestamps: (0..frame_count).map(|i| i as f64 / fps).collect(),
            frame_sizes: Vec::new(),
        }
    }

    pub fn timestamp(&self, index: u64) -> Option<Timestamp> {
        self.timestamps
            .get(index as usize)
            .map(|s| Timestamp::from_seconds(*s))
    }
}

/// An encoded export: metadata plus the codec payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub metadata: ArtifactMetadata,
    pub payload: Vec<u8>,
}

impl Artifact {
    /// `MAGIC | version u16 LE | metadata length u32 LE | metadata JSON | payload`.
    pub fn to_bytes(&self) -> ReliefResult<Vec<u8>> {
        let meta = serde_json::to_vec(&self.metadata)?;
        let meta_len = u32::try_from(meta.len())
            .map_err(|_| ReliefError::encoding("artifact metadata too large"))?;
        let mut out = Vec::with_capacity(10 + meta.len() + self.payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&CONTAINER_VERSION.to_le_bytes());
        out.extend_from_slice(&meta_len.to_le_bytes());
        out.extend_from_slice(&meta);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> ReliefResult<Self> {
        if bytes.len() < 10 || &bytes[..4] != MAGIC {
            return Err(ReliefError::encoding("not a relief artifact"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != CONTAINER_VERSION {
            return Err(ReliefError::encoding(format!(
                "unsupported artifact version {}",
                version
            )));
        }
        let meta_len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        let meta_end = 10usize
            .checked_add(meta_len)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| ReliefError::encoding("truncated artifact metadata"))?;
        let metadata: ArtifactMetadata = serde_json::from_slice(&bytes[10..meta_end])?;
        Ok(Self {
            metadata,
            payload: bytes[meta_end..].to_vec(),
        })
    }

    pub fn duration_seconds(&self) -> f64 {
        self.metadata.duration_seconds
    }

    /// Split a Motion-JPEG payload into its frames.
    pub fn mjpeg_frames(&self) -> ReliefResult<Vec<&[u8]>> {
        if self.metadata.codec != Codec::Mjpeg {
            return Err(ReliefError::encoding(format!(
                "{:?} artifacts have no per-frame payloads",
                self.metadata.codec
            )));
        }
        let mut frames = Vec::with_capacity(self.metadata.frame_sizes.len());
        let mut offset = 0usize;
        for size in &self.metadata.frame_sizes {
            let end = offset + *size as usize;
            let frame = self
                .payload
                .get(offset..end)
                .ok_or_else(|| ReliefError::encoding("frame table exceeds payload"))?;
            frames.push(frame);
            offset = end;
        }
        Ok(frames)
    }
}
