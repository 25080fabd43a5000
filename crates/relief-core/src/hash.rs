//! Content hashing for deterministic output verification.
//!
//! SHA-256 digests over frame buffers, byte blobs and mesh buffers. Used for
//! content-addressed blob references and bit-exact determinism checks.

use sha2::{Digest, Sha256};

use crate::frame::FrameBuffer;

/// A content hash digest (SHA-256, 32 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash {
    bytes: [u8; 32],
}

impl ContentHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental hasher for composite values (meshes, frame sequences).
#[derive(Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(bytes);
        self
    }

    pub fn update_u64(&mut self, v: u64) -> &mut Self {
        self.inner.update(v.to_le_bytes());
        self
    }

    pub fn update_f64(&mut self, v: f64) -> &mut Self {
        self.inner.update(v.to_bits().to_le_bytes());
        self
    }

    pub fn update_frame(&mut self, frame: &FrameBuffer) -> &mut Self {
        // Dimensions and format participate so equal pixel data at different
        // sizes hashes differently.
        self.inner.update(frame.width.to_le_bytes());
        self.inner.update(frame.height.to_le_bytes());
        self.inner.update([frame.format as u8]);
        self.inner.update(&frame.data);
        self
    }

    pub fn finish(self) -> ContentHash {
        let result = self.inner.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        ContentHash::from_bytes(bytes)
    }
}

/// Hash an arbitrary byte slice.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    let mut hasher = ContentHasher::new();
    hasher.update(data);
    hasher.finish()
}

/// Compute the content hash of a single frame buffer.
pub fn hash_frame(frame: &FrameBuffer) -> ContentHash {
    let mut hasher = ContentHasher::new();
    hasher.update_frame(frame);
    hasher.finish()
}

/// Compute the content hash of a sequence of frames.
pub fn hash_frames(frames: &[FrameBuffer]) -> ContentHash {
    let mut hasher = ContentHasher::new();
    hasher.update_u64(frames.len() as u64);
    for frame in frames {
        hasher.update_frame(frame);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Color;

    #[test]
    fn test_hash_deterministic() {
        let frame1 = FrameBuffer::solid(10, 10, &Color::RED);
        let frame2 = FrameBuffer::solid(10, 10, &Color::RED);
        assert_eq!(hash_frame(&frame1), hash_frame(&frame2));
    }

    #[test]
    fn test_hash_different_size() {
        let frame1 = FrameBuffer::solid(10, 10, &Color::RED);
        let frame2 = FrameBuffer::solid(20, 5, &Color::RED);
        assert_ne!(hash_frame(&frame1), hash_frame(&frame2));
    }

    #[test]
    fn test_hash_sequence_order_matters() {
        let a = FrameBuffer::solid(4, 4, &Color::RED);
        let b = FrameBuffer::solid(4, 4, &Color::GREEN);
        assert_ne!(
            hash_frames(&[a.clone(), b.clone()]),
            hash_frames(&[b, a])
        );
    }

    #[test]
    fn test_hash_hex_format() {
        let hex = hash_bytes(b"relief").to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
