use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Fresh random (UUID v4) identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a project.
    ProjectId
);
define_id!(
    /// Identifier of the user owning a project.
    UserId
);
define_id!(
    /// Unique identifier for a segment.
    SegmentId
);
define_id!(
    /// Unique identifier for a mesh asset version.
    MeshId
);
define_id!(
    /// Unique identifier for a scene.
    SceneId
);
define_id!(
    /// Unique identifier for an export job.
    ExportJobId
);

/// Content-addressed reference into the blob store (SHA-256 hex of the bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobRef(pub String);

impl BlobRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The reference a blob store assigns to `bytes`.
    pub fn for_bytes(bytes: &[u8]) -> Self {
        Self(relief_core::hash::hash_bytes(bytes).to_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
