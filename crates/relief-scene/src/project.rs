use chrono::{DateTime, Utc};
use relief_core::{ErrorKind, ReliefError, ReliefResult};
use serde::{Deserialize, Serialize};

use crate::ids::{BlobRef, ProjectId, UserId};

/// Lifecycle of a project through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Uploaded,
    Segmented,
    Reconstructed,
    Composed,
    Exported,
    Failed,
}

impl ProjectStatus {
    /// Position along the happy path; `Failed` has none.
    pub fn rank(&self) -> Option<u8> {
        match self {
            ProjectStatus::Uploaded => Some(0),
            ProjectStatus::Segmented => Some(1),
            ProjectStatus::Reconstructed => Some(2),
            ProjectStatus::Composed => Some(3),
            ProjectStatus::Exported => Some(4),
            ProjectStatus::Failed => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Uploaded => "uploaded",
            ProjectStatus::Segmented => "segmented",
            ProjectStatus::Reconstructed => "reconstructed",
            ProjectStatus::Composed => "composed",
            ProjectStatus::Exported => "exported",
            ProjectStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline stage. Each stage moves the project exactly one status forward.
///
/// `Render` is the export stage: it renders the trajectory and encodes the
/// artifact, producing `exported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Segmentation,
    Reconstruction,
    Composition,
    Render,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Segmentation,
        Stage::Reconstruction,
        Stage::Composition,
        Stage::Render,
    ];

    /// Status the project must be in for this stage to run.
    pub fn requires(&self) -> ProjectStatus {
        match self {
            Stage::Segmentation => ProjectStatus::Uploaded,
            Stage::Reconstruction => ProjectStatus::Segmented,
            Stage::Composition => ProjectStatus::Reconstructed,
            Stage::Render => ProjectStatus::Composed,
        }
    }

    /// Status the project reaches when this stage completes.
    pub fn produces(&self) -> ProjectStatus {
        match self {
            Stage::Segmentation => ProjectStatus::Segmented,
            Stage::Reconstruction => ProjectStatus::Reconstructed,
            Stage::Composition => ProjectStatus::Composed,
            Stage::Render => ProjectStatus::Exported,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Segmentation => "segmentation",
            Stage::Reconstruction => "reconstruction",
            Stage::Composition => "composition",
            Stage::Render => "render",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = ReliefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "segmentation" | "segment" => Ok(Stage::Segmentation),
            "reconstruction" | "reconstruct" => Ok(Stage::Reconstruction),
            "composition" | "compose" => Ok(Stage::Composition),
            "render" | "export" => Ok(Stage::Render),
            other => Err(ReliefError::validation(format!("unknown stage '{}'", other))),
        }
    }
}

/// The error recorded on a failed project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl FailureInfo {
    pub fn from_error(err: &ReliefError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// A user's image-to-3D project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub owner: UserId,
    pub status: ProjectStatus,
    /// Set while `status == Failed`.
    pub failed_stage: Option<Stage>,
    pub last_error: Option<FailureInfo>,
    /// Source images, in upload order.
    pub source_images: Vec<BlobRef>,
    /// Metadata version for optimistic updates.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(owner: UserId, source_images: Vec<BlobRef>) -> ReliefResult<Self> {
        if source_images.is_empty() {
            return Err(ReliefError::validation(
                "a project needs at least one source image",
            ));
        }
        let now = Utc::now();
        Ok(Self {
            id: ProjectId::generate(),
            owner,
            status: ProjectStatus::Uploaded,
            failed_stage: None,
            last_error: None,
            source_images,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Record a successful stage.
    pub fn advance(&mut self, stage: Stage) {
        self.status = stage.produces();
        self.failed_stage = None;
        self.last_error = None;
        self.updated_at = Utc::now();
    }

    /// Move to `failed`, tagged with the stage that failed.
    pub fn fail(&mut self, stage: Stage, err: &ReliefError) {
        self.status = ProjectStatus::Failed;
        self.failed_stage = Some(stage);
        self.last_error = Some(FailureInfo::from_error(err));
        self.updated_at = Utc::now();
    }

    /// The status the project was in before entering its current stage.
    /// For a failed project this is the status preceding the failed stage.
    pub fn effective_status(&self) -> ProjectStatus {
        match (self.status, self.failed_stage) {
            (ProjectStatus::Failed, Some(stage)) => stage.requires(),
            (status, _) => status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        Project::new(UserId::new("u1"), vec![BlobRef::for_bytes(b"img")]).unwrap()
    }

    #[test]
    fn test_new_project_is_uploaded() {
        let p = project();
        assert_eq!(p.status, ProjectStatus::Uploaded);
        assert_eq!(p.version, 0);
        assert!(p.failed_stage.is_none());
    }

    #[test]
    fn test_project_requires_source_image() {
        let err = Project::new(UserId::new("u1"), vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_stage_chain_is_contiguous() {
        for pair in Stage::ALL.windows(2) {
            assert_eq!(pair[0].produces(), pair[1].requires());
        }
    }

    #[test]
    fn test_fail_and_effective_status() {
        let mut p = project();
        p.advance(Stage::Segmentation);
        p.advance(Stage::Reconstruction);
        p.advance(Stage::Composition);
        p.fail(Stage::Render, &ReliefError::render("degenerate camera"));
        assert_eq!(p.status, ProjectStatus::Failed);
        assert_eq!(p.failed_stage, Some(Stage::Render));
        assert_eq!(p.failed_stage.unwrap().to_string(), "render");
        assert_eq!(p.effective_status(), ProjectStatus::Composed);
        assert_eq!(p.last_error.as_ref().unwrap().kind, ErrorKind::Render);
    }

    #[test]
    fn test_stage_from_str_aliases() {
        assert_eq!("export".parse::<Stage>().unwrap(), Stage::Render);
        assert_eq!("reconstruct".parse::<Stage>().unwrap(), Stage::Reconstruction);
        assert!("paint".parse::<Stage>().is_err());
    }
}
