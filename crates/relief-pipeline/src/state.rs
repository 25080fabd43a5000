//! The per-project stage state machine.

use relief_core::{ReliefError, ReliefResult};
use relief_scene::{Project, ProjectStatus, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePlan {
    /// Prerequisites are met; run the stage.
    Run,
    /// The stage failed last time; run it again.
    Retry,
    /// The stage already completed; return its existing result.
    AlreadyDone,
}

/// Decide what requesting `stage` means for `project` in its current status.
/// Requests that would skip a stage are rejected.
pub fn plan(project: &Project, stage: Stage) -> ReliefResult<StagePlan> {
    if project.status == ProjectStatus::Failed {
        let failed = project.failed_stage.ok_or_else(|| {
            ReliefError::validation(format!("project {} failed without a stage", project.id))
        })?;
        return match stage.cmp(&failed) {
            std::cmp::Ordering::Equal => Ok(StagePlan::Retry),
            std::cmp::Ordering::Less => Ok(StagePlan::AlreadyDone),
            std::cmp::Ordering::Greater => Err(ReliefError::validation(format!(
                "cannot run {} for project {}: {} failed and must be retried first",
                stage, project.id, failed
            ))),
        };
    }

    let rank = |s: ProjectStatus| s.rank().unwrap_or(0);
    let current = rank(project.status);
    if current >= rank(stage.produces()) {
        Ok(StagePlan::AlreadyDone)
    } else if current == rank(stage.requires()) {
        Ok(StagePlan::Run)
    } else {
        Err(ReliefError::validation(format!(
            "cannot run {} for project {}: it requires status {}, project is {}",
            stage,
            project.id,
            stage.requires(),
            project.status
        )))
    }
}
