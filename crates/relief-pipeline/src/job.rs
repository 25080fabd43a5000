//! Handles to queued and running stage jobs.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use relief_core::CancelToken;
use relief_scene::{
    BlobRef, ExportJobId, FailureInfo, MeshId, ProjectId, ProjectStatus, SceneId, SegmentId,
    Stage,
};
use serde::{Deserialize, Serialize};

/// What a completed stage produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageResult {
    Segmentation {
        segments: Vec<SegmentId>,
    },
    Reconstruction {
        meshes: Vec<MeshId>,
        /// Segments that failed while the rest were kept.
        skipped: Vec<SkippedSegment>,
    },
    Composition {
        scene: SceneId,
    },
    Render {
        export_job: ExportJobId,
        artifact: BlobRef,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSegment {
    pub segment: SegmentId,
    pub error: FailureInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub project_id: ProjectId,
    pub stage: Stage,
    pub status: ProjectStatus,
    /// True when the stage had already completed and nothing ran.
    pub reused: bool,
    pub result: StageResult,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Queued,
    Running,
    Succeeded(StageOutcome),
    Failed(FailureInfo),
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded(_) | JobState::Failed(_) | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded(_) => "succeeded",
            JobState::Failed(_) => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

struct JobInner {
    id: String,
    project_id: ProjectId,
    stage: Stage,
    cancel: CancelToken,
    state: Mutex<JobState>,
    changed: Condvar,
}

/// Shared handle to a stage job. Clones observe the same job.
#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<JobInner>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.inner.id)
            .field("project_id", &self.inner.project_id)
            .field("stage", &self.inner.stage)
            .field("state", &self.state().as_str())
            .finish()
    }
}

impl JobHandle {
    pub(crate) fn new(project_id: ProjectId, stage: Stage) -> Self {
        Self {
            inner: Arc::new(JobInner {
                id: uuid::Uuid::new_v4().to_string(),
                project_id,
                stage,
                cancel: CancelToken::new(),
                state: Mutex::new(JobState::Queued),
                changed: Condvar::new(),
            }),
        }
    }

    /// A job that completed without running, e.g. an already finished stage.
    pub(crate) fn completed(outcome: StageOutcome) -> Self {
        let handle = Self::new(outcome.project_id.clone(), outcome.stage);
        handle.set_state(JobState::Succeeded(outcome));
        handle
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.inner.project_id
    }

    pub fn stage(&self) -> Stage {
        self.inner.stage
    }

    pub fn state(&self) -> JobState {
        self.inner.state.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().is_terminal()
    }

    /// Ask the job to stop. It observes the request at its next checkpoint
    /// and discards any partial output.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_same(&self, other: &JobHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn cancel_token(&self) -> CancelToken {
        self.inner.cancel.clone()
    }

    pub(crate) fn set_state(&self, state: JobState) {
        let mut guard = self.inner.state.lock();
        if guard.is_terminal() {
            return;
        }
        *guard = state;
        self.inner.changed.notify_all();
    }

    /// Block until the job reaches a terminal state.
    pub fn wait(&self) -> JobState {
        let mut guard = self.inner.state.lock();
        while !guard.is_terminal() {
            self.inner.changed.wait(&mut guard);
        }
        guard.clone()
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobState> {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.inner.state.lock();
        while !guard.is_terminal() {
            if self.inner.changed.wait_until(&mut guard, deadline).timed_out() {
                return guard.is_terminal().then(|| guard.clone());
            }
        }
        Some(guard.clone())
    }

    /// Wait and flatten the terminal state into a result.
    pub fn join(&self) -> Result<StageOutcome, FailureInfo> {
        match self.wait() {
            JobState::Succeeded(outcome) => Ok(outcome),
            JobState::Failed(info) => Err(info),
            _ => Err(FailureInfo {
                kind: relief_core::ErrorKind::Cancelled,
                message: format!("{} job for project {} was cancelled", self.stage(), self.project_id()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> StageOutcome {
        StageOutcome {
            project_id: ProjectId::new("p"),
            stage: Stage::Composition,
            status: ProjectStatus::Composed,
            reused: false,
            result: StageResult::Composition {
                scene: SceneId::new("s"),
            },
        }
    }

    #[test]
    fn test_wait_returns_terminal_state_from_other_thread() {
        let job = JobHandle::new(ProjectId::new("p"), Stage::Composition);
        let worker = job.clone();
        let t = std::thread::spawn(move || {
            worker.set_state(JobState::Running);
            worker.set_state(JobState::Succeeded(outcome()));
        });
        assert_eq!(job.join().unwrap(), outcome());
        t.join().unwrap();
    }

    #[test]
    fn test_terminal_state_is_final() {
        let job = JobHandle::new(ProjectId::new("p"), Stage::Render);
        job.set_state(JobState::Cancelled);
        job.set_state(JobState::Running);
        assert_eq!(job.state(), JobState::Cancelled);
        assert_eq!(job.join().unwrap_err().kind, relief_core::ErrorKind::Cancelled);
    }

    #[test]
    fn test_wait_timeout_on_queued_job() {
        let job = JobHandle::new(ProjectId::new("p"), Stage::Segmentation);
        assert!(job.wait_timeout(Duration::from_millis(5)).is_none());
        job.cancel();
        assert!(job.cancel_token().is_cancelled());
    }

    #[test]
    fn test_outcome_serializes_with_stage_tag() {
        let json = serde_json::to_value(outcome()).unwrap();
        assert_eq!(json["result"]["stage"], "composition");
        assert_eq!(json["status"], "composed");
    }
}
