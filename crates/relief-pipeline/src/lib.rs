//! # relief-pipeline
//!
//! Per-project orchestration of the Relief pipeline. Source images move
//! through segmentation, reconstruction, composition and export as
//! background jobs on a bounded worker pool, with retries for external
//! services, cooperative cancellation and optimistic scene edits.

pub mod job;
pub mod orchestrator;
pub mod pool;
pub mod providers;
pub mod retry;
pub mod state;
pub mod store;

pub use job::{JobHandle, JobState, SkippedSegment, StageOutcome, StageResult};
pub use orchestrator::{
    ExportRequest, PipelineOrchestrator, ProjectReport, Services, TrajectoryRequest,
};
pub use pool::WorkerPool;
pub use providers::{
    AlphaSegmenter, CaptionService, CaptionSuggestion, DepthProvider, SceneContext,
    SegmentProposal, SegmentationProvider, StaticDepth,
};
pub use retry::RetryPolicy;
pub use state::{plan, StagePlan};
pub use store::{BlobStore, FsBlobStore, InMemoryBlobStore, InMemoryMetadataStore, MetadataStore};
