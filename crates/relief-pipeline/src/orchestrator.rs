//! The per-project pipeline: segmentation, reconstruction, composition and
//! export as background jobs on a shared worker pool.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use glam::DVec3;
use parking_lot::Mutex;
use rayon::prelude::*;
use relief_core::{
    Bounds3, CancelToken, ErrorKind, ExportFormat, FrameBuffer, ReliefConfig, ReliefError,
    ReliefResult,
};
use relief_encode::{encode_stream, Artifact, EncodeSettings};
use relief_mesh::{BuiltMesh, DepthMap, Mask, MeshBuilder};
use relief_render::{Renderer, RenderSettings, SceneAssets};
use relief_scene::{
    BlobRef, Camera, ExportJob, ExportSettings, FailureInfo, MeshAsset, MeshId, ObjectId,
    Project, ProjectId, ProjectStatus, Scene, SceneId, SceneObject, Segment, Stage,
    Trajectory, TransformEdit, TransformEngine, UserId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::job::{JobHandle, JobState, SkippedSegment, StageOutcome, StageResult};
use crate::pool::WorkerPool;
use crate::providers::{
    CaptionService, CaptionSuggestion, DepthProvider, SceneContext, SegmentationProvider,
};
use crate::retry::RetryPolicy;
use crate::state::{self, StagePlan};
use crate::store::{BlobStore, InMemoryBlobStore, InMemoryMetadataStore, MetadataStore};

/// Attempts at a read-modify-write of a project record before giving up.
const STATUS_COMMIT_ATTEMPTS: usize = 8;

/// External collaborators injected into the orchestrator.
#[derive(Clone)]
pub struct Services {
    pub segmentation: Arc<dyn SegmentationProvider>,
    pub depth: Arc<dyn DepthProvider>,
    pub captions: Option<Arc<dyn CaptionService>>,
    pub blobs: Arc<dyn BlobStore>,
    pub metadata: Arc<dyn MetadataStore>,
}

impl Services {
    /// Providers backed by in-memory stores.
    pub fn in_memory(
        segmentation: Arc<dyn SegmentationProvider>,
        depth: Arc<dyn DepthProvider>,
    ) -> Self {
        Self {
            segmentation,
            depth,
            captions: None,
            blobs: Arc::new(InMemoryBlobStore::new()),
            metadata: Arc::new(InMemoryMetadataStore::new()),
        }
    }

    pub fn with_captions(mut self, captions: Arc<dyn CaptionService>) -> Self {
        self.captions = Some(captions);
        self
    }

    pub fn with_blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = blobs;
        self
    }
}

/// Where the export camera goes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrajectoryRequest {
    /// Orbit the scene's bounds using the `[pipeline]` orbit settings.
    #[default]
    DefaultOrbit,
    /// A single frame from the scene's own camera.
    SceneCamera,
    Custom { trajectory: Trajectory },
}

/// Export parameters; unset fields fall back to the configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub format: Option<ExportFormat>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub trajectory: TrajectoryRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectReport {
    pub project_id: ProjectId,
    pub status: ProjectStatus,
    pub failed_stage: Option<Stage>,
    pub last_error: Option<FailureInfo>,
    /// Stages with a queued or running job.
    pub active: Vec<Stage>,
}

struct Inner {
    config: ReliefConfig,
    services: Services,
    pool: WorkerPool,
    retry: RetryPolicy,
    engine: TransformEngine,
    builder: MeshBuilder,
    jobs: Mutex<HashMap<(ProjectId, Stage), JobHandle>>,
}

/// Runs project stages in order, one active job per (project, stage).
#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("pool", &self.inner.pool)
            .field("jobs", &self.inner.jobs.lock().len())
            .finish()
    }
}

impl PipelineOrchestrator {
    /// Validate `config`, load every provider and start the worker pool.
    pub fn new(config: ReliefConfig, services: Services) -> ReliefResult<Self> {
        config.validate()?;
        services.segmentation.load()?;
        services.depth.load()?;
        if let Some(captions) = &services.captions {
            captions.load()?;
        }
        let pool = WorkerPool::new(config.pipeline.worker_threads)?;
        info!(
            threads = pool.threads(),
            segmentation = services.segmentation.name(),
            depth = services.depth.name(),
            "pipeline started"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                retry: RetryPolicy::from_config(&config.retry),
                engine: TransformEngine::new(&config.transform),
                builder: MeshBuilder::new(config.mesh.clone()),
                jobs: Mutex::new(HashMap::new()),
                pool,
                services,
                config,
            }),
        })
    }

    pub fn config(&self) -> &ReliefConfig {
        &self.inner.config
    }

    pub fn services(&self) -> &Services {
        &self.inner.services
    }

    /// Store the source images and create a project in `uploaded`.
    pub fn create_project(&self, owner: UserId, images: &[Vec<u8>]) -> ReliefResult<Project> {
        let mut refs = Vec::with_capacity(images.len());
        for (i, bytes) in images.iter().enumerate() {
            FrameBuffer::decode(bytes).map_err(|e| {
                ReliefError::validation(format!("source image {} is not a readable image: {}", i, e))
            })?;
            refs.push(self.inner.services.blobs.put(bytes)?);
        }
        let project = Project::new(owner, refs)?;
        self.inner.services.metadata.create_project(project.clone())?;
        info!(project = %project.id, images = images.len(), "project created");
        Ok(project)
    }

    pub fn get_project(&self, id: &ProjectId) -> ReliefResult<Project> {
        self.inner.services.metadata.get_project(id)
    }

    /// Request `stage`. Returns the in-flight job if one exists, a completed
    /// handle with the existing result if the stage already ran, or a new
    /// queued job. Export uses the configured defaults.
    pub fn enqueue_stage(&self, project_id: &ProjectId, stage: Stage) -> ReliefResult<JobHandle> {
        self.enqueue(project_id, stage, ExportRequest::default())
    }

    /// Request the export stage with explicit parameters.
    pub fn enqueue_export(
        &self,
        project_id: &ProjectId,
        request: ExportRequest,
    ) -> ReliefResult<JobHandle> {
        self.enqueue(project_id, Stage::Render, request)
    }

    fn enqueue(
        &self,
        project_id: &ProjectId,
        stage: Stage,
        request: ExportRequest,
    ) -> ReliefResult<JobHandle> {
        let mut jobs = self.inner.jobs.lock();
        let key = (project_id.clone(), stage);
        if let Some(existing) = jobs.get(&key) {
            if !existing.is_finished() {
                debug!(project = %project_id, stage = %stage, job = existing.id(), "joining in-flight job");
                return Ok(existing.clone());
            }
        }

        let project = self.inner.services.metadata.get_project(project_id)?;
        match state::plan(&project, stage)? {
            StagePlan::AlreadyDone => {
                let outcome = self.inner.existing_outcome(&project, stage)?;
                debug!(project = %project_id, stage = %stage, "stage already complete");
                return Ok(JobHandle::completed(outcome));
            }
            StagePlan::Retry => {
                info!(project = %project_id, stage = %stage, "retrying failed stage");
            }
            StagePlan::Run => {}
        }

        let handle = JobHandle::new(project_id.clone(), stage);
        jobs.insert(key, handle.clone());
        drop(jobs);

        let inner = Arc::clone(&self.inner);
        let job = handle.clone();
        self.inner.pool.spawn(move || inner.execute(job, request));
        info!(project = %project_id, stage = %stage, job = handle.id(), "stage queued");
        Ok(handle)
    }

    pub fn get_status(&self, project_id: &ProjectId) -> ReliefResult<ProjectReport> {
        let project = self.inner.services.metadata.get_project(project_id)?;
        let mut active: Vec<Stage> = self
            .inner
            .jobs
            .lock()
            .iter()
            .filter(|((p, _), job)| p == project_id && !job.is_finished())
            .map(|((_, stage), _)| *stage)
            .collect();
        active.sort();
        Ok(ProjectReport {
            project_id: project.id,
            status: project.status,
            failed_stage: project.failed_stage,
            last_error: project.last_error,
            active,
        })
    }

    /// Signal every active job of the project to stop. Returns how many
    /// jobs were signalled.
    pub fn cancel(&self, project_id: &ProjectId) -> usize {
        let jobs = self.inner.jobs.lock();
        let mut cancelled = 0;
        for ((p, stage), job) in jobs.iter() {
            if p == project_id && !job.is_finished() {
                job.cancel();
                cancelled += 1;
                info!(project = %project_id, stage = %stage, "cancellation requested");
            }
        }
        cancelled
    }

    /// Cancel any running job, then remove the project and everything
    /// derived from it.
    pub fn delete_project(&self, project_id: &ProjectId) -> ReliefResult<()> {
        self.cancel(project_id);
        self.inner.services.metadata.delete_project(project_id)?;
        info!(project = %project_id, "project deleted");
        Ok(())
    }

    /// The project's current scene.
    pub fn scene(&self, project_id: &ProjectId) -> ReliefResult<Scene> {
        self.inner.scene_for(project_id)
    }

    pub fn get_scene(&self, scene_id: &SceneId) -> ReliefResult<Scene> {
        self.inner.services.metadata.get_scene(scene_id)
    }

    /// Cancel a running export of the scene and remove it. A project that
    /// has not been exported yet fails at composition so it can recompose.
    pub fn delete_scene(&self, scene_id: &SceneId) -> ReliefResult<()> {
        let scene = self.inner.services.metadata.get_scene(scene_id)?;
        if let Some(job) = self
            .inner
            .jobs
            .lock()
            .get(&(scene.project_id.clone(), Stage::Render))
        {
            job.cancel();
        }
        self.inner.services.metadata.delete_scene(scene_id)?;
        let project = self.inner.services.metadata.get_project(&scene.project_id)?;
        if project.status == ProjectStatus::Composed {
            let err = ReliefError::not_found(format!("scene {} was deleted", scene_id));
            self.inner
                .commit_status(&scene.project_id, |p| p.fail(Stage::Composition, &err))?;
        }
        info!(scene = %scene_id, project = %scene.project_id, "scene deleted");
        Ok(())
    }

    /// Apply a transform edit if the scene is still at `expected_version`.
    /// Returns the new scene version.
    pub fn edit_transform(
        &self,
        scene_id: &SceneId,
        object: ObjectId,
        edit: &TransformEdit,
        expected_version: u64,
    ) -> ReliefResult<u64> {
        let metadata = &self.inner.services.metadata;
        let mut scene = metadata.get_scene(scene_id)?;
        let version = self
            .inner
            .engine
            .apply(&mut scene, object, edit, expected_version)?;
        metadata.update_scene(scene, expected_version)?;
        Ok(version)
    }

    /// Move `object` under `parent` (or to the root set).
    pub fn reparent(
        &self,
        scene_id: &SceneId,
        object: ObjectId,
        parent: Option<ObjectId>,
        expected_version: u64,
    ) -> ReliefResult<u64> {
        let metadata = &self.inner.services.metadata;
        let mut scene = metadata.get_scene(scene_id)?;
        let version = scene.reparent(expected_version, object, parent)?;
        metadata.update_scene(scene, expected_version)?;
        Ok(version)
    }

    pub fn set_camera(
        &self,
        scene_id: &SceneId,
        camera: Camera,
        expected_version: u64,
    ) -> ReliefResult<u64> {
        let metadata = &self.inner.services.metadata;
        let mut scene = metadata.get_scene(scene_id)?;
        let version = scene.set_camera(expected_version, camera)?;
        metadata.update_scene(scene, expected_version)?;
        Ok(version)
    }

    /// Active segments of the project, in creation order.
    pub fn segments(&self, project_id: &ProjectId) -> ReliefResult<Vec<Segment>> {
        self.inner.active_segments(project_id)
    }

    pub fn mesh(&self, id: &MeshId) -> ReliefResult<MeshAsset> {
        self.inner.services.metadata.get_mesh(id)
    }

    /// The artifact of the project's latest export.
    pub fn artifact(&self, project_id: &ProjectId) -> ReliefResult<Artifact> {
        let scene = self.inner.scene_for(project_id)?;
        let blob = scene
            .export_artifact
            .ok_or_else(|| ReliefError::not_found(format!("project {} has no export", project_id)))?;
        Artifact::from_bytes(&self.inner.services.blobs.get(&blob)?)
    }

    /// Ask the caption service about an exported project. Never changes
    /// pipeline state; without a caption service the list is empty.
    pub fn suggest_captions(&self, project_id: &ProjectId) -> ReliefResult<Vec<CaptionSuggestion>> {
        let project = self.inner.services.metadata.get_project(project_id)?;
        if project.status != ProjectStatus::Exported {
            return Err(ReliefError::validation(format!(
                "captions need an exported project, {} is {}",
                project_id, project.status
            )));
        }
        let Some(service) = &self.inner.services.captions else {
            return Ok(Vec::new());
        };
        let scene = self.inner.scene_for(project_id)?;
        let latest = self.inner.services.metadata.export_jobs(&scene.id)?.pop();
        let (frame_count, duration_seconds) = latest
            .map(|job| {
                let n = job.settings.trajectory.len() as u64;
                (n, n as f64 / job.settings.fps)
            })
            .unwrap_or((0, 0.0));
        let context = SceneContext {
            project_id: project.id,
            scene_id: scene.id.clone(),
            object_names: scene.graph.iter().map(|(_, o)| o.name.clone()).collect(),
            frame_count,
            duration_seconds,
        };
        let mut suggestions = self
            .inner
            .retry
            .run("captions", &CancelToken::new(), |_| service.suggest(&context))?;
        suggestions.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        Ok(suggestions)
    }

    /// Cancel every active job.
    pub fn shutdown(&self) {
        for job in self.inner.jobs.lock().values() {
            job.cancel();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.services.segmentation.close();
        self.services.depth.close();
        if let Some(captions) = &self.services.captions {
            captions.close();
        }
        debug!("pipeline providers closed");
    }
}

impl Inner {
    fn execute(self: Arc<Self>, job: JobHandle, request: ExportRequest) {
        let project_id = job.project_id().clone();
        let stage = job.stage();
        let span = info_span!("stage", project = %project_id, stage = %stage, job = job.id());
        let _enter = span.enter();

        job.set_state(JobState::Running);
        let cancel = job.cancel_token();
        let started = Instant::now();
        info!("stage started");

        let state = match self.run_stage(&project_id, stage, &request, &cancel) {
            Ok(result) => match self.commit_status(&project_id, |p| p.advance(stage)) {
                Ok(project) => {
                    info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        status = %project.status,
                        "stage completed"
                    );
                    JobState::Succeeded(StageOutcome {
                        project_id: project_id.clone(),
                        stage,
                        status: project.status,
                        reused: false,
                        result,
                    })
                }
                Err(e) => {
                    warn!(error = %e, "stage output stored but status update failed");
                    JobState::Failed(FailureInfo::from_error(&e))
                }
            },
            Err(e) if e.kind() == ErrorKind::Cancelled => {
                info!("stage cancelled, partial output discarded");
                JobState::Cancelled
            }
            Err(e) => {
                warn!(error = %e, kind = %e.kind(), "stage failed");
                if let Err(store_err) = self.commit_status(&project_id, |p| p.fail(stage, &e)) {
                    warn!(error = %store_err, "could not record stage failure");
                }
                JobState::Failed(FailureInfo::from_error(&e))
            }
        };

        job.set_state(state);
        let mut jobs = self.jobs.lock();
        if jobs
            .get(&(project_id.clone(), stage))
            .is_some_and(|current| current.is_same(&job))
        {
            jobs.remove(&(project_id, stage));
        }
    }

    fn run_stage(
        &self,
        project_id: &ProjectId,
        stage: Stage,
        request: &ExportRequest,
        cancel: &CancelToken,
    ) -> ReliefResult<StageResult> {
        cancel.check(stage.as_str())?;
        let project = self.services.metadata.get_project(project_id)?;
        match stage {
            Stage::Segmentation => self.segment(&project, cancel),
            Stage::Reconstruction => self.reconstruct(&project, cancel),
            Stage::Composition => self.compose(&project, cancel),
            Stage::Render => self.export(&project, request, cancel),
        }
    }

    /// Read-modify-write of the project record, retried on version conflicts.
    fn commit_status<F>(&self, project_id: &ProjectId, update: F) -> ReliefResult<Project>
    where
        F: Fn(&mut Project),
    {
        let mut attempt = 0;
        loop {
            let mut project = self.services.metadata.get_project(project_id)?;
            let version = project.version;
            update(&mut project);
            match self.services.metadata.update_project(project, version) {
                Err(e) if e.kind() == ErrorKind::Conflict && attempt + 1 < STATUS_COMMIT_ATTEMPTS => {
                    attempt += 1;
                    debug!(attempt, "project version moved, rereading");
                }
                other => return other,
            }
        }
    }

    fn scene_for(&self, project_id: &ProjectId) -> ReliefResult<Scene> {
        self.services
            .metadata
            .scene_for_project(project_id)?
            .ok_or_else(|| ReliefError::not_found(format!("project {} has no scene", project_id)))
    }

    fn active_segments(&self, project_id: &ProjectId) -> ReliefResult<Vec<Segment>> {
        Ok(self
            .services
            .metadata
            .segments(project_id)?
            .into_iter()
            .filter(Segment::is_active)
            .collect())
    }

    fn latest_meshes(&self, project_id: &ProjectId) -> ReliefResult<Vec<MeshAsset>> {
        let mut meshes = Vec::new();
        for segment in self.active_segments(project_id)? {
            if let Some(mesh) = self.services.metadata.mesh_versions(&segment.id)?.pop() {
                meshes.push(mesh);
            }
        }
        Ok(meshes)
    }

    /// The result a completed stage produced, for idempotent re-requests.
    fn existing_outcome(&self, project: &Project, stage: Stage) -> ReliefResult<StageOutcome> {
        let result = match stage {
            Stage::Segmentation => StageResult::Segmentation {
                segments: self
                    .active_segments(&project.id)?
                    .into_iter()
                    .map(|s| s.id)
                    .collect(),
            },
            Stage::Reconstruction => StageResult::Reconstruction {
                meshes: self
                    .latest_meshes(&project.id)?
                    .into_iter()
                    .map(|m| m.id)
                    .collect(),
                skipped: Vec::new(),
            },
            Stage::Composition => StageResult::Composition {
                scene: self.scene_for(&project.id)?.id,
            },
            Stage::Render => {
                let scene = self.scene_for(&project.id)?;
                let (export_job, artifact) = self
                    .services
                    .metadata
                    .export_jobs(&scene.id)?
                    .into_iter()
                    .rev()
                    .find_map(|j| j.artifact.map(|a| (j.id, a)))
                    .ok_or_else(|| {
                        ReliefError::not_found(format!("scene {} has no completed export", scene.id))
                    })?;
                StageResult::Render {
                    export_job,
                    artifact,
                }
            }
        };
        Ok(StageOutcome {
            project_id: project.id.clone(),
            stage,
            status: project.status,
            reused: true,
            result,
        })
    }

    fn load_image(&self, blob: &BlobRef) -> ReliefResult<FrameBuffer> {
        FrameBuffer::decode(&self.services.blobs.get(blob)?)
    }

    fn segment(&self, project: &Project, cancel: &CancelToken) -> ReliefResult<StageResult> {
        let provider = &self.services.segmentation;
        let threshold = self.config.mesh.mask_threshold;
        let min_confidence = self.config.pipeline.min_segment_confidence;

        let mut segments = Vec::new();
        for (index, blob) in project.source_images.iter().enumerate() {
            cancel.check("segmentation")?;
            let image = self.load_image(blob)?;
            let proposals = self
                .retry
                .run("segmentation", cancel, |_| provider.segment(&image))?;
            debug!(image = index, proposals = proposals.len(), "segmentation proposals");

            for proposal in proposals {
                if proposal.confidence < min_confidence {
                    debug!(image = index, confidence = proposal.confidence, "dropping low-confidence segment");
                    continue;
                }
                if (proposal.mask.width, proposal.mask.height) != (image.width, image.height) {
                    return Err(ReliefError::validation(format!(
                        "{} returned a {}x{} mask for a {}x{} image",
                        provider.name(),
                        proposal.mask.width,
                        proposal.mask.height,
                        image.width,
                        image.height
                    )));
                }
                let Some(bbox) = proposal.bbox.or_else(|| proposal.mask.bounding_box(threshold))
                else {
                    warn!(image = index, "dropping segment with an empty mask");
                    continue;
                };
                let mask = self.services.blobs.put(&proposal.mask.to_image().encode_png()?)?;
                segments.push(Segment::new(
                    project.id.clone(),
                    index,
                    mask,
                    bbox,
                    proposal.confidence,
                )?);
            }
        }

        if segments.is_empty() {
            return Err(ReliefError::validation("segmentation found no subjects"));
        }
        cancel.check("segmentation")?;
        let ids: Vec<_> = segments.iter().map(|s| s.id.clone()).collect();
        self.services.metadata.replace_segments(&project.id, segments)?;
        info!(segments = ids.len(), "segmentation stored");
        Ok(StageResult::Segmentation { segments: ids })
    }

    fn reconstruct(&self, project: &Project, cancel: &CancelToken) -> ReliefResult<StageResult> {
        let active = self.active_segments(&project.id)?;
        if active.is_empty() {
            return Err(ReliefError::validation(format!(
                "project {} has no segments to reconstruct",
                project.id
            )));
        }

        // One depth estimate per source image, shared by its segments.
        let indices: BTreeSet<usize> = active.iter().map(|s| s.source_index).collect();
        let mut sources: BTreeMap<usize, (FrameBuffer, DepthMap)> = BTreeMap::new();
        for index in indices {
            cancel.check("reconstruction")?;
            let blob = project.source_images.get(index).ok_or_else(|| {
                ReliefError::not_found(format!("source image {} of project {}", index, project.id))
            })?;
            let image = self.load_image(blob)?;
            let depth = self
                .retry
                .run("depth", cancel, |_| self.services.depth.estimate_depth(&image))?;
            sources.insert(index, (image, depth));
        }

        let built: Vec<(Segment, ReliefResult<BuiltMesh>)> = self.pool.install(|| {
            active
                .into_par_iter()
                .map(|segment| {
                    let result = self.build_segment(&segment, &sources, cancel);
                    (segment, result)
                })
                .collect()
        });

        let mut succeeded = Vec::new();
        let mut skipped = Vec::new();
        let mut first_error = None;
        for (segment, result) in built {
            match result {
                Ok(mesh) => succeeded.push((segment, mesh)),
                Err(e) if e.kind() == ErrorKind::Cancelled => return Err(e),
                Err(e) => {
                    warn!(segment = %segment.id, error = %e, "segment reconstruction failed");
                    skipped.push(SkippedSegment {
                        segment: segment.id.clone(),
                        error: FailureInfo::from_error(&e),
                    });
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            if succeeded.is_empty() || self.config.pipeline.require_all_segments {
                return Err(e);
            }
        }

        cancel.check("reconstruction")?;
        let mut assets = Vec::with_capacity(succeeded.len());
        for (segment, mesh) in succeeded {
            let version = self
                .services
                .metadata
                .mesh_versions(&segment.id)?
                .last()
                .map(|m| m.version)
                .unwrap_or(0)
                + 1;
            let texture = project.source_images[segment.source_index].clone();
            assets.push(MeshAsset::new(
                segment.id,
                version,
                mesh.geometry,
                texture,
                mesh.stats,
            )?);
        }
        let meshes: Vec<MeshId> = assets.iter().map(|m| m.id.clone()).collect();
        self.services.metadata.append_meshes(assets)?;
        info!(meshes = meshes.len(), skipped = skipped.len(), "reconstruction stored");
        Ok(StageResult::Reconstruction { meshes, skipped })
    }

    fn build_segment(
        &self,
        segment: &Segment,
        sources: &BTreeMap<usize, (FrameBuffer, DepthMap)>,
        cancel: &CancelToken,
    ) -> ReliefResult<BuiltMesh> {
        cancel.check("reconstruction")?;
        let (image, depth) = sources.get(&segment.source_index).ok_or_else(|| {
            ReliefError::not_found(format!("source image {}", segment.source_index))
        })?;
        let mask = Mask::from_image(&self.load_image(&segment.mask)?);
        let _span = info_span!("segment", id = %segment.id).entered();
        self.builder.build(depth, &mask, image, None)
    }

    fn compose(&self, project: &Project, cancel: &CancelToken) -> ReliefResult<StageResult> {
        let meshes = self.latest_meshes(&project.id)?;
        if meshes.is_empty() {
            return Err(ReliefError::validation(format!(
                "project {} has no meshes to compose",
                project.id
            )));
        }
        let bounds = meshes
            .iter()
            .filter_map(MeshAsset::bounds)
            .reduce(|a, b| a.union(&b));
        let camera = self.framing_camera(bounds)?;

        let mut scene = Scene::new(project.id.clone(), camera);
        for (i, mesh) in meshes.iter().enumerate() {
            scene.add_object(SceneObject::new(mesh.id.clone(), format!("object-{}", i + 1)));
        }
        cancel.check("composition")?;
        let id = scene.id.clone();
        self.services.metadata.create_scene(scene)?;
        info!(scene = %id, objects = meshes.len(), "scene composed");
        Ok(StageResult::Composition { scene: id })
    }

    /// Camera at the source viewpoint (the origin) aimed at the bounds center.
    fn framing_camera(&self, bounds: Option<Bounds3>) -> ReliefResult<Camera> {
        let fov = self.config.render.fov_degrees;
        let Some(bounds) = bounds else {
            return Camera::new(DVec3::Z, DVec3::ZERO, fov);
        };
        let target = bounds.center();
        let mut position = DVec3::ZERO;
        if position.distance(target) <= 1e-9 {
            let distance = (bounds.radius() * self.config.pipeline.orbit_radius_factor).max(1.0);
            position = target + DVec3::Z * distance;
        }
        Camera::new(position, target, fov)
    }

    fn export_settings(
        &self,
        scene: &Scene,
        assets: &SceneAssets,
        request: &ExportRequest,
    ) -> ReliefResult<ExportSettings> {
        let trajectory = match &request.trajectory {
            TrajectoryRequest::SceneCamera => Trajectory::Poses {
                cameras: vec![scene.camera],
            },
            TrajectoryRequest::Custom { trajectory } => trajectory.clone(),
            TrajectoryRequest::DefaultOrbit => {
                let bounds = scene
                    .world_bounds(|id| assets.get(id).ok().and_then(|m| m.geometry.bounds()))?
                    .ok_or_else(|| ReliefError::render("scene has no geometry to orbit"))?;
                let p = &self.config.pipeline;
                let radius = (bounds.radius() * p.orbit_radius_factor).max(1e-3);
                Trajectory::orbit(
                    bounds.center(),
                    radius,
                    bounds.radius() * p.orbit_height_factor,
                    p.orbit_frames,
                    self.config.render.fov_degrees,
                )
            }
        };
        Ok(ExportSettings {
            format: request.format.unwrap_or(self.config.encode.default_format),
            width: request.width.unwrap_or(self.config.render.width),
            height: request.height.unwrap_or(self.config.render.height),
            fps: request.fps.unwrap_or(self.config.encode.fps),
            trajectory,
        })
    }

    fn load_assets(&self, scene: &Scene) -> ReliefResult<SceneAssets> {
        let mut assets = SceneAssets::new();
        let mut loaded: HashSet<MeshId> = HashSet::new();
        let mut textures: HashMap<BlobRef, FrameBuffer> = HashMap::new();
        for (_, object) in scene.graph.iter() {
            if !loaded.insert(object.mesh.clone()) {
                continue;
            }
            let mesh = self.services.metadata.get_mesh(&object.mesh)?;
            let texture = match textures.get(&mesh.texture) {
                Some(t) => t.clone(),
                None => {
                    let t = self.load_image(&mesh.texture)?;
                    textures.insert(mesh.texture.clone(), t.clone());
                    t
                }
            };
            assets.insert_asset(&mesh, texture);
        }
        Ok(assets)
    }

    fn export(
        &self,
        project: &Project,
        request: &ExportRequest,
        cancel: &CancelToken,
    ) -> ReliefResult<StageResult> {
        let scene = self.scene_for(&project.id)?;
        let assets = self.load_assets(&scene)?;
        let settings = self.export_settings(&scene, &assets, request)?;

        let encode = EncodeSettings::from_config(
            &self.config.encode,
            settings.format,
            settings.width,
            settings.height,
            settings.fps,
        );
        encode.validate()?;
        let render = RenderSettings::from_config(&self.config.render, &self.config.encode)
            .with_size(settings.width, settings.height)
            .with_fps(settings.fps);
        let renderer = Renderer::new(&scene, &assets, &settings.trajectory, render)?
            .with_pool(self.pool.handle());
        info!(
            frames = renderer.frame_count(),
            width = settings.width,
            height = settings.height,
            format = %settings.format,
            "rendering export"
        );

        let artifact = encode_stream(&encode, renderer.into_frames(cancel.clone()))?;
        cancel.check("export")?;

        let blob = self.services.blobs.put(&artifact.to_bytes()?)?;
        let mut job = ExportJob::new(scene.id.clone(), settings);
        job.complete(blob.clone());
        let export_job = job.id.clone();
        self.services.metadata.put_export_job(job)?;
        self.services.metadata.set_scene_artifact(&scene.id, blob.clone())?;
        info!(
            artifact = %blob,
            duration = artifact.duration_seconds(),
            "export stored"
        );
        Ok(StageResult::Render {
            export_job,
            artifact: blob,
        })
    }
}
