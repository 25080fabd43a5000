use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use glam::DVec3;
use relief_core::{Color, ErrorKind, ExportFormat, FrameBuffer, ReliefConfig, ReliefError, ReliefResult};
use relief_mesh::{DepthMap, Mask};
use relief_pipeline::{
    AlphaSegmenter, CaptionService, CaptionSuggestion, DepthProvider, ExportRequest,
    PipelineOrchestrator, SceneContext, SegmentProposal, SegmentationProvider, Services,
    StageResult, TrajectoryRequest,
};
use relief_scene::{Camera, ProjectId, ProjectStatus, Stage, Trajectory, TransformEdit, UserId};

const SIZE: u32 = 32;

/// Every image sits on a fronto-parallel plane at depth 2.
struct PlaneDepth;

impl DepthProvider for PlaneDepth {
    fn name(&self) -> &str {
        "plane"
    }

    fn estimate_depth(&self, image: &FrameBuffer) -> ReliefResult<DepthMap> {
        Ok(DepthMap::uniform(image.width, image.height, 2.0))
    }
}

/// Fails with an external-service error for the first `failures` calls.
struct FlakyDepth {
    failures: usize,
    calls: AtomicUsize,
}

impl DepthProvider for FlakyDepth {
    fn name(&self) -> &str {
        "flaky"
    }

    fn estimate_depth(&self, image: &FrameBuffer) -> ReliefResult<DepthMap> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ReliefError::external("flaky", "connection reset"));
        }
        PlaneDepth.estimate_depth(image)
    }
}

/// Blocks inside `estimate_depth` until released.
#[derive(Default)]
struct GatedDepth {
    entered: AtomicBool,
    gate: Mutex<bool>,
    opened: Condvar,
}

impl GatedDepth {
    fn wait_entered(&self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !self.entered.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "provider was never called");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn release(&self) {
        *self.gate.lock().unwrap() = true;
        self.opened.notify_all();
    }
}

impl DepthProvider for GatedDepth {
    fn name(&self) -> &str {
        "gated"
    }

    fn estimate_depth(&self, image: &FrameBuffer) -> ReliefResult<DepthMap> {
        self.entered.store(true, Ordering::SeqCst);
        let mut open = self.gate.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
        PlaneDepth.estimate_depth(image)
    }
}

/// A full-frame subject plus a one-pixel speck that cannot be meshed.
struct SubjectAndSpeck;

impl SegmentationProvider for SubjectAndSpeck {
    fn name(&self) -> &str {
        "subject-and-speck"
    }

    fn segment(&self, image: &FrameBuffer) -> ReliefResult<Vec<SegmentProposal>> {
        Ok(vec![
            SegmentProposal {
                mask: Mask::full(image.width, image.height),
                bbox: None,
                confidence: 0.95,
            },
            SegmentProposal {
                mask: Mask::from_fn(image.width, image.height, |x, y| {
                    if (x, y) == (3, 3) {
                        1.0
                    } else {
                        0.0
                    }
                }),
                bbox: None,
                confidence: 0.6,
            },
        ])
    }
}

struct FixedCaptions;

impl CaptionService for FixedCaptions {
    fn name(&self) -> &str {
        "fixed"
    }

    fn suggest(&self, context: &SceneContext) -> ReliefResult<Vec<CaptionSuggestion>> {
        Ok(vec![
            CaptionSuggestion {
                text: format!("{} objects", context.object_names.len()),
                relevance_score: 0.2,
            },
            CaptionSuggestion {
                text: format!("{} frames of orbit", context.frame_count),
                relevance_score: 0.9,
            },
        ])
    }
}

fn config() -> ReliefConfig {
    let mut config = ReliefConfig::default();
    config.render.width = SIZE;
    config.render.height = SIZE;
    config.pipeline.worker_threads = 2;
    config.pipeline.orbit_frames = 6;
    config.encode.fps = 10.0;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 4;
    config
}

fn pipeline_with(
    config: ReliefConfig,
    segmentation: Arc<dyn SegmentationProvider>,
    depth: Arc<dyn DepthProvider>,
) -> PipelineOrchestrator {
    PipelineOrchestrator::new(config, Services::in_memory(segmentation, depth)).unwrap()
}

fn pipeline() -> PipelineOrchestrator {
    pipeline_with(config(), Arc::new(AlphaSegmenter), Arc::new(PlaneDepth))
}

fn image_bytes() -> Vec<u8> {
    FrameBuffer::solid(SIZE, SIZE, &Color::rgb(0.8, 0.4, 0.2))
        .encode_png()
        .unwrap()
}

fn new_project(orchestrator: &PipelineOrchestrator) -> ProjectId {
    orchestrator
        .create_project(UserId::new("tester"), &[image_bytes()])
        .unwrap()
        .id
}

fn run(orchestrator: &PipelineOrchestrator, project: &ProjectId, stages: &[Stage]) {
    for stage in stages {
        orchestrator
            .enqueue_stage(project, *stage)
            .unwrap()
            .join()
            .unwrap_or_else(|e| panic!("{} failed: {}", stage, e.message));
    }
}

#[test]
fn test_full_pipeline_exports_loop_image() {
    let orchestrator = pipeline();
    let project = new_project(&orchestrator);
    run(&orchestrator, &project, &Stage::ALL);

    let report = orchestrator.get_status(&project).unwrap();
    assert_eq!(report.status, ProjectStatus::Exported);
    assert!(report.failed_stage.is_none());
    assert!(report.active.is_empty());

    let segments = orchestrator.segments(&project).unwrap();
    assert_eq!(segments.len(), 1);
    let scene = orchestrator.scene(&project).unwrap();
    assert_eq!(scene.graph.len(), 1);
    let (_, object) = scene.graph.iter().next().unwrap();
    let mesh = orchestrator.mesh(&object.mesh).unwrap();
    assert_eq!(mesh.geometry.triangle_count(), 2 * 31 * 31);

    let artifact = orchestrator.artifact(&project).unwrap();
    assert_eq!(artifact.metadata.format, ExportFormat::LoopImage);
    assert_eq!(artifact.metadata.frame_count, 6);
    assert_eq!((artifact.metadata.width, artifact.metadata.height), (SIZE, SIZE));
    assert!((artifact.duration_seconds() - 0.6).abs() < 1e-9);
    assert!(scene.export_artifact.is_some());
}

#[test]
fn test_rerunning_reconstruction_creates_no_new_mesh_versions() {
    let orchestrator = pipeline();
    let project = new_project(&orchestrator);
    run(&orchestrator, &project, &[Stage::Segmentation, Stage::Reconstruction]);

    let segment = orchestrator.segments(&project).unwrap().remove(0);
    let versions = |o: &PipelineOrchestrator| {
        o.services().metadata.mesh_versions(&segment.id).unwrap().len()
    };
    assert_eq!(versions(&orchestrator), 1);

    let again = orchestrator
        .enqueue_stage(&project, Stage::Reconstruction)
        .unwrap()
        .join()
        .unwrap();
    assert!(again.reused);
    assert!(matches!(again.result, StageResult::Reconstruction { ref meshes, .. } if meshes.len() == 1));
    assert_eq!(versions(&orchestrator), 1);

    // Earlier stages are no-ops too.
    let seg = orchestrator
        .enqueue_stage(&project, Stage::Segmentation)
        .unwrap()
        .join()
        .unwrap();
    assert!(seg.reused);
    assert_eq!(orchestrator.segments(&project).unwrap()[0].id, segment.id);
}

#[test]
fn test_stages_cannot_run_out_of_order() {
    let orchestrator = pipeline();
    let project = new_project(&orchestrator);
    let err = orchestrator
        .enqueue_stage(&project, Stage::Composition)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        orchestrator.get_status(&project).unwrap().status,
        ProjectStatus::Uploaded
    );
}

#[test]
fn test_duplicate_request_observes_in_flight_job() {
    let depth = Arc::new(GatedDepth::default());
    let orchestrator = pipeline_with(config(), Arc::new(AlphaSegmenter), depth.clone());
    let project = new_project(&orchestrator);
    run(&orchestrator, &project, &[Stage::Segmentation]);

    let first = orchestrator
        .enqueue_stage(&project, Stage::Reconstruction)
        .unwrap();
    let second = orchestrator
        .enqueue_stage(&project, Stage::Reconstruction)
        .unwrap();
    assert!(first.is_same(&second));
    assert_eq!(
        orchestrator.get_status(&project).unwrap().active,
        vec![Stage::Reconstruction]
    );

    depth.release();
    let outcome = second.join().unwrap();
    assert!(!outcome.reused);
    assert_eq!(first.join().unwrap(), outcome);
}

#[test]
fn test_cancel_discards_partial_output() {
    let depth = Arc::new(GatedDepth::default());
    let orchestrator = pipeline_with(config(), Arc::new(AlphaSegmenter), depth.clone());
    let project = new_project(&orchestrator);
    run(&orchestrator, &project, &[Stage::Segmentation]);

    let job = orchestrator
        .enqueue_stage(&project, Stage::Reconstruction)
        .unwrap();
    depth.wait_entered();
    assert_eq!(orchestrator.cancel(&project), 1);
    depth.release();

    let err = job.join().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(
        orchestrator.get_status(&project).unwrap().status,
        ProjectStatus::Segmented
    );
    let segment = orchestrator.segments(&project).unwrap().remove(0);
    assert!(orchestrator
        .services()
        .metadata
        .mesh_versions(&segment.id)
        .unwrap()
        .is_empty());
}

#[test]
fn test_external_errors_are_retried_with_backoff() {
    let depth = Arc::new(FlakyDepth {
        failures: 2,
        calls: AtomicUsize::new(0),
    });
    let orchestrator = pipeline_with(config(), Arc::new(AlphaSegmenter), depth.clone());
    let project = new_project(&orchestrator);
    run(&orchestrator, &project, &[Stage::Segmentation, Stage::Reconstruction]);
    assert_eq!(depth.calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        orchestrator.get_status(&project).unwrap().status,
        ProjectStatus::Reconstructed
    );
}

#[test]
fn test_exhausted_retries_fail_stage_and_retry_recovers() {
    let mut cfg = config();
    cfg.retry.max_attempts = 2;
    let depth = Arc::new(FlakyDepth {
        failures: 2,
        calls: AtomicUsize::new(0),
    });
    let orchestrator = pipeline_with(cfg, Arc::new(AlphaSegmenter), depth.clone());
    let project = new_project(&orchestrator);
    run(&orchestrator, &project, &[Stage::Segmentation]);
    let segments_before = orchestrator.segments(&project).unwrap();

    let err = orchestrator
        .enqueue_stage(&project, Stage::Reconstruction)
        .unwrap()
        .join()
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ExternalService);
    let report = orchestrator.get_status(&project).unwrap();
    assert_eq!(report.status, ProjectStatus::Failed);
    assert_eq!(report.failed_stage, Some(Stage::Reconstruction));
    assert_eq!(report.last_error.unwrap().kind, ErrorKind::ExternalService);

    // The provider has recovered; retrying re-enters reconstruction only.
    run(&orchestrator, &project, &[Stage::Reconstruction]);
    assert_eq!(
        orchestrator.get_status(&project).unwrap().status,
        ProjectStatus::Reconstructed
    );
    let segments_after = orchestrator.segments(&project).unwrap();
    assert_eq!(
        segments_before.iter().map(|s| &s.id).collect::<Vec<_>>(),
        segments_after.iter().map(|s| &s.id).collect::<Vec<_>>()
    );
}

#[test]
fn test_partial_segment_failure_keeps_survivors() {
    let orchestrator = pipeline_with(config(), Arc::new(SubjectAndSpeck), Arc::new(PlaneDepth));
    let project = new_project(&orchestrator);
    run(&orchestrator, &project, &[Stage::Segmentation]);
    assert_eq!(orchestrator.segments(&project).unwrap().len(), 2);

    let outcome = orchestrator
        .enqueue_stage(&project, Stage::Reconstruction)
        .unwrap()
        .join()
        .unwrap();
    match outcome.result {
        StageResult::Reconstruction { meshes, skipped } => {
            assert_eq!(meshes.len(), 1);
            assert_eq!(skipped.len(), 1);
            assert_eq!(skipped[0].error.kind, ErrorKind::Reconstruction);
        }
        other => panic!("unexpected result {:?}", other),
    }
    run(&orchestrator, &project, &[Stage::Composition]);
    assert_eq!(orchestrator.scene(&project).unwrap().graph.len(), 1);
}

#[test]
fn test_require_all_segments_fails_on_any_failure() {
    let mut cfg = config();
    cfg.pipeline.require_all_segments = true;
    let orchestrator = pipeline_with(cfg, Arc::new(SubjectAndSpeck), Arc::new(PlaneDepth));
    let project = new_project(&orchestrator);
    run(&orchestrator, &project, &[Stage::Segmentation]);

    let err = orchestrator
        .enqueue_stage(&project, Stage::Reconstruction)
        .unwrap()
        .join()
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Reconstruction);
    assert_eq!(
        orchestrator.get_status(&project).unwrap().failed_stage,
        Some(Stage::Reconstruction)
    );
}

#[test]
fn test_stale_scene_edit_conflicts_then_succeeds_after_reread() {
    let orchestrator = pipeline();
    let project = new_project(&orchestrator);
    run(
        &orchestrator,
        &project,
        &[Stage::Segmentation, Stage::Reconstruction, Stage::Composition],
    );

    let scene = orchestrator.scene(&project).unwrap();
    let object = scene.graph.roots()[0];
    let nudge = TransformEdit::Translate {
        offset: DVec3::new(0.1, 0.0, 0.0),
    };
    assert_eq!(
        orchestrator
            .edit_transform(&scene.id, object, &nudge, scene.version)
            .unwrap(),
        1
    );

    let err = orchestrator
        .edit_transform(&scene.id, object, &nudge, scene.version)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let fresh = orchestrator.get_scene(&scene.id).unwrap();
    assert_eq!(fresh.version, 1);
    assert_eq!(
        orchestrator
            .edit_transform(&scene.id, object, &nudge, fresh.version)
            .unwrap(),
        2
    );
    let position = orchestrator.get_scene(&scene.id).unwrap().graph.get(object).unwrap().local.position;
    assert!((position.x - 0.2).abs() < 1e-12);
}

#[test]
fn test_degenerate_camera_fails_render_stage() {
    let orchestrator = pipeline();
    let project = new_project(&orchestrator);
    run(
        &orchestrator,
        &project,
        &[Stage::Segmentation, Stage::Reconstruction, Stage::Composition],
    );

    let point = DVec3::new(0.0, 0.0, -2.0);
    let request = ExportRequest {
        trajectory: TrajectoryRequest::Custom {
            trajectory: Trajectory::Poses {
                cameras: vec![Camera::new(point, point, 50.0).unwrap()],
            },
        },
        ..ExportRequest::default()
    };
    let err = orchestrator
        .enqueue_export(&project, request)
        .unwrap()
        .join()
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Render);

    let report = orchestrator.get_status(&project).unwrap();
    assert_eq!(report.status, ProjectStatus::Failed);
    assert_eq!(report.failed_stage.map(|s| s.to_string()).as_deref(), Some("render"));

    // Retrying with a valid trajectory exports without touching the scene.
    let scene_before = orchestrator.scene(&project).unwrap();
    run(&orchestrator, &project, &[Stage::Render]);
    let scene_after = orchestrator.scene(&project).unwrap();
    assert_eq!(scene_before.id, scene_after.id);
    assert_eq!(scene_before.version, scene_after.version);
    assert_eq!(
        orchestrator.get_status(&project).unwrap().status,
        ProjectStatus::Exported
    );
}

#[test]
fn test_video_export_duration_matches_frame_rate() {
    let orchestrator = pipeline();
    let project = new_project(&orchestrator);
    run(
        &orchestrator,
        &project,
        &[Stage::Segmentation, Stage::Reconstruction, Stage::Composition],
    );
    let request = ExportRequest {
        format: Some(ExportFormat::Video),
        fps: Some(24.0),
        ..ExportRequest::default()
    };
    orchestrator
        .enqueue_export(&project, request)
        .unwrap()
        .join()
        .unwrap();
    let artifact = orchestrator.artifact(&project).unwrap();
    assert_eq!(artifact.metadata.frame_count, 6);
    assert!((artifact.duration_seconds() - 6.0 / 24.0).abs() < 1e-9);
    assert_eq!(artifact.mjpeg_frames().unwrap().len(), 6);
}

#[test]
fn test_captions_only_after_export() {
    let services = Services::in_memory(Arc::new(AlphaSegmenter), Arc::new(PlaneDepth))
        .with_captions(Arc::new(FixedCaptions));
    let orchestrator = PipelineOrchestrator::new(config(), services).unwrap();
    let project = new_project(&orchestrator);

    let err = orchestrator.suggest_captions(&project).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    run(&orchestrator, &project, &Stage::ALL);
    let captions = orchestrator.suggest_captions(&project).unwrap();
    assert_eq!(captions.len(), 2);
    assert_eq!(captions[0].text, "6 frames of orbit");
    assert!(captions[0].relevance_score >= captions[1].relevance_score);
    assert_eq!(
        orchestrator.get_status(&project).unwrap().status,
        ProjectStatus::Exported
    );
}

#[test]
fn test_delete_project_removes_everything() {
    let orchestrator = pipeline();
    let project = new_project(&orchestrator);
    run(
        &orchestrator,
        &project,
        &[Stage::Segmentation, Stage::Reconstruction, Stage::Composition],
    );
    let scene = orchestrator.scene(&project).unwrap();
    orchestrator.delete_project(&project).unwrap();
    assert_eq!(
        orchestrator.get_status(&project).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        orchestrator.get_scene(&scene.id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn test_deleting_scene_allows_recomposition() {
    let orchestrator = pipeline();
    let project = new_project(&orchestrator);
    run(
        &orchestrator,
        &project,
        &[Stage::Segmentation, Stage::Reconstruction, Stage::Composition],
    );
    let scene = orchestrator.scene(&project).unwrap();
    orchestrator.delete_scene(&scene.id).unwrap();
    assert_eq!(
        orchestrator.get_status(&project).unwrap().failed_stage,
        Some(Stage::Composition)
    );
    run(&orchestrator, &project, &[Stage::Composition]);
    assert_ne!(orchestrator.scene(&project).unwrap().id, scene.id);
}

#[test]
fn test_unreadable_upload_is_rejected() {
    let orchestrator = pipeline();
    let err = orchestrator
        .create_project(UserId::new("tester"), &[b"not an image".to_vec()])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}
