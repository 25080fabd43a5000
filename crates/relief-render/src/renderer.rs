use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use glam::{DMat4, DVec3};
use rayon::prelude::*;
use relief_core::hash::{self, ContentHash};
use relief_core::{CancelToken, FrameBuffer, ReliefError, ReliefResult};
use relief_scene::{Camera, ObjectId, Scene, SceneGraph, Trajectory};
use tracing::{debug, info};

use crate::assets::{MeshResource, SceneAssets};
use crate::raster::{RenderTarget, ScreenVertex};
use crate::settings::RenderSettings;

/// Renders a scene along a camera trajectory.
///
/// Construction resolves every mesh and checks each pose up front, so the
/// frame sequence only fails on cancellation.
pub struct Renderer {
    settings: RenderSettings,
    graph: SceneGraph,
    objects: Vec<(ObjectId, MeshResource)>,
    poses: Vec<Camera>,
    light: DVec3,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("settings", &self.settings)
            .field("objects", &self.objects.len())
            .field("poses", &self.poses.len())
            .finish()
    }
}

impl Renderer {
    pub fn new(
        scene: &Scene,
        assets: &SceneAssets,
        trajectory: &Trajectory,
        settings: RenderSettings,
    ) -> ReliefResult<Self> {
        settings.validate()?;
        let poses = trajectory.poses()?;
        for (i, pose) in poses.iter().enumerate() {
            if pose.is_degenerate() {
                return Err(ReliefError::render(format!(
                    "camera pose {} has its target at its position {:?}",
                    i, pose.position
                )));
            }
        }

        let mut objects = Vec::new();
        for (id, obj) in scene.graph.iter() {
            objects.push((id, assets.get(&obj.mesh)?.clone()));
        }

        let renderer = Self {
            light: -settings.light_direction.normalize(),
            settings,
            graph: scene.graph.clone(),
            objects,
            poses,
            pool: None,
        };
        renderer.check_visibility()?;
        Ok(renderer)
    }

    /// Render batches on `pool` instead of rayon's global pool.
    pub fn with_pool(mut self, pool: Arc<rayon::ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn frame_count(&self) -> usize {
        self.poses.len()
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    fn time_of(&self, index: usize) -> f64 {
        index as f64 / self.settings.fps
    }

    fn view_projection(&self, camera: &Camera) -> ReliefResult<DMat4> {
        let view = camera.view_matrix()?;
        let proj = camera.projection_matrix(
            self.settings.aspect(),
            self.settings.near,
            self.settings.far,
        );
        Ok(proj * view)
    }

    fn world_matrices(&self, t: f64) -> HashMap<ObjectId, DMat4> {
        self.graph.world_transforms_at(t).into_iter().collect()
    }

    /// Every pose must see at least one vertex inside its view frustum.
    fn check_visibility(&self) -> ReliefResult<()> {
        let vertex_total: usize = self
            .objects
            .iter()
            .map(|(_, m)| m.geometry.vertex_count())
            .sum();
        if vertex_total == 0 {
            return Err(ReliefError::render("scene has no geometry to render"));
        }

        for (i, camera) in self.poses.iter().enumerate() {
            let vp = self.view_projection(camera)?;
            let worlds = self.world_matrices(self.time_of(i));
            let visible = self.objects.iter().any(|(id, mesh)| {
                let Some(world) = worlds.get(id) else {
                    return false;
                };
                let mvp = vp * *world;
                mesh.geometry.vertices.iter().any(|v| {
                    let clip = mvp * v.extend(1.0);
                    if clip.w <= self.settings.near {
                        return false;
                    }
                    let ndc = clip.truncate() / clip.w;
                    ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0 && (0.0..=1.0).contains(&ndc.z)
                })
            });
            if !visible {
                return Err(ReliefError::render(format!(
                    "no scene geometry is visible from camera pose {}",
                    i
                )));
            }
        }
        Ok(())
    }

    /// Render frame `index` of the trajectory.
    pub fn render_frame(&self, index: usize) -> ReliefResult<FrameBuffer> {
        let camera = self
            .poses
            .get(index)
            .ok_or_else(|| ReliefError::render(format!("frame {} is past the trajectory", index)))?;
        let (width, height) = (self.settings.width, self.settings.height);
        let vp = self.view_projection(camera)?;
        let worlds = self.world_matrices(self.time_of(index));
        let mut target = RenderTarget::new(width, height, &self.settings.background);

        for (id, mesh) in &self.objects {
            let Some(world) = worlds.get(id) else {
                continue;
            };
            let geometry = &mesh.geometry;
            let world_pos: Vec<DVec3> = geometry
                .vertices
                .iter()
                .map(|v| world.transform_point3(*v))
                .collect();
            let screen: Vec<Option<ScreenVertex>> = world_pos
                .iter()
                .zip(&geometry.uvs)
                .map(|(p, uv)| {
                    let clip = vp * p.extend(1.0);
                    (clip.w > self.settings.near)
                        .then(|| ScreenVertex::from_clip(clip, *uv, width, height))
                })
                .collect();

            for tri in &geometry.triangles {
                let [a, b, c] = tri.map(|i| i as usize);
                // any vertex behind the near plane drops the triangle
                let (Some(sa), Some(sb), Some(sc)) = (screen[a], screen[b], screen[c]) else {
                    continue;
                };
                let (wa, wb, wc) = (world_pos[a], world_pos[b], world_pos[c]);
                let mut normal = (wb - wa).cross(wc - wa).normalize_or_zero();
                if normal == DVec3::ZERO {
                    continue;
                }
                if normal.dot(camera.position - wa) < 0.0 {
                    normal = -normal;
                }
                let shade = normal.dot(self.light).clamp(self.settings.ambient, 1.0);
                target.draw_triangle([sa, sb, sc], &mesh.texture, shade);
            }
        }
        Ok(target.into_frame())
    }

    /// The ordered frame sequence. Consumes the renderer; re-create it from
    /// the same trajectory to render again.
    pub fn into_frames(self, cancel: CancelToken) -> FrameSequence {
        let batch = match self.settings.batch_size {
            0 => self
                .pool
                .as_ref()
                .map(|p| p.current_num_threads())
                .unwrap_or_else(rayon::current_num_threads)
                .max(1),
            n => n,
        };
        FrameSequence {
            renderer: self,
            next: 0,
            batch,
            ready: VecDeque::new(),
            cancel,
            finished: false,
        }
    }

    /// Render every frame into memory.
    pub fn render_all(self, cancel: CancelToken) -> ReliefResult<RenderOutput> {
        let (width, height, fps) = (self.settings.width, self.settings.height, self.settings.fps);
        let frames = self.into_frames(cancel).collect::<ReliefResult<Vec<_>>>()?;
        Ok(RenderOutput {
            frames,
            width,
            height,
            fps,
        })
    }
}

/// Ordered, finite, non-restartable frame iterator.
///
/// Frames are rendered in parallel batches and yielded strictly in
/// trajectory order. Cancellation is checked before every frame; after a
/// cancellation or error the sequence ends.
pub struct FrameSequence {
    renderer: Renderer,
    next: usize,
    batch: usize,
    ready: VecDeque<FrameBuffer>,
    cancel: CancelToken,
    finished: bool,
}

impl FrameSequence {
    pub fn len(&self) -> usize {
        self.renderer.frame_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.renderer.settings
    }

    fn render_batch(&mut self) -> ReliefResult<()> {
        let start = self.next;
        let end = (start + self.batch).min(self.renderer.frame_count());
        let renderer = &self.renderer;
        let cancel = &self.cancel;
        let work = || {
            (start..end)
                .into_par_iter()
                .map(|i| {
                    cancel.check("render")?;
                    renderer.render_frame(i)
                })
                .collect::<ReliefResult<Vec<_>>>()
        };
        let frames = match &self.renderer.pool {
            Some(pool) => pool.install(work),
            None => work(),
        }?;
        debug!(start, end, "rendered frame batch");
        self.ready.extend(frames);
        self.next = end;
        Ok(())
    }
}

impl Iterator for FrameSequence {
    type Item = ReliefResult<FrameBuffer>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Some(frame) = self.ready.pop_front() {
            return Some(Ok(frame));
        }
        if self.next >= self.renderer.frame_count() {
            self.finished = true;
            info!(frames = self.renderer.frame_count(), "render complete");
            return None;
        }
        if let Err(e) = self.cancel.check("render").and_then(|_| self.render_batch()) {
            self.finished = true;
            return Some(Err(e));
        }
        self.ready.pop_front().map(Ok)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.renderer.frame_count() - self.next + self.ready.len();
        (0, Some(remaining))
    }
}

/// A fully rendered trajectory.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub frames: Vec<FrameBuffer>,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl RenderOutput {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Hash over every frame; identical renders hash identically.
    pub fn content_hash(&self) -> ContentHash {
        hash::hash_frames(&self.frames)
    }
}
