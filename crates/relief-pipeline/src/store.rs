//! Blob and metadata persistence.
//!
//! Blobs (source images, masks, textures, artifacts) are content-addressed.
//! Metadata records carry versions; every write that could race checks the
//! version it was read at and fails with a conflict otherwise.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use relief_core::{ReliefError, ReliefResult};
use relief_scene::{
    BlobRef, ExportJob, ExportJobId, MeshAsset, MeshId, Project, ProjectId, Scene, SceneId,
    Segment, SegmentId,
};
use tracing::debug;

pub trait BlobStore: Send + Sync {
    /// Store `bytes` and return their content address. Storing the same
    /// bytes twice yields the same reference.
    fn put(&self, bytes: &[u8]) -> ReliefResult<BlobRef>;

    fn get(&self, blob: &BlobRef) -> ReliefResult<Vec<u8>>;

    fn contains(&self, blob: &BlobRef) -> bool;

    fn delete(&self, blob: &BlobRef) -> ReliefResult<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: DashMap<BlobRef, Arc<Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, bytes: &[u8]) -> ReliefResult<BlobRef> {
        let blob = BlobRef::for_bytes(bytes);
        self.blobs
            .entry(blob.clone())
            .or_insert_with(|| Arc::new(bytes.to_vec()));
        Ok(blob)
    }

    fn get(&self, blob: &BlobRef) -> ReliefResult<Vec<u8>> {
        self.blobs
            .get(blob)
            .map(|b| b.as_ref().clone())
            .ok_or_else(|| ReliefError::not_found(format!("blob {}", blob)))
    }

    fn contains(&self, blob: &BlobRef) -> bool {
        self.blobs.contains_key(blob)
    }

    fn delete(&self, blob: &BlobRef) -> ReliefResult<()> {
        self.blobs.remove(blob);
        Ok(())
    }
}

/// Blobs as files under `root/<first two hex chars>/<hash>`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn open(root: impl Into<PathBuf>) -> ReliefResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, blob: &BlobRef) -> ReliefResult<PathBuf> {
        let name = blob.as_str();
        if name.len() < 3 || !name.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ReliefError::validation(format!("malformed blob reference '{}'", name)));
        }
        Ok(self.root.join(&name[..2]).join(name))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, bytes: &[u8]) -> ReliefResult<BlobRef> {
        let blob = BlobRef::for_bytes(bytes);
        let path = self.path_of(&blob)?;
        if path.exists() {
            return Ok(blob);
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        // Write then rename so readers never see a partial blob.
        let tmp = path.with_extension(format!("tmp{}", std::process::id()));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        debug!(blob = %blob, bytes = bytes.len(), "stored blob");
        Ok(blob)
    }

    fn get(&self, blob: &BlobRef) -> ReliefResult<Vec<u8>> {
        let path = self.path_of(blob)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ReliefError::not_found(format!("blob {}", blob)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, blob: &BlobRef) -> bool {
        self.path_of(blob).map(|p| p.exists()).unwrap_or(false)
    }

    fn delete(&self, blob: &BlobRef) -> ReliefResult<()> {
        let path = self.path_of(blob)?;
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Durable records for projects and everything derived from them.
pub trait MetadataStore: Send + Sync {
    fn create_project(&self, project: Project) -> ReliefResult<()>;

    fn get_project(&self, id: &ProjectId) -> ReliefResult<Project>;

    /// Replace the stored project if it is still at `expected_version`.
    /// Returns the stored record with its version incremented.
    fn update_project(&self, project: Project, expected_version: u64) -> ReliefResult<Project>;

    /// Remove the project and every segment, mesh, scene and export job
    /// derived from it.
    fn delete_project(&self, id: &ProjectId) -> ReliefResult<()>;

    /// Mark the project's current segments superseded and append `segments`.
    fn replace_segments(&self, project: &ProjectId, segments: Vec<Segment>) -> ReliefResult<()>;

    /// All segments of a project, superseded ones included, in creation order.
    fn segments(&self, project: &ProjectId) -> ReliefResult<Vec<Segment>>;

    /// Append new mesh versions. Each asset's segment must belong to a stored
    /// project and its version must be exactly one past the latest stored
    /// version for that segment; on any mismatch nothing is appended.
    fn append_meshes(&self, meshes: Vec<MeshAsset>) -> ReliefResult<()>;

    fn get_mesh(&self, id: &MeshId) -> ReliefResult<MeshAsset>;

    /// Every version for a segment, oldest first.
    fn mesh_versions(&self, segment: &SegmentId) -> ReliefResult<Vec<MeshAsset>>;

    /// Store a new scene as the project's current scene.
    fn create_scene(&self, scene: Scene) -> ReliefResult<()>;

    fn get_scene(&self, id: &SceneId) -> ReliefResult<Scene>;

    fn scene_for_project(&self, project: &ProjectId) -> ReliefResult<Option<Scene>>;

    /// Replace the stored scene if it is still at `expected_version`.
    fn update_scene(&self, scene: Scene, expected_version: u64) -> ReliefResult<()>;

    /// Record the artifact of the latest export without touching the
    /// scene's edit version.
    fn set_scene_artifact(&self, id: &SceneId, artifact: BlobRef) -> ReliefResult<()>;

    fn delete_scene(&self, id: &SceneId) -> ReliefResult<()>;

    fn put_export_job(&self, job: ExportJob) -> ReliefResult<()>;

    fn get_export_job(&self, id: &ExportJobId) -> ReliefResult<ExportJob>;

    /// Export jobs of a scene, oldest first.
    fn export_jobs(&self, scene: &SceneId) -> ReliefResult<Vec<ExportJob>>;
}

#[derive(Debug, Default)]
struct Records {
    projects: HashMap<ProjectId, Project>,
    segments: HashMap<ProjectId, Vec<Segment>>,
    segment_owner: HashMap<SegmentId, ProjectId>,
    meshes: HashMap<SegmentId, Vec<MeshAsset>>,
    mesh_index: HashMap<MeshId, (SegmentId, usize)>,
    scenes: HashMap<SceneId, Scene>,
    project_scene: HashMap<ProjectId, SceneId>,
    exports: HashMap<ExportJobId, ExportJob>,
    scene_exports: HashMap<SceneId, Vec<ExportJobId>>,
}

impl Records {
    fn remove_scene(&mut self, id: &SceneId) {
        if let Some(scene) = self.scenes.remove(id) {
            if self.project_scene.get(&scene.project_id) == Some(id) {
                self.project_scene.remove(&scene.project_id);
            }
        }
        for job in self.scene_exports.remove(id).unwrap_or_default() {
            self.exports.remove(&job);
        }
    }
}

/// Metadata held in process memory behind one lock.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<Records>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn create_project(&self, project: Project) -> ReliefResult<()> {
        let mut records = self.records.write();
        if records.projects.contains_key(&project.id) {
            return Err(ReliefError::validation(format!("project {} already exists", project.id)));
        }
        records.projects.insert(project.id.clone(), project);
        Ok(())
    }

    fn get_project(&self, id: &ProjectId) -> ReliefResult<Project> {
        self.records
            .read()
            .projects
            .get(id)
            .cloned()
            .ok_or_else(|| ReliefError::not_found(format!("project {}", id)))
    }

    fn update_project(&self, mut project: Project, expected_version: u64) -> ReliefResult<Project> {
        let mut records = self.records.write();
        let stored = records
            .projects
            .get_mut(&project.id)
            .ok_or_else(|| ReliefError::not_found(format!("project {}", project.id)))?;
        if stored.version != expected_version {
            return Err(ReliefError::conflict(
                format!("project {}", project.id),
                expected_version,
                stored.version,
            ));
        }
        project.version = expected_version + 1;
        *stored = project.clone();
        Ok(project)
    }

    fn delete_project(&self, id: &ProjectId) -> ReliefResult<()> {
        let mut records = self.records.write();
        if records.projects.remove(id).is_none() {
            return Err(ReliefError::not_found(format!("project {}", id)));
        }
        for segment in records.segments.remove(id).unwrap_or_default() {
            records.segment_owner.remove(&segment.id);
            for mesh in records.meshes.remove(&segment.id).unwrap_or_default() {
                records.mesh_index.remove(&mesh.id);
            }
        }
        let scenes: Vec<SceneId> = records
            .scenes
            .values()
            .filter(|s| &s.project_id == id)
            .map(|s| s.id.clone())
            .collect();
        for scene in scenes {
            records.remove_scene(&scene);
        }
        records.project_scene.remove(id);
        Ok(())
    }

    fn replace_segments(&self, project: &ProjectId, segments: Vec<Segment>) -> ReliefResult<()> {
        let mut records = self.records.write();
        if !records.projects.contains_key(project) {
            return Err(ReliefError::not_found(format!("project {}", project)));
        }
        for segment in &segments {
            records.segment_owner.insert(segment.id.clone(), project.clone());
        }
        let list = records.segments.entry(project.clone()).or_default();
        for old in list.iter_mut() {
            old.superseded = true;
        }
        list.extend(segments);
        Ok(())
    }

    fn segments(&self, project: &ProjectId) -> ReliefResult<Vec<Segment>> {
        Ok(self
            .records
            .read()
            .segments
            .get(project)
            .cloned()
            .unwrap_or_default())
    }

    fn append_meshes(&self, meshes: Vec<MeshAsset>) -> ReliefResult<()> {
        let mut records = self.records.write();
        let mut next: HashMap<SegmentId, u32> = HashMap::new();
        for mesh in &meshes {
            let owned = records
                .segment_owner
                .get(&mesh.segment_id)
                .is_some_and(|project| records.projects.contains_key(project));
            if !owned {
                return Err(ReliefError::not_found(format!("segment {}", mesh.segment_id)));
            }
            let latest = *next.entry(mesh.segment_id.clone()).or_insert_with(|| {
                records
                    .meshes
                    .get(&mesh.segment_id)
                    .and_then(|v| v.last())
                    .map(|m| m.version)
                    .unwrap_or(0)
            });
            if mesh.version != latest + 1 {
                return Err(ReliefError::conflict(
                    format!("meshes of segment {}", mesh.segment_id),
                    mesh.version.saturating_sub(1) as u64,
                    latest as u64,
                ));
            }
            next.insert(mesh.segment_id.clone(), mesh.version);
        }
        for mesh in meshes {
            let list = records.meshes.entry(mesh.segment_id.clone()).or_default();
            let position = list.len();
            let key = (mesh.segment_id.clone(), position);
            let id = mesh.id.clone();
            list.push(mesh);
            records.mesh_index.insert(id, key);
        }
        Ok(())
    }

    fn get_mesh(&self, id: &MeshId) -> ReliefResult<MeshAsset> {
        let records = self.records.read();
        records
            .mesh_index
            .get(id)
            .and_then(|(segment, i)| records.meshes.get(segment).and_then(|v| v.get(*i)))
            .cloned()
            .ok_or_else(|| ReliefError::not_found(format!("mesh {}", id)))
    }

    fn mesh_versions(&self, segment: &SegmentId) -> ReliefResult<Vec<MeshAsset>> {
        Ok(self
            .records
            .read()
            .meshes
            .get(segment)
            .cloned()
            .unwrap_or_default())
    }

    fn create_scene(&self, scene: Scene) -> ReliefResult<()> {
        let mut records = self.records.write();
        if !records.projects.contains_key(&scene.project_id) {
            return Err(ReliefError::not_found(format!("project {}", scene.project_id)));
        }
        if let Some(previous) = records.project_scene.get(&scene.project_id).cloned() {
            records.remove_scene(&previous);
        }
        records
            .project_scene
            .insert(scene.project_id.clone(), scene.id.clone());
        records.scenes.insert(scene.id.clone(), scene);
        Ok(())
    }

    fn get_scene(&self, id: &SceneId) -> ReliefResult<Scene> {
        self.records
            .read()
            .scenes
            .get(id)
            .cloned()
            .ok_or_else(|| ReliefError::not_found(format!("scene {}", id)))
    }

    fn scene_for_project(&self, project: &ProjectId) -> ReliefResult<Option<Scene>> {
        let records = self.records.read();
        Ok(records
            .project_scene
            .get(project)
            .and_then(|id| records.scenes.get(id))
            .cloned())
    }

    fn update_scene(&self, scene: Scene, expected_version: u64) -> ReliefResult<()> {
        let mut records = self.records.write();
        let stored = records
            .scenes
            .get_mut(&scene.id)
            .ok_or_else(|| ReliefError::not_found(format!("scene {}", scene.id)))?;
        if stored.version != expected_version {
            return Err(ReliefError::conflict(
                format!("scene {}", scene.id),
                expected_version,
                stored.version,
            ));
        }
        *stored = scene;
        Ok(())
    }

    fn set_scene_artifact(&self, id: &SceneId, artifact: BlobRef) -> ReliefResult<()> {
        let mut records = self.records.write();
        let stored = records
            .scenes
            .get_mut(id)
            .ok_or_else(|| ReliefError::not_found(format!("scene {}", id)))?;
        stored.export_artifact = Some(artifact);
        Ok(())
    }

    fn delete_scene(&self, id: &SceneId) -> ReliefResult<()> {
        let mut records = self.records.write();
        if !records.scenes.contains_key(id) {
            return Err(ReliefError::not_found(format!("scene {}", id)));
        }
        records.remove_scene(id);
        Ok(())
    }

    fn put_export_job(&self, job: ExportJob) -> ReliefResult<()> {
        let mut records = self.records.write();
        if !records.scenes.contains_key(&job.scene_id) {
            return Err(ReliefError::not_found(format!("scene {}", job.scene_id)));
        }
        let jobs = records.scene_exports.entry(job.scene_id.clone()).or_default();
        if !jobs.contains(&job.id) {
            jobs.push(job.id.clone());
        }
        records.exports.insert(job.id.clone(), job);
        Ok(())
    }

    fn get_export_job(&self, id: &ExportJobId) -> ReliefResult<ExportJob> {
        self.records
            .read()
            .exports
            .get(id)
            .cloned()
            .ok_or_else(|| ReliefError::not_found(format!("export job {}", id)))
    }

    fn export_jobs(&self, scene: &SceneId) -> ReliefResult<Vec<ExportJob>> {
        let records = self.records.read();
        Ok(records
            .scene_exports
            .get(scene)
            .map(|ids| ids.iter().filter_map(|id| records.exports.get(id)).cloned().collect())
            .unwrap_or_default())
    }
}
