use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relief_core::{ExportFormat, FrameBuffer, ReliefConfig};
use relief_encode::Artifact;
use relief_mesh::{write_mesh, DepthMap, Mask, MeshBuilder, MeshFormat};
use relief_pipeline::{
    AlphaSegmenter, BlobStore, ExportRequest, FsBlobStore, PipelineOrchestrator, Services,
    StaticDepth,
};
use relief_scene::{ProjectId, Stage, UserId};

#[derive(Parser)]
#[command(
    name = "relief",
    version,
    about = "Relief: turn a single image into an orbiting 3D scene",
    long_about = "Relief reconstructs a textured mesh from an image and its depth map,\ncomposes it into a scene and renders an orbit as a looping image or video."
)]
struct Cli {
    /// Configuration file (default: relief.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole pipeline: segment, reconstruct, compose and export
    Build {
        /// Source images (cutouts with transparency are segmented by alpha)
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Grayscale depth map per source image, brighter is farther
        #[arg(short, long, required = true)]
        depth: Vec<PathBuf>,

        /// Output file for the rendered orbit
        #[arg(short, long, default_value = "output/relief.gif")]
        output: PathBuf,

        /// Export format: loop-image or video (default from config)
        #[arg(short, long)]
        format: Option<String>,

        /// Frames per second (default from config)
        #[arg(long)]
        fps: Option<f64>,

        /// Output width in pixels
        #[arg(long)]
        width: Option<u32>,

        /// Output height in pixels
        #[arg(long)]
        height: Option<u32>,

        /// Number of orbit samples
        #[arg(long)]
        frames: Option<u32>,

        /// Also write each reconstructed mesh (.obj or .ply)
        #[arg(long)]
        mesh_out: Option<PathBuf>,

        /// Write the self-describing artifact container instead of the raw payload
        #[arg(long)]
        container: bool,

        /// Directory for the content-addressed blob store
        #[arg(long, default_value = ".relief/blobs")]
        store: PathBuf,
    },

    /// Reconstruct a single mesh without rendering
    Mesh {
        /// Source image used as the texture
        #[arg()]
        image: PathBuf,

        /// Grayscale depth map, brighter is farther
        #[arg(short, long)]
        depth: PathBuf,

        /// Optional mask image (alpha or luminance); the full frame otherwise
        #[arg(short, long)]
        mask: Option<PathBuf>,

        /// Output mesh path (.obj or .ply)
        #[arg(short, long, default_value = "output/mesh.obj")]
        output: PathBuf,
    },

    /// Print the metadata of an artifact container
    Info {
        #[arg()]
        artifact: PathBuf,
    },

    /// Manage configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default configuration
    Init {
        #[arg(default_value = "relief.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate a configuration file
    Check {
        #[arg(default_value = "relief.toml")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Build {
            images,
            depth,
            output,
            format,
            fps,
            width,
            height,
            frames,
            mesh_out,
            container,
            store,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(frames) = frames {
                config.pipeline.orbit_frames = frames;
            }
            let request = ExportRequest {
                format: format
                    .as_deref()
                    .map(str::parse::<ExportFormat>)
                    .transpose()?,
                width,
                height,
                fps,
                ..ExportRequest::default()
            };
            cmd_build(
                config,
                &images,
                &depth,
                request,
                &output,
                mesh_out.as_deref(),
                container,
                &store,
            )
        }
        Commands::Mesh {
            image,
            depth,
            mask,
            output,
        } => {
            let config = load_config(cli.config.as_deref())?;
            cmd_mesh(&config, &image, &depth, mask.as_deref(), &output)
        }
        Commands::Info { artifact } => cmd_info(&artifact),
        Commands::Config { action } => match action {
            ConfigAction::Init { path, force } => {
                if path.exists() && !force {
                    anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
                }
                ReliefConfig::default()
                    .save_to_file(&path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("📝 Wrote default configuration to {}", path.display());
                Ok(())
            }
            ConfigAction::Check { path } => {
                ReliefConfig::load_from_file(&path)
                    .with_context(|| format!("invalid configuration: {}", path.display()))?;
                println!("✓ {} is valid", path.display());
                Ok(())
            }
        },
    }
}

/// An explicit path must load; the implicit `relief.toml` is best-effort.
fn load_config(path: Option<&Path>) -> Result<ReliefConfig> {
    match path {
        Some(path) => ReliefConfig::load_from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => {
            let default = Path::new("relief.toml");
            if default.exists() {
                ReliefConfig::load_from_file(default)
                    .with_context(|| format!("failed to load config {}", default.display()))
            } else {
                Ok(ReliefConfig::default())
            }
        }
    }
}

fn read_image(path: &Path) -> Result<(Vec<u8>, FrameBuffer)> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let frame = FrameBuffer::decode(&bytes)
        .with_context(|| format!("failed to decode {}", path.display()))?;
    Ok((bytes, frame))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    Ok(())
}

/// `mesh.obj` → `mesh_2.obj` for the second of several meshes.
fn indexed_path(path: &Path, index: usize, total: usize) -> PathBuf {
    if total <= 1 {
        return path.to_path_buf();
    }
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, index + 1, ext.to_string_lossy()),
        None => format!("{}_{}", stem, index + 1),
    };
    path.with_file_name(name)
}

fn mesh_format(path: &Path) -> Result<MeshFormat> {
    MeshFormat::from_path(path)
        .with_context(|| format!("unsupported mesh extension: {} (use .obj or .ply)", path.display()))
}

#[allow(clippy::too_many_arguments)]
fn cmd_build(
    config: ReliefConfig,
    images: &[PathBuf],
    depth: &[PathBuf],
    request: ExportRequest,
    output: &Path,
    mesh_out: Option<&Path>,
    container: bool,
    store: &Path,
) -> Result<()> {
    let start = Instant::now();
    if images.len() != depth.len() {
        anyhow::bail!(
            "got {} images but {} depth maps; pass one --depth per image",
            images.len(),
            depth.len()
        );
    }
    if let Some(path) = mesh_out {
        mesh_format(path)?;
    }

    let depth_provider = Arc::new(StaticDepth::new());
    let mut uploads = Vec::with_capacity(images.len());
    for (image_path, depth_path) in images.iter().zip(depth) {
        let (bytes, image) = read_image(image_path)?;
        let (_, depth_image) = read_image(depth_path)?;
        if (depth_image.width, depth_image.height) != (image.width, image.height) {
            anyhow::bail!(
                "depth map {} is {}x{} but {} is {}x{}",
                depth_path.display(),
                depth_image.width,
                depth_image.height,
                image_path.display(),
                image.width,
                image.height
            );
        }
        depth_provider.register(&image, DepthMap::from_image(&depth_image));
        uploads.push(bytes);
    }

    let blobs: Arc<dyn BlobStore> = Arc::new(
        FsBlobStore::open(store)
            .with_context(|| format!("failed to open blob store {}", store.display()))?,
    );
    let services = Services::in_memory(Arc::new(AlphaSegmenter), depth_provider).with_blobs(blobs);
    let orchestrator = PipelineOrchestrator::new(config, services)?;

    println!("🧊 Relief build");
    println!("   Images:    {}", images.len());
    println!("   Output:    {}", output.display());
    println!();

    let project = orchestrator.create_project(UserId::new("cli"), &uploads)?;
    for stage in [Stage::Segmentation, Stage::Reconstruction, Stage::Composition] {
        run_stage(&orchestrator, &project.id, stage, None)?;
    }

    if let Some(path) = mesh_out {
        let scene = orchestrator.scene(&project.id)?;
        let total = scene.graph.len();
        for (i, (_, object)) in scene.graph.iter().enumerate() {
            let mesh = orchestrator.mesh(&object.mesh)?;
            let target = indexed_path(path, i, total);
            ensure_parent(&target)?;
            write_mesh(&mesh.geometry, &target, mesh_format(&target)?)?;
            println!(
                "   Mesh:      {} ({} vertices, {} triangles)",
                target.display(),
                mesh.geometry.vertex_count(),
                mesh.geometry.triangle_count()
            );
        }
    }

    run_stage(&orchestrator, &project.id, Stage::Render, Some(request))?;
    let artifact = orchestrator.artifact(&project.id)?;

    ensure_parent(output)?;
    let bytes = if container {
        artifact.to_bytes()?
    } else {
        artifact.payload.clone()
    };
    std::fs::write(output, &bytes)
        .with_context(|| format!("failed to write {}", output.display()))?;

    let meta = &artifact.metadata;
    println!();
    println!("✓ Exported {}", output.display());
    println!("   Format:    {} ({:?})", meta.format, meta.codec);
    println!("   Size:      {}x{}", meta.width, meta.height);
    println!("   Frames:    {} @ {} fps", meta.frame_count, meta.fps);
    println!("   Duration:  {:.3}s", meta.duration_seconds);
    println!("   Bytes:     {}", bytes.len());
    println!("   Elapsed:   {:.2?}", start.elapsed());
    Ok(())
}

fn run_stage(
    orchestrator: &PipelineOrchestrator,
    project: &ProjectId,
    stage: Stage,
    request: Option<ExportRequest>,
) -> Result<()> {
    let started = Instant::now();
    let job = match request {
        Some(request) => orchestrator.enqueue_export(project, request)?,
        None => orchestrator.enqueue_stage(project, stage)?,
    };
    tracing::info!(project = %project, stage = stage.as_str(), "stage queued");
    match job.join() {
        Ok(_) => {
            tracing::info!(
                project = %project,
                stage = stage.as_str(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "stage finished"
            );
            println!("   ✓ {:<15} {:.2?}", stage.as_str(), started.elapsed());
            Ok(())
        }
        Err(failure) => anyhow::bail!("{} failed ({}): {}", stage, failure.kind, failure.message),
    }
}

fn cmd_mesh(
    config: &ReliefConfig,
    image: &Path,
    depth: &Path,
    mask: Option<&Path>,
    output: &Path,
) -> Result<()> {
    let format = mesh_format(output)?;
    let (_, texture) = read_image(image)?;
    let (_, depth_image) = read_image(depth)?;
    let mask = match mask {
        Some(path) => Mask::from_image(&read_image(path)?.1),
        None => Mask::full(texture.width, texture.height),
    };

    let built = MeshBuilder::new(config.mesh.clone())
        .build(&DepthMap::from_image(&depth_image), &mask, &texture, None)
        .context("reconstruction failed")?;
    ensure_parent(output)?;
    write_mesh(&built.geometry, output, format)?;

    let stats = &built.stats;
    println!("✓ Wrote {}", output.display());
    println!("   Vertices:  {}", stats.vertex_count);
    println!("   Triangles: {}", stats.triangle_count);
    println!(
        "   Coverage:  {:.1}% of {} masked pixels",
        stats.survival_fraction() * 100.0,
        stats.masked_pixels
    );
    println!(
        "   Removed:   {} outlier pixels, {} degenerate, {} duplicate",
        stats.removed_outliers, stats.removed_degenerate, stats.removed_duplicate
    );
    Ok(())
}

fn cmd_info(path: &Path) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let artifact = Artifact::from_bytes(&bytes)
        .with_context(|| format!("{} is not a Relief artifact container", path.display()))?;
    let meta = &artifact.metadata;
    tracing::info!(
        path = %path.display(),
        frames = meta.frame_count,
        payload_bytes = artifact.payload.len(),
        "read artifact container"
    );
    println!("{}", serde_json::to_string_pretty(meta)?);
    if let Some(last) = meta.frame_count.checked_sub(1).and_then(|i| meta.timestamp(i)) {
        println!("Last frame at {}", last);
    }
    Ok(())
}
