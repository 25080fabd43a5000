//! Wavefront OBJ and ASCII PLY writers.

use std::fmt::Write as _;
use std::path::Path;

use relief_core::ReliefResult;
use relief_scene::MeshGeometry;

/// Mesh file formats supported by [`write_mesh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    Obj,
    Ply,
}

impl MeshFormat {
    /// Format implied by a file extension (`.obj` / `.ply`).
    pub fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("obj") => Some(MeshFormat::Obj),
            Some("ply") => Some(MeshFormat::Ply),
            _ => None,
        }
    }
}

/// OBJ text with `v`, `vt` and 1-based `f v/vt` records. UV `v` is flipped so
/// OBJ's bottom-left origin matches the texture.
pub fn to_obj(geometry: &MeshGeometry, texture_name: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# relief mesh");
    if let Some(name) = texture_name {
        let _ = writeln!(out, "# texture {}", name);
    }
    for v in &geometry.vertices {
        let _ = writeln!(out, "v {} {} {}", v.x, v.y, v.z);
    }
    for uv in &geometry.uvs {
        let _ = writeln!(out, "vt {} {}", uv.x, 1.0 - uv.y);
    }
    for t in &geometry.triangles {
        let (a, b, c) = (t[0] + 1, t[1] + 1, t[2] + 1);
        let _ = writeln!(out, "f {a}/{a} {b}/{b} {c}/{c}");
    }
    out
}

/// ASCII PLY with per-vertex `s`/`t` texture coordinates.
pub fn to_ply(geometry: &MeshGeometry) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "ply");
    let _ = writeln!(out, "format ascii 1.0");
    let _ = writeln!(out, "comment relief mesh");
    let _ = writeln!(out, "element vertex {}", geometry.vertex_count());
    for prop in ["x", "y", "z", "s", "t"] {
        let _ = writeln!(out, "property double {}", prop);
    }
    let _ = writeln!(out, "element face {}", geometry.triangle_count());
    let _ = writeln!(out, "property list uchar uint vertex_indices");
    let _ = writeln!(out, "end_header");
    for (v, uv) in geometry.vertices.iter().zip(&geometry.uvs) {
        let _ = writeln!(out, "{} {} {} {} {}", v.x, v.y, v.z, uv.x, 1.0 - uv.y);
    }
    for t in &geometry.triangles {
        let _ = writeln!(out, "3 {} {} {}", t[0], t[1], t[2]);
    }
    out
}

pub fn write_mesh(geometry: &MeshGeometry, path: &Path, format: MeshFormat) -> ReliefResult<()> {
    let text = match format {
        MeshFormat::Obj => to_obj(geometry, None),
        MeshFormat::Ply => to_ply(geometry),
    };
    std::fs::write(path, text)?;
    tracing::info!(path = %path.display(), ?format, "wrote mesh");
    Ok(())
}
