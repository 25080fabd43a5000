use std::collections::HashSet;

use glam::{DVec2, DVec3};
use relief_scene::MeshGeometry;

/// Counts of triangles dropped by [`cleanup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub degenerate: usize,
    pub duplicate: usize,
    pub unreferenced_vertices: usize,
}

/// A triangle is degenerate when it repeats an index or has (near) zero area
/// relative to its longest edge.
pub fn is_degenerate(vertices: &[DVec3], tri: [u32; 3]) -> bool {
    let [a, b, c] = tri;
    if a == b || b == c || a == c {
        return true;
    }
    let (pa, pb, pc) = (
        vertices[a as usize],
        vertices[b as usize],
        vertices[c as usize],
    );
    let twice_area = (pb - pa).cross(pc - pa).length();
    let longest = (pb - pa)
        .length_squared()
        .max((pc - pb).length_squared())
        .max((pa - pc).length_squared());
    twice_area <= 1e-12 * longest
}

/// Remove degenerate and duplicate triangles, then drop vertices no triangle
/// references. Triangle order is otherwise preserved.
pub fn cleanup(geometry: &mut MeshGeometry) -> CleanupReport {
    let mut report = CleanupReport::default();
    let mut seen: HashSet<[u32; 3]> = HashSet::with_capacity(geometry.triangles.len());
    let vertices = &geometry.vertices;
    geometry.triangles.retain(|tri| {
        if is_degenerate(vertices, *tri) {
            report.degenerate += 1;
            return false;
        }
        let mut key = *tri;
        key.sort_unstable();
        if !seen.insert(key) {
            report.duplicate += 1;
            return false;
        }
        true
    });
    report.unreferenced_vertices = compact(geometry);
    report
}

/// Drop unreferenced vertices, renumbering in first-reference order.
/// Returns how many vertices were removed.
pub fn compact(geometry: &mut MeshGeometry) -> usize {
    const UNUSED: u32 = u32::MAX;
    let before = geometry.vertices.len();
    let mut remap = vec![UNUSED; before];
    let mut vertices: Vec<DVec3> = Vec::with_capacity(before);
    let mut uvs: Vec<DVec2> = Vec::with_capacity(before);
    for tri in geometry.triangles.iter_mut() {
        for idx in tri.iter_mut() {
            let old = *idx as usize;
            if remap[old] == UNUSED {
                remap[old] = vertices.len() as u32;
                vertices.push(geometry.vertices[old]);
                uvs.push(geometry.uvs[old]);
            }
            *idx = remap[old];
        }
    }
    geometry.vertices = vertices;
    geometry.uvs = uvs;
    before - geometry.vertices.len()
}
