use std::collections::{HashMap, HashSet};

use glam::{DVec2, DVec3};
use relief_core::Bounds3;
use relief_scene::MeshGeometry;

/// Reduce `geometry` to at most `target` triangles by vertex clustering.
///
/// Vertices are snapped to a uniform grid over the mesh bounds and merged per
/// cell (position and UV averaged). The grid coarsens until the budget is
/// met; if even one cell per axis is over budget, that coarsest result is
/// returned and may exceed `target` or be empty. Deterministic for identical
/// input.
pub fn decimate(geometry: &MeshGeometry, target: usize) -> MeshGeometry {
    if geometry.triangles.len() <= target {
        return geometry.clone();
    }
    let Some(bounds) = geometry.bounds() else {
        return geometry.clone();
    };

    let mut resolution = ((geometry.vertex_count() as f64).sqrt().ceil() as u32).max(1);
    loop {
        let out = cluster(geometry, &bounds, resolution);
        if out.triangles.len() <= target || resolution == 1 {
            return out;
        }
        resolution = (resolution * 3 / 4).max(1);
    }
}

fn cluster(geometry: &MeshGeometry, bounds: &Bounds3, resolution: u32) -> MeshGeometry {
    let extent = bounds.extent();
    let cell = (extent.max_element() / resolution as f64).max(f64::MIN_POSITIVE);

    let mut cells: HashMap<(i64, i64, i64), u32> = HashMap::new();
    let mut sums: Vec<(DVec3, DVec2, u32)> = Vec::new();
    let mut remap = Vec::with_capacity(geometry.vertices.len());
    for (p, uv) in geometry.vertices.iter().zip(&geometry.uvs) {
        let rel = (*p - bounds.min) / cell;
        let key = (
            rel.x.floor() as i64,
            rel.y.floor() as i64,
            rel.z.floor() as i64,
        );
        let idx = *cells.entry(key).or_insert_with(|| {
            sums.push((DVec3::ZERO, DVec2::ZERO, 0));
            (sums.len() - 1) as u32
        });
        let s = &mut sums[idx as usize];
        s.0 += *p;
        s.1 += *uv;
        s.2 += 1;
        remap.push(idx);
    }

    let vertices = sums.iter().map(|(p, _, n)| *p / *n as f64).collect();
    let uvs = sums.iter().map(|(_, uv, n)| *uv / *n as f64).collect();

    let mut seen = HashSet::new();
    let mut triangles = Vec::new();
    for tri in &geometry.triangles {
        let t = [
            remap[tri[0] as usize],
            remap[tri[1] as usize],
            remap[tri[2] as usize],
        ];
        if t[0] == t[1] || t[1] == t[2] || t[0] == t[2] {
            continue;
        }
        let mut key = t;
        key.sort_unstable();
        if seen.insert(key) {
            triangles.push(t);
        }
    }

    let mut out = MeshGeometry {
        vertices,
        uvs,
        triangles,
    };
    crate::cleanup::cleanup(&mut out);
    out
}
