/// Statistical outlier removal over a depth grid.
///
/// For every valid pixel the mean absolute depth difference to its
/// `neighbors` nearest valid grid neighbours is computed. Pixels whose mean
/// exceeds `mean + std_ratio * std` of those values across the grid are
/// marked invalid. Pixels without any valid neighbour are left alone.
///
/// Returns the number of pixels removed.
pub fn remove_outliers(
    depth: &[f64],
    valid: &mut [bool],
    width: u32,
    height: u32,
    neighbors: usize,
    std_ratio: f64,
) -> usize {
    if neighbors == 0 {
        return 0;
    }
    let (w, h) = (width as i64, height as i64);
    let offsets = neighbour_offsets(neighbors);

    let mean_distance: Vec<Option<f64>> = (0..depth.len())
        .map(|i| {
            if !valid[i] {
                return None;
            }
            let (x, y) = (i as i64 % w, i as i64 / w);
            let d = depth[i];
            let (sum, count) = offsets
                .iter()
                .filter_map(|&(dx, dy)| {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        return None;
                    }
                    let j = (ny * w + nx) as usize;
                    valid[j].then(|| (depth[j] - d).abs())
                })
                .take(neighbors)
                .fold((0.0, 0usize), |(s, n), diff| (s + diff, n + 1));
            (count > 0).then(|| sum / count as f64)
        })
        .collect();

    let (sum, sum_sq, n) = mean_distance
        .iter()
        .flatten()
        .fold((0.0, 0.0, 0usize), |(s, sq, n), &m| (s + m, sq + m * m, n + 1));
    if n == 0 {
        return 0;
    }
    let mean = sum / n as f64;
    let std = (sum_sq / n as f64 - mean * mean).max(0.0).sqrt();
    let limit = mean + std_ratio * std;

    let mut removed = 0;
    for (flag, m) in valid.iter_mut().zip(&mean_distance) {
        if matches!(m, Some(m) if *m > limit) {
            *flag = false;
            removed += 1;
        }
    }
    removed
}

/// Offsets of the smallest square window holding at least `k` neighbours,
/// nearest first. Ties are broken row-major so the order is deterministic.
fn neighbour_offsets(k: usize) -> Vec<(i64, i64)> {
    let mut radius: i64 = 1;
    while ((2 * radius + 1) * (2 * radius + 1) - 1) < k as i64 {
        radius += 1;
    }
    let mut offsets: Vec<(i64, i64)> = (-radius..=radius)
        .flat_map(|dy| (-radius..=radius).map(move |dx| (dx, dy)))
        .filter(|&o| o != (0, 0))
        .collect();
    offsets.sort_by_key(|&(dx, dy)| (dx * dx + dy * dy, dy, dx));
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(w: u32, h: u32, d: f64) -> (Vec<f64>, Vec<bool>) {
        let n = (w * h) as usize;
        (vec![d; n], vec![true; n])
    }

    #[test]
    fn test_window_grows_with_neighbour_count() {
        assert_eq!(neighbour_offsets(8).len(), 8);
        assert_eq!(neighbour_offsets(20).len(), 24);
        let offsets = neighbour_offsets(4);
        assert!(offsets[..4].iter().all(|&(dx, dy)| dx * dx + dy * dy == 1));
    }

    #[test]
    fn test_flat_plane_keeps_everything() {
        let (depth, mut valid) = plane(16, 16, 1.0);
        assert_eq!(remove_outliers(&depth, &mut valid, 16, 16, 20, 2.0), 0);
        assert!(valid.iter().all(|v| *v));
    }

    #[test]
    fn test_single_spike_is_removed() {
        let (mut depth, mut valid) = plane(16, 16, 1.0);
        let spike = 8 * 16 + 8;
        depth[spike] = 1.05;
        assert_eq!(remove_outliers(&depth, &mut valid, 16, 16, 20, 2.0), 1);
        assert!(!valid[spike]);
        assert_eq!(valid.iter().filter(|v| **v).count(), 255);
    }

    #[test]
    fn test_invalid_pixels_are_not_neighbours() {
        let (mut depth, mut valid) = plane(8, 8, 1.0);
        // a far-away masked-out pixel must not make its neighbours look noisy
        depth[0] = 50.0;
        valid[0] = false;
        assert_eq!(remove_outliers(&depth, &mut valid, 8, 8, 20, 2.0), 0);
    }

    #[test]
    fn test_zero_neighbours_disables_filter() {
        let (mut depth, mut valid) = plane(8, 8, 1.0);
        depth[27] = 9.0;
        assert_eq!(remove_outliers(&depth, &mut valid, 8, 8, 0, 2.0), 0);
        assert!(valid[27]);
    }
}
