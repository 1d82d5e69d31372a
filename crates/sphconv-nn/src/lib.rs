//! sphconv-nn — neighbor tables for 3D range search (exact grid; kd/LBVH later).
//!
//! The binning operators consume externally computed neighbor lists. This
//! crate supplies them: a uniform grid hash over the database cloud, queried
//! by position, packed into the fixed-stride `NeighborTable` layout.

use anyhow::{ensure, Result};
use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use rayon::prelude::*;
use smallvec::SmallVec;
use sphconv_core::{CloudView, NeighborTable};

#[derive(Copy, Clone, Debug)]
pub struct Neighbor { pub idx: usize, pub dist: f32 }

/// Uniform grid hash, cell size = r (good for radius queries).
pub struct GridIndex<'a> {
    pts: CloudView<'a>,
    cell: f32,
    buckets: HashMap<[i32; 3], Vec<usize>>,
}

impl<'a> GridIndex<'a> {
    pub fn build(pts: CloudView<'a>, cell: f32) -> Self {
        let mut buckets: HashMap<[i32; 3], Vec<usize>> = HashMap::new();
        let inv = 1.0 / cell.max(1e-12);
        for i in 0..pts.len() {
            let key = [
                (pts.x[i] * inv).floor() as i32,
                (pts.y[i] * inv).floor() as i32,
                (pts.z[i] * inv).floor() as i32,
            ];
            match buckets.entry(key) {
                Entry::Vacant(v) => { v.insert(vec![i]); }
                Entry::Occupied(mut o) => o.get_mut().push(i),
            }
        }
        Self { pts, cell, buckets }
    }

    fn key_of(&self, p: [f32; 3]) -> [i32; 3] {
        let inv = 1.0 / self.cell;
        [
            (p[0] * inv).floor() as i32,
            (p[1] * inv).floor() as i32,
            (p[2] * inv).floor() as i32,
        ]
    }

    /// All database points within `r` of an arbitrary position.
    /// Includes zero-distance hits (a query colocated with a database point
    /// reports it), which downstream binning routes to the center bin.
    pub fn radius_at(&self, p: [f32; 3], r: f32) -> SmallVec<[Neighbor; 128]> {
        let mut out = SmallVec::<[Neighbor; 128]>::new();
        let base = self.key_of(p);
        let r2 = r * r;
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let key = [base[0] + dx, base[1] + dy, base[2] + dz];
                    if let Some(bin) = self.buckets.get(&key) {
                        for &j in bin {
                            let d2 = (self.pts.x[j] - p[0]).powi(2)
                                + (self.pts.y[j] - p[1]).powi(2)
                                + (self.pts.z[j] - p[2]).powi(2);
                            if d2 <= r2 {
                                out.push(Neighbor { idx: j, dist: d2.sqrt() });
                            }
                        }
                    }
                }
            }
        }
        out
    }
}

/// Range-search every query point against `database` and pack the results
/// into a `NeighborTable` with stride `max_neighbors`. Hits are sorted by
/// distance and truncated to the stride; `count` records how many survived.
pub fn build_neighbor_table(
    database: CloudView,
    query: CloudView,
    radius: f32,
    max_neighbors: usize,
) -> Result<NeighborTable> {
    ensure!(radius > 0.0 && radius.is_finite(), "search radius must be positive, got {}", radius);
    ensure!(max_neighbors > 0, "max_neighbors must be at least 1");

    let index = GridIndex::build(database, radius);
    let rows: Vec<SmallVec<[Neighbor; 128]>> = (0..query.len())
        .into_par_iter()
        .map(|m| {
            let mut hits = index.radius_at(query.point(m), radius);
            hits.sort_by(|a, b| a.dist.total_cmp(&b.dist).then(a.idx.cmp(&b.idx)));
            hits.truncate(max_neighbors);
            hits
        })
        .collect();

    let k = max_neighbors;
    let mut idx_col = vec![0i32; rows.len() * k];
    let mut dist_col = vec![0.0f32; rows.len() * k];
    let mut count_col = vec![0i32; rows.len()];
    for (m, hits) in rows.iter().enumerate() {
        count_col[m] = hits.len() as i32;
        for (s, h) in hits.iter().enumerate() {
            idx_col[m * k + s] = h.idx as i32;
            dist_col[m * k + s] = h.dist;
        }
    }
    NeighborTable::from_parts(k, idx_col, count_col, dist_col)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sphconv_core::Cloud;

    fn line_cloud() -> Cloud {
        let mut c = Cloud::default();
        for i in 0..10 {
            c.push(i as f32 * 0.1, 0.0, 0.0);
        }
        c
    }

    #[test]
    fn radius_at_finds_in_range_points() {
        let c = line_cloud();
        let g = GridIndex::build((&c).into(), 0.25);
        let hits = g.radius_at([0.0, 0.0, 0.0], 0.25);
        // points at 0.0, 0.1, 0.2
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().any(|h| h.dist < 1e-6));
    }

    #[test]
    fn table_rows_sorted_and_truncated() {
        let c = line_cloud();
        let v: CloudView = (&c).into();
        let t = build_neighbor_table(v, v, 0.35, 2).unwrap();
        assert_eq!(t.rows(), 10);
        for m in 0..t.rows() {
            let cnt = t.row_count(m);
            assert!(cnt <= 2);
            let d = &t.row_dist(m)[..cnt];
            for w in d.windows(2) {
                assert!(w[0] <= w[1]);
            }
            // self-match comes first at distance 0
            assert!(d[0] < 1e-6);
            assert_eq!(t.row_index(m)[0] as usize, m);
        }
    }

    #[test]
    fn rejects_bad_radius() {
        let c = line_cloud();
        let v: CloudView = (&c).into();
        assert!(build_neighbor_table(v, v, 0.0, 4).is_err());
        assert!(build_neighbor_table(v, v, f32::NAN, 4).is_err());
    }
}
