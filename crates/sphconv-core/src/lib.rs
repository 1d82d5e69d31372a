//! sphconv-core — core data model: SoA point clouds and bounded neighbor tables.

use std::collections::HashMap;

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Structure-of-Arrays point cloud.
/// Hot columns (x,y,z) stay tight; optional columns live in a name→column map.
/// The binning operators only ever read x/y/z — extra columns ride along
/// untouched (same contract as callers stripping inputs to three coordinates).
#[derive(Default, Clone, Serialize, Deserialize)]
pub struct Cloud {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,

    /// Optional attributes (same length as x/y/z).
    /// Common keys: "intensity","red","green","blue","class".
    pub attrs_f32: HashMap<String, Vec<f32>>,
}

impl Cloud {
    pub fn len(&self) -> usize { self.x.len() }
    pub fn is_empty(&self) -> bool { self.x.is_empty() }
    pub fn push(&mut self, px: f32, py: f32, pz: f32) {
        self.x.push(px); self.y.push(py); self.z.push(pz);
    }
    pub fn reserve(&mut self, n: usize) {
        self.x.reserve(n); self.y.reserve(n); self.z.reserve(n);
        for v in self.attrs_f32.values_mut() { v.reserve(n); }
    }

    /// Axis-aligned bounds, None for an empty cloud.
    pub fn bounds(&self) -> Option<Aabb> {
        if self.is_empty() { return None; }
        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];
        for i in 0..self.len() {
            let p = [self.x[i], self.y[i], self.z[i]];
            for a in 0..3 {
                min[a] = min[a].min(p[a]);
                max[a] = max[a].max(p[a]);
            }
        }
        Some(Aabb { min, max })
    }
}

/// Zero-copy view into a Cloud (slice-of-SoA).
#[derive(Copy, Clone)]
pub struct CloudView<'a> {
    pub x: &'a [f32],
    pub y: &'a [f32],
    pub z: &'a [f32],
}

impl<'a> CloudView<'a> {
    pub fn len(&self) -> usize { self.x.len() }
    pub fn is_empty(&self) -> bool { self.x.is_empty() }

    #[inline]
    pub fn point(&self, i: usize) -> [f32; 3] {
        [self.x[i], self.y[i], self.z[i]]
    }
}

impl<'a> From<&'a Cloud> for CloudView<'a> {
    fn from(c: &'a Cloud) -> Self { Self { x: &c.x, y: &c.y, z: &c.z } }
}

/// Simple AABB
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct Aabb { pub min: [f32;3], pub max: [f32;3] }
impl Aabb {
    pub fn contains(&self, p: [f32;3]) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }
}

/// Bounded neighbor lists for M query points against one database cloud.
///
/// Fixed stride `max_neighbors` (K): row m occupies slots `m·K .. (m+1)·K` of
/// `index` and `dist`, of which the first `count[m]` are valid. Trailing slots
/// are padding; validity always comes from `count`, never from scanning a row
/// for sentinel values. `dist` holds Euclidean (already square-rooted)
/// distances, computed by whoever built the table — binning never recomputes
/// them.
#[derive(Clone, Serialize, Deserialize)]
pub struct NeighborTable {
    max_neighbors: usize,
    index: Vec<i32>,
    count: Vec<i32>,
    dist: Vec<f32>,
}

impl NeighborTable {
    /// Assemble a table from flat columns, validating the shape contract.
    pub fn from_parts(
        max_neighbors: usize,
        index: Vec<i32>,
        count: Vec<i32>,
        dist: Vec<f32>,
    ) -> Result<Self> {
        ensure!(max_neighbors > 0, "max_neighbors must be at least 1");
        let rows = count.len();
        ensure!(
            index.len() == rows * max_neighbors,
            "index column has {} entries, expected {} rows x {} slots",
            index.len(), rows, max_neighbors
        );
        ensure!(
            dist.len() == rows * max_neighbors,
            "dist column has {} entries, expected {} rows x {} slots",
            dist.len(), rows, max_neighbors
        );
        for (m, &c) in count.iter().enumerate() {
            ensure!(
                c >= 0 && (c as usize) <= max_neighbors,
                "row {}: neighbor count {} outside 0..={}",
                m, c, max_neighbors
            );
        }
        Ok(Self { max_neighbors, index, count, dist })
    }

    pub fn rows(&self) -> usize { self.count.len() }
    pub fn max_neighbors(&self) -> usize { self.max_neighbors }

    pub fn row_count(&self, m: usize) -> usize { self.count[m] as usize }

    /// All K index slots of row m (valid prefix + padding).
    pub fn row_index(&self, m: usize) -> &[i32] {
        &self.index[m * self.max_neighbors..(m + 1) * self.max_neighbors]
    }

    /// All K distance slots of row m.
    pub fn row_dist(&self, m: usize) -> &[f32] {
        &self.dist[m * self.max_neighbors..(m + 1) * self.max_neighbors]
    }

    /// Check every valid neighbor index against the database size.
    /// An out-of-range index is a data-integrity violation: the whole call
    /// aborts rather than clamping or skipping.
    pub fn validate_indices(&self, database_len: usize) -> Result<()> {
        for m in 0..self.rows() {
            let cnt = self.row_count(m);
            for &j in &self.row_index(m)[..cnt] {
                ensure!(
                    j >= 0 && (j as usize) < database_len,
                    "query row {}: neighbor index {} out of range for database of {} points",
                    m, j, database_len
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_shape_checked() {
        // 2 rows, K=3
        let t = NeighborTable::from_parts(
            3,
            vec![0, 1, 0, 2, 0, 0],
            vec![2, 1],
            vec![0.1, 0.2, 0.0, 0.3, 0.0, 0.0],
        )
        .unwrap();
        assert_eq!(t.rows(), 2);
        assert_eq!(t.row_count(0), 2);
        assert_eq!(t.row_index(1), &[2, 0, 0]);
    }

    #[test]
    fn table_rejects_bad_count() {
        let r = NeighborTable::from_parts(2, vec![0, 0], vec![3], vec![0.0, 0.0]);
        assert!(r.is_err());
    }

    #[test]
    fn table_rejects_column_mismatch() {
        let r = NeighborTable::from_parts(2, vec![0, 0, 0], vec![1], vec![0.0, 0.0]);
        assert!(r.is_err());
    }

    #[test]
    fn index_validation_catches_out_of_range() {
        let t = NeighborTable::from_parts(2, vec![5, 0], vec![1], vec![0.1, 0.0]).unwrap();
        assert!(t.validate_indices(5).is_err());
        assert!(t.validate_indices(6).is_ok());
        // padding slot holds garbage but is never checked
        let t = NeighborTable::from_parts(2, vec![0, 99], vec![1], vec![0.1, 0.0]).unwrap();
        assert!(t.validate_indices(1).is_ok());
    }

    #[test]
    fn cloud_bounds() {
        let mut c = Cloud::default();
        c.push(0.0, -1.0, 2.0);
        c.push(3.0, 1.0, -2.0);
        let b = c.bounds().unwrap();
        assert_eq!(b.min, [0.0, -1.0, -2.0]);
        assert_eq!(b.max, [3.0, 1.0, 2.0]);
        assert!(b.contains([1.0, 0.0, 0.0]));
    }
}
