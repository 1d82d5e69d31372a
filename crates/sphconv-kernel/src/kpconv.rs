//! Kernel-point binning (KPConv style): hard nearest-point and Gaussian-fuzzy
//! assignment against a fixed template of reference positions.

use anyhow::{ensure, Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use sphconv_core::{CloudView, NeighborTable};

use crate::spherical::PAD_BIN;
use crate::FUZZY_SLOTS;

/// A kernel-point template scaled to a search radius.
///
/// The template is scaled by `1.5·σ` with `σ = radius/2.5` at construction,
/// so the binning functions always see pre-scaled positions. σ doubles as
/// the Gaussian influence length of the fuzzy variant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KernelPoints {
    points: Vec<[f32; 3]>,
    sigma: f32,
}

impl KernelPoints {
    pub fn from_template(template: &[[f32; 3]], radius: f32) -> Result<Self> {
        ensure!(!template.is_empty(), "kernel-point template is empty");
        ensure!(radius > 0.0 && radius.is_finite(), "search radius must be positive, got {}", radius);
        let sigma = radius / 2.5;
        let scale = 1.5 * sigma;
        let points = template
            .iter()
            .map(|p| [p[0] * scale, p[1] * scale, p[2] * scale])
            .collect();
        Ok(Self { points, sigma })
    }

    pub fn len(&self) -> usize { self.points.len() }
    pub fn is_empty(&self) -> bool { self.points.is_empty() }
    pub fn sigma(&self) -> f32 { self.sigma }
    pub fn points(&self) -> &[[f32; 3]] { &self.points }

    /// Index of the kernel point nearest to a displacement; ties go to the
    /// lowest index (strict comparison).
    #[inline]
    fn nearest(&self, d: [f32; 3]) -> usize {
        let mut best = 0usize;
        let mut best_d2 = f32::INFINITY;
        for (i, kp) in self.points.iter().enumerate() {
            let d2 = sq_dist(d, *kp);
            if d2 < best_d2 {
                best = i;
                best_d2 = d2;
            }
        }
        best
    }

    /// Up to 8 nearest kernel points with Gaussian influence weights
    /// `exp(-d²/(2σ²))` normalized over the selection. With fewer than 8
    /// kernel points the whole template is selected and the spare slots
    /// repeat the nearest index with weight 0.
    fn fuzzy(&self, d: [f32; 3], idx: &mut [i32; FUZZY_SLOTS], w: &mut [f32; FUZZY_SLOTS]) {
        let mut ranked: SmallVec<[(f32, usize); 32]> = self
            .points
            .iter()
            .enumerate()
            .map(|(i, kp)| (sq_dist(d, *kp), i))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let take = ranked.len().min(FUZZY_SLOTS);

        let inv_2s2 = 1.0 / (2.0 * self.sigma * self.sigma);
        let mut sum = 0.0f32;
        for s in 0..take {
            idx[s] = ranked[s].1 as i32;
            w[s] = (-ranked[s].0 * inv_2s2).exp();
            sum += w[s];
        }
        for s in take..FUZZY_SLOTS {
            idx[s] = ranked[0].1 as i32;
            w[s] = 0.0;
        }
        if sum > 1e-12 {
            for ws in &mut w[..take] {
                *ws /= sum;
            }
        } else {
            // all selected points effectively out of reach: collapse to the
            // single nearest
            w[..take].fill(0.0);
            w[0] = 1.0;
        }
    }
}

#[inline]
fn sq_dist(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

/// Read a (P,3) template at unit scale from a JSON file.
pub fn load_template(path: &str) -> Result<Vec<[f32; 3]>> {
    let f = std::fs::File::open(path).with_context(|| format!("open template {}", path))?;
    let t: Vec<[f32; 3]> =
        serde_json::from_reader(f).with_context(|| format!("parse template {}", path))?;
    ensure!(!t.is_empty(), "template {} holds no points", path);
    Ok(t)
}

/// Write a (P,3) template to a JSON file, the format `load_template` reads.
pub fn save_template(path: &str, template: &[[f32; 3]]) -> Result<()> {
    ensure!(!template.is_empty(), "refusing to save an empty template");
    let f = std::fs::File::create(path).with_context(|| format!("create template {}", path))?;
    serde_json::to_writer(f, template)?;
    Ok(())
}

/// Deterministic 15-point template at unit scale: center, the 6 octahedron
/// vertices, and the 8 cube corners pulled onto the unit sphere.
pub fn template_15() -> Vec<[f32; 3]> {
    let mut t = vec![[0.0, 0.0, 0.0]];
    for a in 0..3 {
        for s in [1.0f32, -1.0] {
            let mut p = [0.0f32; 3];
            p[a] = s;
            t.push(p);
        }
    }
    let c = 1.0 / 3f32.sqrt();
    for sx in [c, -c] {
        for sy in [c, -c] {
            for sz in [c, -c] {
                t.push([sx, sy, sz]);
            }
        }
    }
    t
}

fn check_shapes(database: &CloudView, query: &CloudView, nn: &NeighborTable) -> Result<()> {
    ensure!(
        nn.rows() == query.len(),
        "neighbor table has {} rows but query cloud has {} points",
        nn.rows(),
        query.len()
    );
    nn.validate_indices(database.len())
}

/// Hard KPConv binning: nearest kernel point per neighbor slot, row-major
/// (query, slot); padding slots hold [`PAD_BIN`]. Distances come from the
/// displacement geometry, the table's `dist` column is not consulted.
pub fn kpconv_bins(
    database: CloudView,
    query: CloudView,
    nn: &NeighborTable,
    kernel: &KernelPoints,
) -> Result<Vec<i32>> {
    check_shapes(&database, &query, nn)?;
    let k = nn.max_neighbors();

    let rows: Vec<Vec<i32>> = (0..query.len())
        .into_par_iter()
        .map(|m| {
            let qp = query.point(m);
            let cnt = nn.row_count(m);
            let idx = nn.row_index(m);
            let mut out = vec![PAD_BIN; k];
            for s in 0..cnt {
                let j = idx[s] as usize;
                let dp = database.point(j);
                let d = [dp[0] - qp[0], dp[1] - qp[1], dp[2] - qp[2]];
                out[s] = kernel.nearest(d) as i32;
            }
            out
        })
        .collect();

    Ok(rows.into_iter().flatten().collect())
}

/// Fuzzy KPConv binning: 8 kernel-point indices + Gaussian weights per
/// neighbor slot, row-major (query, slot, rank). Valid slots carry weights
/// summing to 1; padding slots carry index 0 with weight 0.
pub fn fuzzy_kpconv_bins(
    database: CloudView,
    query: CloudView,
    nn: &NeighborTable,
    kernel: &KernelPoints,
) -> Result<(Vec<i32>, Vec<f32>)> {
    check_shapes(&database, &query, nn)?;
    let k = nn.max_neighbors();

    let rows: Vec<(Vec<i32>, Vec<f32>)> = (0..query.len())
        .into_par_iter()
        .map(|m| {
            let qp = query.point(m);
            let cnt = nn.row_count(m);
            let nidx = nn.row_index(m);
            let mut out_i = vec![0i32; k * FUZZY_SLOTS];
            let mut out_w = vec![0.0f32; k * FUZZY_SLOTS];
            let mut idx = [0i32; FUZZY_SLOTS];
            let mut w = [0.0f32; FUZZY_SLOTS];
            for s in 0..cnt {
                let j = nidx[s] as usize;
                let dp = database.point(j);
                let d = [dp[0] - qp[0], dp[1] - qp[1], dp[2] - qp[2]];
                kernel.fuzzy(d, &mut idx, &mut w);
                out_i[s * FUZZY_SLOTS..(s + 1) * FUZZY_SLOTS].copy_from_slice(&idx);
                out_w[s * FUZZY_SLOTS..(s + 1) * FUZZY_SLOTS].copy_from_slice(&w);
            }
            (out_i, out_w)
        })
        .collect();

    let mut flat_i = Vec::with_capacity(query.len() * k * FUZZY_SLOTS);
    let mut flat_w = Vec::with_capacity(query.len() * k * FUZZY_SLOTS);
    for (i, w) in rows {
        flat_i.extend(i);
        flat_w.extend(w);
    }
    Ok((flat_i, flat_w))
}
