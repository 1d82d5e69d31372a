//! Spherical-partition binning: hard and trilinear-fuzzy assignment.

use std::f32::consts::{PI, TAU};

use anyhow::{ensure, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sphconv_core::{CloudView, NeighborTable};

use crate::{DIST_EPS, FUZZY_SLOTS};

/// Sentinel bin for padding slots of the hard operators.
pub const PAD_BIN: i32 = -1;

/// Partition of the search ball into `shells` radial shells, `polar`
/// polar-angle sectors and `azimuth` azimuthal sectors, plus one center bin
/// for zero-distance neighbors. Bin count = shells·polar·azimuth + 1, center
/// bin last.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SphericalPartition {
    pub shells: usize,
    pub polar: usize,
    pub azimuth: usize,
    pub radius: f32,
}

impl SphericalPartition {
    pub fn new(shells: usize, polar: usize, azimuth: usize, radius: f32) -> Result<Self> {
        ensure!(
            shells >= 1 && polar >= 1 && azimuth >= 1,
            "kernel shape must be at least (1,1,1), got ({},{},{})",
            shells, polar, azimuth
        );
        ensure!(radius > 0.0 && radius.is_finite(), "search radius must be positive, got {}", radius);
        Ok(Self { shells, polar, azimuth, radius })
    }

    pub fn bin_count(&self) -> usize {
        self.shells * self.polar * self.azimuth + 1
    }

    /// Index of the center/self bin (last).
    pub fn center_bin(&self) -> i32 {
        (self.shells * self.polar * self.azimuth) as i32
    }

    /// Continuous (shell, polar, azimuth) coordinates of a displacement,
    /// each in [0, extent). `dist` is the externally supplied Euclidean
    /// distance; it is trusted, not recomputed.
    #[inline]
    fn coords(&self, d: [f32; 3], dist: f32) -> (f32, f32, f32) {
        // shells are closed-open [k/n·r, (k+1)/n·r); dist == radius lands in
        // the last shell via the caller-side clamp/wrap rules
        let u_shell = self.shells as f32 * dist / self.radius;
        let theta = (d[2] / dist).clamp(-1.0, 1.0).acos(); // [0, π]
        let u_polar = self.polar as f32 * theta / PI;
        let mut phi = d[1].atan2(d[0]); // (-π, π]
        if phi < 0.0 {
            phi += TAU;
        }
        let u_az = self.azimuth as f32 * phi / TAU;
        (u_shell, u_polar, u_az)
    }

    /// Hard bin of one valid neighbor.
    #[inline]
    fn hard_bin(&self, d: [f32; 3], dist: f32) -> i32 {
        if dist < DIST_EPS {
            return self.center_bin();
        }
        let (u_shell, u_polar, u_az) = self.coords(d, dist);
        let shell = (u_shell as usize).min(self.shells - 1);
        let polar = (u_polar as usize).min(self.polar - 1);
        // angle wrap-around at 0/2π uses modulo, never clamp
        let az = (u_az as usize) % self.azimuth;
        (shell * self.polar * self.azimuth + polar * self.azimuth + az) as i32
    }

    /// Fuzzy bins of one valid neighbor: 8 trilinear corner weights over the
    /// 2×2×2 bracketing cell. Weights sum to 1; clamped edge corners may
    /// coincide (duplicated index, weights still sum to 1).
    fn fuzzy_bins(&self, d: [f32; 3], dist: f32, idx: &mut [i32; 8], w: &mut [f32; 8]) {
        if dist < DIST_EPS {
            // full weight on the center bin; remaining slots stay in range
            // with zero weight
            idx.fill(self.center_bin());
            w.fill(0.0);
            w[0] = 1.0;
            return;
        }
        let (u_shell, u_polar, u_az) = self.coords(d, dist);
        let (s0, s1, ts) = split_clamped(u_shell, self.shells);
        let (p0, p1, tp) = split_clamped(u_polar, self.polar);
        let (a0, a1, ta) = split_wrapped(u_az, self.azimuth);

        let pq = self.polar * self.azimuth;
        for corner in 0..FUZZY_SLOTS {
            let (si, ws) = if corner & 1 == 0 { (s0, 1.0 - ts) } else { (s1, ts) };
            let (pi, wp) = if corner & 2 == 0 { (p0, 1.0 - tp) } else { (p1, tp) };
            let (ai, wa) = if corner & 4 == 0 { (a0, 1.0 - ta) } else { (a1, ta) };
            idx[corner] = (si * pq + pi * self.azimuth + ai) as i32;
            w[corner] = ws * wp * wa;
        }
    }
}

/// Bracketing bin pair of a continuous coordinate on a clamped axis.
/// Bin centers sit at k + 0.5; the fraction is the upper corner's share.
#[inline]
fn split_clamped(u: f32, extent: usize) -> (usize, usize, f32) {
    let c = u - 0.5;
    let f = c.floor();
    let t = c - f;
    let last = (extent - 1) as isize;
    let lo = (f as isize).clamp(0, last) as usize;
    let hi = (f as isize + 1).clamp(0, last) as usize;
    (lo, hi, t)
}

/// Same split on the periodic azimuth axis: indices wrap modulo extent.
#[inline]
fn split_wrapped(u: f32, extent: usize) -> (usize, usize, f32) {
    let c = u - 0.5;
    let f = c.floor();
    let t = c - f;
    let e = extent as isize;
    let lo = ((f as isize) % e + e) % e;
    let hi = (lo + 1) % e;
    (lo as usize, hi as usize, t)
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

/// Hard spherical binning. One `i32` per neighbor slot, row-major
/// (query, slot); padding slots hold [`PAD_BIN`].
pub fn spherical_bins(
    database: CloudView,
    query: CloudView,
    nn: &NeighborTable,
    part: &SphericalPartition,
) -> Result<Vec<i32>> {
    check_shapes(&database, &query, nn)?;
    let k = nn.max_neighbors();

    let rows: Vec<Vec<i32>> = (0..query.len())
        .into_par_iter()
        .map(|m| {
            let qp = query.point(m);
            let cnt = nn.row_count(m);
            let idx = nn.row_index(m);
            let dist = nn.row_dist(m);
            let mut out = vec![PAD_BIN; k];
            for s in 0..cnt {
                let j = idx[s] as usize;
                let dp = database.point(j);
                let d = [dp[0] - qp[0], dp[1] - qp[1], dp[2] - qp[2]];
                out[s] = part.hard_bin(d, dist[s]);
            }
            out
        })
        .collect();

    Ok(rows.into_iter().flatten().collect())
}

/// Fuzzy spherical binning. 8 indices + 8 weights per neighbor slot,
/// row-major (query, slot, corner). Valid slots carry weights summing to 1;
/// padding slots carry the center bin (kept in range) with weight 0.
pub fn fuzzy_spherical_bins(
    database: CloudView,
    query: CloudView,
    nn: &NeighborTable,
    part: &SphericalPartition,
) -> Result<(Vec<i32>, Vec<f32>)> {
    check_shapes(&database, &query, nn)?;
    let k = nn.max_neighbors();
    let center = part.center_bin();

    let rows: Vec<(Vec<i32>, Vec<f32>)> = (0..query.len())
        .into_par_iter()
        .map(|m| {
            let qp = query.point(m);
            let cnt = nn.row_count(m);
            let nidx = nn.row_index(m);
            let ndist = nn.row_dist(m);
            let mut out_i = vec![center; k * FUZZY_SLOTS];
            let mut out_w = vec![0.0f32; k * FUZZY_SLOTS];
            let mut idx = [0i32; FUZZY_SLOTS];
            let mut w = [0.0f32; FUZZY_SLOTS];
            for s in 0..cnt {
                let j = nidx[s] as usize;
                let dp = database.point(j);
                let d = [dp[0] - qp[0], dp[1] - qp[1], dp[2] - qp[2]];
                part.fuzzy_bins(d, ndist[s], &mut idx, &mut w);
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
