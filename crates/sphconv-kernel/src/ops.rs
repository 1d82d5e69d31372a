//! Batched operator entry points and operation descriptors.
//!
//! A batch is a slice of clouds plus one neighbor table per element; shapes
//! are validated before any element is processed and a failure anywhere
//! discards the whole call (no partial output). Per-element work is delegated
//! to the single-cloud functions, which parallelize over query points.

use anyhow::{ensure, Context, Result};
use sphconv_core::{Cloud, NeighborTable};

use crate::kpconv::{fuzzy_kpconv_bins, kpconv_bins, KernelPoints};
use crate::spherical::{fuzzy_spherical_bins, spherical_bins, SphericalPartition};

/// Static description of an operator. None of these ops defines a gradient;
/// the capability flag states that directly instead of relying on a host
/// framework's no-gradient registration.
#[derive(Clone, Copy, Debug)]
pub struct OpDescriptor {
    pub name: &'static str,
    pub differentiable: bool,
}

pub const SPHERICAL_KERNEL: OpDescriptor =
    OpDescriptor { name: "spherical_kernel", differentiable: false };
pub const FUZZY_SPHERICAL_KERNEL: OpDescriptor =
    OpDescriptor { name: "fuzzy_spherical_kernel", differentiable: false };
pub const KPCONV_KERNEL: OpDescriptor =
    OpDescriptor { name: "kpconv_kernel", differentiable: false };
pub const FUZZY_KPCONV_KERNEL: OpDescriptor =
    OpDescriptor { name: "fuzzy_kpconv_kernel", differentiable: false };

fn check_batch(database: &[Cloud], query: &[Cloud], nn: &[NeighborTable]) -> Result<()> {
    ensure!(
        database.len() == query.len() && query.len() == nn.len(),
        "batch size mismatch: {} database clouds, {} query clouds, {} neighbor tables",
        database.len(),
        query.len(),
        nn.len()
    );
    for (b, (q, t)) in query.iter().zip(nn).enumerate() {
        ensure!(
            t.rows() == q.len(),
            "batch element {}: neighbor table has {} rows but query cloud has {} points",
            b,
            t.rows(),
            q.len()
        );
        t.validate_indices(database[b].len())
            .with_context(|| format!("batch element {}", b))?;
    }
    Ok(())
}

/// Batched hard spherical binning: one row of M·K bin indices per element.
pub fn spherical_kernel(
    database: &[Cloud],
    query: &[Cloud],
    nn: &[NeighborTable],
    part: &SphericalPartition,
) -> Result<Vec<Vec<i32>>> {
    check_batch(database, query, nn)?;
    let mut out = Vec::with_capacity(database.len());
    for b in 0..database.len() {
        out.push(spherical_bins(
            (&database[b]).into(),
            (&query[b]).into(),
            &nn[b],
            part,
        )?);
    }
    Ok(out)
}

/// Batched fuzzy spherical binning: (M·K·8 indices, M·K·8 weights) per element.
pub fn fuzzy_spherical_kernel(
    database: &[Cloud],
    query: &[Cloud],
    nn: &[NeighborTable],
    part: &SphericalPartition,
) -> Result<Vec<(Vec<i32>, Vec<f32>)>> {
    check_batch(database, query, nn)?;
    let mut out = Vec::with_capacity(database.len());
    for b in 0..database.len() {
        out.push(fuzzy_spherical_bins(
            (&database[b]).into(),
            (&query[b]).into(),
            &nn[b],
            part,
        )?);
    }
    Ok(out)
}

/// Batched hard KPConv binning.
pub fn kpconv_kernel(
    database: &[Cloud],
    query: &[Cloud],
    nn: &[NeighborTable],
    kernel: &KernelPoints,
) -> Result<Vec<Vec<i32>>> {
    check_batch(database, query, nn)?;
    let mut out = Vec::with_capacity(database.len());
    for b in 0..database.len() {
        out.push(kpconv_bins(
            (&database[b]).into(),
            (&query[b]).into(),
            &nn[b],
            kernel,
        )?);
    }
    Ok(out)
}

/// Batched fuzzy KPConv binning.
pub fn fuzzy_kpconv_kernel(
    database: &[Cloud],
    query: &[Cloud],
    nn: &[NeighborTable],
    kernel: &KernelPoints,
) -> Result<Vec<(Vec<i32>, Vec<f32>)>> {
    check_batch(database, query, nn)?;
    let mut out = Vec::with_capacity(database.len());
    for b in 0..database.len() {
        out.push(fuzzy_kpconv_bins(
            (&database[b]).into(),
            (&query[b]).into(),
            &nn[b],
            kernel,
        )?);
    }
    Ok(out)
}
