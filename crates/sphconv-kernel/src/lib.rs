//! sphconv-kernel — assign point-cloud neighbors to convolution kernel bins.
//!
//! Four operators sharing one geometric core: a spherical partition of the
//! search ball (shells × polar sectors × azimuth sectors, plus a center bin)
//! with hard or trilinear-fuzzy assignment, and a kernel-point template
//! (KPConv) with hard nearest-point or Gaussian-fuzzy assignment. All four
//! are pure, stateless and position-preserving: output slot order equals
//! neighbor-table slot order, padding slots get a documented sentinel.
//!
//! None of the operators defines a gradient; see the `OpDescriptor` consts.

pub mod kpconv;
pub mod ops;
pub mod spherical;

pub use kpconv::{
    fuzzy_kpconv_bins, kpconv_bins, load_template, save_template, template_15, KernelPoints,
};
pub use ops::{
    OpDescriptor, FUZZY_KPCONV_KERNEL, FUZZY_SPHERICAL_KERNEL, KPCONV_KERNEL, SPHERICAL_KERNEL,
};
pub use spherical::{fuzzy_spherical_bins, spherical_bins, SphericalPartition, PAD_BIN};

/// Fuzzy assignment spreads each neighbor over at most this many bins
/// (2×2×2 cell corners for the spherical partition, 8 nearest kernel points
/// for KPConv).
pub const FUZZY_SLOTS: usize = 8;

/// Distances below this are treated as a coincident query/database pair and
/// routed to the spherical center bin.
pub(crate) const DIST_EPS: f32 = 1e-6;
