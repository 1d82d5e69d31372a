//! Operator-level integration tests: batched entry points, neighbor-table
//! pipeline, and geometric consistency properties.

use sphconv_core::{Cloud, CloudView, NeighborTable};
use sphconv_kernel::{
    fuzzy_spherical_bins, kpconv_bins, ops, spherical_bins, template_15, KernelPoints,
    SphericalPartition, FUZZY_SLOTS, PAD_BIN,
};

/// Tiny deterministic LCG so tests need no rng dependency.
struct Lcg(u64);
impl Lcg {
    fn next_f32(&mut self) -> f32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) as f32) / ((1u64 << 31) as f32)
    }
    fn coord(&mut self) -> f32 {
        self.next_f32() * 2.0 - 1.0
    }
}

fn random_cloud(n: usize, seed: u64) -> Cloud {
    let mut rng = Lcg(seed);
    let mut c = Cloud::default();
    for _ in 0..n {
        c.push(rng.coord(), rng.coord(), rng.coord());
    }
    c
}

#[test]
fn descriptors_are_non_differentiable() {
    for d in [
        ops::SPHERICAL_KERNEL,
        ops::FUZZY_SPHERICAL_KERNEL,
        ops::KPCONV_KERNEL,
        ops::FUZZY_KPCONV_KERNEL,
    ] {
        assert!(!d.differentiable, "{} must not define a gradient", d.name);
    }
}

#[test]
fn batch_size_mismatch_rejected() {
    let part = SphericalPartition::new(2, 2, 4, 1.0).unwrap();
    let db = vec![random_cloud(10, 1)];
    let q = vec![random_cloud(4, 2), random_cloud(4, 3)];
    let nn = vec![NeighborTable::from_parts(1, vec![0; 4], vec![0; 4], vec![0.0; 4]).unwrap()];
    let err = ops::spherical_kernel(&db, &q, &nn, &part).unwrap_err();
    assert!(err.to_string().contains("batch size mismatch"));
}

#[test]
fn end_to_end_self_query_pipeline() {
    let part = SphericalPartition::new(4, 2, 3, 0.5).unwrap();
    let cloud = random_cloud(200, 42);
    let view: CloudView = (&cloud).into();
    let nn = sphconv_nn::build_neighbor_table(view, view, part.radius, 16).unwrap();

    let bins = spherical_bins(view, view, &nn, &part).unwrap();
    assert_eq!(bins.len(), cloud.len() * nn.max_neighbors());

    let k = nn.max_neighbors();
    for m in 0..cloud.len() {
        let cnt = nn.row_count(m);
        // nearest hit of a self-query is the point itself → center bin
        assert!(cnt >= 1);
        assert_eq!(bins[m * k], part.center_bin());
        for s in 0..k {
            let b = bins[m * k + s];
            if s < cnt {
                assert!(b >= 0 && (b as usize) < part.bin_count());
            } else {
                assert_eq!(b, PAD_BIN);
            }
        }
    }
}

#[test]
fn fuzzy_weights_normalized_over_random_cloud() {
    let part = SphericalPartition::new(8, 2, 3, 0.5).unwrap();
    let cloud = random_cloud(120, 7);
    let view: CloudView = (&cloud).into();
    let nn = sphconv_nn::build_neighbor_table(view, view, part.radius, 8).unwrap();

    let (idx, w) = fuzzy_spherical_bins(view, view, &nn, &part).unwrap();
    let k = nn.max_neighbors();
    for m in 0..cloud.len() {
        let cnt = nn.row_count(m);
        for s in 0..k {
            let base = (m * k + s) * FUZZY_SLOTS;
            let sum: f32 = w[base..base + FUZZY_SLOTS].iter().sum();
            if s < cnt {
                assert!((sum - 1.0).abs() < 1e-5, "row {} slot {}: sum {}", m, s, sum);
            } else {
                assert_eq!(sum, 0.0);
            }
            for &i in &idx[base..base + FUZZY_SLOTS] {
                assert!(i >= 0 && (i as usize) < part.bin_count());
            }
        }
    }
}

#[test]
fn azimuth_bins_shift_under_quarter_turn() {
    let part = SphericalPartition::new(2, 2, 4, 1.0).unwrap();
    let q_sectors = part.azimuth;

    // points placed at sector centers, away from any bin boundary
    let mut db = Cloud::default();
    let mut dists = Vec::new();
    for shell in 0..2 {
        for pol in 0..2 {
            for az in 0..4 {
                let r = 0.25 + 0.5 * shell as f32;
                let theta = (pol as f32 + 0.5) * std::f32::consts::PI / 2.0;
                let phi = (az as f32 + 0.5) * std::f32::consts::TAU / 4.0;
                db.push(
                    r * theta.sin() * phi.cos(),
                    r * theta.sin() * phi.sin(),
                    r * theta.cos(),
                );
                dists.push(r);
            }
        }
    }
    let n = db.len();
    let mut query = Cloud::default();
    query.push(0.0, 0.0, 0.0);
    let nn = NeighborTable::from_parts(
        n,
        (0..n as i32).collect(),
        vec![n as i32],
        dists.clone(),
    )
    .unwrap();

    let before = spherical_bins((&db).into(), (&query).into(), &nn, &part).unwrap();

    // quarter turn about z is exact in f32: (x,y,z) → (-y,x,z)
    let mut rotated = Cloud::default();
    for i in 0..n {
        rotated.push(-db.y[i], db.x[i], db.z[i]);
    }
    let after = spherical_bins((&rotated).into(), (&query).into(), &nn, &part).unwrap();

    let pq = part.polar * part.azimuth;
    for (b0, b1) in before.iter().zip(&after) {
        let (b0, b1) = (*b0 as usize, *b1 as usize);
        let (shell0, rest0) = (b0 / pq, b0 % pq);
        let (shell1, rest1) = (b1 / pq, b1 % pq);
        assert_eq!(shell0, shell1);
        assert_eq!(rest0 / part.azimuth, rest1 / part.azimuth); // polar unchanged
        let (az0, az1) = (rest0 % part.azimuth, rest1 % part.azimuth);
        assert_eq!((az0 + 1) % q_sectors, az1);
    }
}

#[test]
fn batched_kpconv_matches_per_element() {
    let kp = KernelPoints::from_template(&template_15(), 0.5).unwrap();
    let db: Vec<Cloud> = vec![random_cloud(50, 11), random_cloud(50, 12)];
    let q: Vec<Cloud> = vec![random_cloud(20, 13), random_cloud(20, 14)];
    let nn: Vec<NeighborTable> = db
        .iter()
        .zip(&q)
        .map(|(d, qq)| sphconv_nn::build_neighbor_table(d.into(), qq.into(), 0.5, 8).unwrap())
        .collect();

    let batched = ops::kpconv_kernel(&db, &q, &nn, &kp).unwrap();
    assert_eq!(batched.len(), 2);
    for b in 0..2 {
        let single = kpconv_bins((&db[b]).into(), (&q[b]).into(), &nn[b], &kp).unwrap();
        assert_eq!(batched[b], single);
        for (s, &v) in single.iter().enumerate() {
            let m = s / nn[b].max_neighbors();
            let slot = s % nn[b].max_neighbors();
            if slot < nn[b].row_count(m) {
                assert!(v >= 0 && (v as usize) < kp.len());
            } else {
                assert_eq!(v, PAD_BIN);
            }
        }
    }
}

#[test]
fn fuzzy_kpconv_batch_weights_normalized() {
    let kp = KernelPoints::from_template(&template_15(), 0.5).unwrap();
    let db = vec![random_cloud(60, 21)];
    let q = vec![random_cloud(25, 22)];
    let nn =
        vec![sphconv_nn::build_neighbor_table((&db[0]).into(), (&q[0]).into(), 0.5, 8).unwrap()];

    let out = ops::fuzzy_kpconv_kernel(&db, &q, &nn, &kp).unwrap();
    let (idx, w) = &out[0];
    let k = nn[0].max_neighbors();
    for m in 0..q[0].len() {
        let cnt = nn[0].row_count(m);
        for s in 0..cnt {
            let base = (m * k + s) * FUZZY_SLOTS;
            let sum: f32 = w[base..base + FUZZY_SLOTS].iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            for &i in &idx[base..base + FUZZY_SLOTS] {
                assert!(i >= 0 && (i as usize) < kp.len());
            }
        }
    }
}
