use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nalgebra::{Point3, UnitQuaternion};
use serde::Serialize;
use sphconv_core::{Cloud, CloudView, NeighborTable};
use sphconv_kernel::{
    ops, save_template, template_15, KernelPoints, SphericalPartition, FUZZY_SLOTS, PAD_BIN,
};

// ---------- helpers ----------

fn t0() -> std::time::Instant { std::time::Instant::now() }
fn lap(t: std::time::Instant, label: &str) {
    let ms = t.elapsed().as_secs_f64() * 1000.0;
    println!("[{label}] {ms:.1} ms");
}

fn load_cloud(path: &str) -> Result<Cloud> {
    let t = t0();
    let c = sphconv_io::read_auto(path)?;
    lap(t, "read");
    Ok(c)
}

fn self_table(cloud: &Cloud, radius: f32, k: usize) -> Result<NeighborTable> {
    let t = t0();
    let view: CloudView = cloud.into();
    let nn = sphconv_nn::build_neighbor_table(view, view, radius, k)?;
    lap(t, "neighbors");
    Ok(nn)
}

fn load_template(path: Option<&str>) -> Result<Vec<[f32; 3]>> {
    match path {
        Some(p) => sphconv_kernel::load_template(p),
        None => Ok(template_15()),
    }
}

// ---------- JSON dumps ----------

#[derive(Serialize)]
struct HardDump {
    op: &'static str,
    radius: f32,
    bin_count: usize,
    max_neighbors: usize,
    /// one row of K bin indices per query point, -1 = padding
    rows: Vec<Vec<i32>>,
    /// occupancy over valid slots
    histogram: Vec<usize>,
}

#[derive(Serialize)]
struct FuzzyRow {
    index: Vec<i32>,
    coeff: Vec<f32>,
}

#[derive(Serialize)]
struct FuzzyDump {
    op: &'static str,
    radius: f32,
    bin_count: usize,
    max_neighbors: usize,
    /// one row of K·8 index/weight pairs per query point
    rows: Vec<FuzzyRow>,
    /// total weight landed in each bin
    histogram: Vec<f32>,
}

fn hard_dump(
    op: &'static str,
    radius: f32,
    bin_count: usize,
    k: usize,
    flat: Vec<i32>,
) -> HardDump {
    let mut histogram = vec![0usize; bin_count];
    for &b in &flat {
        if b != PAD_BIN {
            histogram[b as usize] += 1;
        }
    }
    let rows = flat.chunks(k).map(|r| r.to_vec()).collect();
    HardDump { op, radius, bin_count, max_neighbors: k, rows, histogram }
}

fn fuzzy_dump(
    op: &'static str,
    radius: f32,
    bin_count: usize,
    k: usize,
    flat_i: Vec<i32>,
    flat_w: Vec<f32>,
) -> FuzzyDump {
    let mut histogram = vec![0.0f32; bin_count];
    for (&b, &w) in flat_i.iter().zip(&flat_w) {
        histogram[b as usize] += w;
    }
    let stride = k * FUZZY_SLOTS;
    let rows = flat_i
        .chunks(stride)
        .zip(flat_w.chunks(stride))
        .map(|(i, w)| FuzzyRow { index: i.to_vec(), coeff: w.to_vec() })
        .collect();
    FuzzyDump { op, radius, bin_count, max_neighbors: k, rows, histogram }
}

fn write_json<T: Serialize>(path: &str, value: &T) -> Result<()> {
    let t = t0();
    let f = std::fs::File::create(path).with_context(|| format!("create {}", path))?;
    serde_json::to_writer(f, value)?;
    lap(t, "write");
    Ok(())
}

// ---------- CLI ----------

#[derive(Parser)]
#[command(name = "sphconv", version, about = "Kernel-bin assignment tools for point clouds")]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print basic info about a file (PLY / LAS)
    Info { input: String },

    /// Build a self-neighbor table and print occupancy stats
    Neighbors {
        input: String,
        #[arg(short, long, default_value_t = 0.1)] radius: f32,
        #[arg(short = 'k', long, default_value_t = 32)] max_neighbors: usize,
    },

    /// Hard spherical binning of a cloud against itself, JSON output
    Spherical {
        input: String,
        output: String,
        #[arg(short, long, default_value_t = 0.1)] radius: f32,
        #[arg(short = 'n', long, default_value_t = 8)] shells: usize,
        #[arg(short = 'p', long, default_value_t = 2)] polar: usize,
        #[arg(short = 'q', long, default_value_t = 3)] azimuth: usize,
        #[arg(short = 'k', long, default_value_t = 32)] max_neighbors: usize,
    },

    /// Fuzzy (trilinear) spherical binning, JSON output
    FuzzySpherical {
        input: String,
        output: String,
        #[arg(short, long, default_value_t = 0.1)] radius: f32,
        #[arg(short = 'n', long, default_value_t = 8)] shells: usize,
        #[arg(short = 'p', long, default_value_t = 2)] polar: usize,
        #[arg(short = 'q', long, default_value_t = 3)] azimuth: usize,
        #[arg(short = 'k', long, default_value_t = 32)] max_neighbors: usize,
    },

    /// Hard KPConv binning (built-in 15-point template unless --template)
    Kpconv {
        input: String,
        output: String,
        #[arg(short, long, default_value_t = 0.1)] radius: f32,
        #[arg(short = 'k', long, default_value_t = 32)] max_neighbors: usize,
        /// JSON file holding a (P,3) template at unit scale
        #[arg(long)] template: Option<String>,
    },

    /// Fuzzy (Gaussian) KPConv binning
    FuzzyKpconv {
        input: String,
        output: String,
        #[arg(short, long, default_value_t = 0.1)] radius: f32,
        #[arg(short = 'k', long, default_value_t = 32)] max_neighbors: usize,
        #[arg(long)] template: Option<String>,
    },

    /// Write a kernel-point template to JSON (built-in unless --template)
    Template {
        output: String,
        /// copy an existing template instead of the built-in 15-point one
        #[arg(long)] template: Option<String>,
    },

    /// Make a rotated copy (handy for checking azimuth-bin consistency)
    Rotate {
        input: String,
        output: String,
        #[arg(long, default_value_t = 90.0)] yaw_deg: f32,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    match args.cmd {
        Cmd::Info { input } => cmd_info(&input),
        Cmd::Neighbors { input, radius, max_neighbors } =>
            cmd_neighbors(&input, radius, max_neighbors),
        Cmd::Spherical { input, output, radius, shells, polar, azimuth, max_neighbors } =>
            cmd_spherical(&input, &output, radius, (shells, polar, azimuth), max_neighbors, false),
        Cmd::FuzzySpherical { input, output, radius, shells, polar, azimuth, max_neighbors } =>
            cmd_spherical(&input, &output, radius, (shells, polar, azimuth), max_neighbors, true),
        Cmd::Kpconv { input, output, radius, max_neighbors, template } =>
            cmd_kpconv(&input, &output, radius, max_neighbors, template.as_deref(), false),
        Cmd::FuzzyKpconv { input, output, radius, max_neighbors, template } =>
            cmd_kpconv(&input, &output, radius, max_neighbors, template.as_deref(), true),
        Cmd::Template { output, template } => cmd_template(&output, template.as_deref()),
        Cmd::Rotate { input, output, yaw_deg } => cmd_rotate(&input, &output, yaw_deg),
    }
}

// ---------- commands ----------

fn cmd_info(input: &str) -> Result<()> {
    let cloud = load_cloud(input)?;
    println!("points: {}", cloud.len());
    if let Some(b) = cloud.bounds() {
        println!("bounds: min={:?} max={:?}", b.min, b.max);
    }
    let mut keys: Vec<&String> = cloud.attrs_f32.keys().collect();
    keys.sort();
    if !keys.is_empty() {
        println!("attrs:  {:?}", keys);
    }
    Ok(())
}

fn cmd_neighbors(input: &str, radius: f32, k: usize) -> Result<()> {
    let cloud = load_cloud(input)?;
    let nn = self_table(&cloud, radius, k)?;

    let mut total = 0usize;
    let mut full = 0usize;
    let mut empty = 0usize;
    for m in 0..nn.rows() {
        let c = nn.row_count(m);
        total += c;
        if c == k { full += 1; }
        if c == 0 { empty += 1; }
    }
    let avg = total as f32 / nn.rows().max(1) as f32;
    println!(
        "neighbors: rows={} k={} avg={:.2} saturated={} empty={}",
        nn.rows(), k, avg, full, empty
    );
    Ok(())
}

fn cmd_spherical(
    input: &str,
    output: &str,
    radius: f32,
    kernel: (usize, usize, usize),
    k: usize,
    fuzzy: bool,
) -> Result<()> {
    let part = SphericalPartition::new(kernel.0, kernel.1, kernel.2, radius)?;
    let cloud = load_cloud(input)?;
    let nn = self_table(&cloud, radius, k)?;

    let db = std::slice::from_ref(&cloud);
    let tables = std::slice::from_ref(&nn);
    let t = t0();
    if fuzzy {
        let mut out = ops::fuzzy_spherical_kernel(db, db, tables, &part)?;
        lap(t, ops::FUZZY_SPHERICAL_KERNEL.name);
        let (fi, fw) = out.remove(0);
        let dump = fuzzy_dump(ops::FUZZY_SPHERICAL_KERNEL.name, radius, part.bin_count(), k, fi, fw);
        write_json(output, &dump)?;
    } else {
        let mut out = ops::spherical_kernel(db, db, tables, &part)?;
        lap(t, ops::SPHERICAL_KERNEL.name);
        let dump = hard_dump(ops::SPHERICAL_KERNEL.name, radius, part.bin_count(), k, out.remove(0));
        write_json(output, &dump)?;
    }
    println!(
        "{} pts -> {} (kernel {}x{}x{}, {} bins)",
        cloud.len(), output, kernel.0, kernel.1, kernel.2, part.bin_count()
    );
    Ok(())
}

fn cmd_kpconv(
    input: &str,
    output: &str,
    radius: f32,
    k: usize,
    template: Option<&str>,
    fuzzy: bool,
) -> Result<()> {
    let template = load_template(template)?;
    let kp = KernelPoints::from_template(&template, radius)?;
    let cloud = load_cloud(input)?;
    let nn = self_table(&cloud, radius, k)?;

    let db = std::slice::from_ref(&cloud);
    let tables = std::slice::from_ref(&nn);
    let t = t0();
    if fuzzy {
        let mut out = ops::fuzzy_kpconv_kernel(db, db, tables, &kp)?;
        lap(t, ops::FUZZY_KPCONV_KERNEL.name);
        let (fi, fw) = out.remove(0);
        let dump = fuzzy_dump(ops::FUZZY_KPCONV_KERNEL.name, radius, kp.len(), k, fi, fw);
        write_json(output, &dump)?;
    } else {
        let mut out = ops::kpconv_kernel(db, db, tables, &kp)?;
        lap(t, ops::KPCONV_KERNEL.name);
        let dump = hard_dump(ops::KPCONV_KERNEL.name, radius, kp.len(), k, out.remove(0));
        write_json(output, &dump)?;
    }
    println!(
        "{} pts -> {} ({} kernel points, sigma={:.4})",
        cloud.len(), output, kp.len(), kp.sigma()
    );
    Ok(())
}

fn cmd_template(output: &str, template: Option<&str>) -> Result<()> {
    let t = load_template(template)?;
    save_template(output, &t)?;
    println!("template: {} points -> {}", t.len(), output);
    Ok(())
}

fn cmd_rotate(input: &str, output: &str, yaw_deg: f32) -> Result<()> {
    let mut c = load_cloud(input)?;
    let rot = UnitQuaternion::from_euler_angles(0.0, 0.0, yaw_deg.to_radians());
    for i in 0..c.len() {
        let p = rot.transform_point(&Point3::new(c.x[i], c.y[i], c.z[i]));
        c.x[i] = p.x; c.y[i] = p.y; c.z[i] = p.z;
    }
    sphconv_io::write_ply_ascii(output, &c)?;
    println!("rotate: yaw={}° -> {}", yaw_deg, output);
    Ok(())
}
