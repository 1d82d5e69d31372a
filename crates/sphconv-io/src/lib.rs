//! sphconv-io — cloud readers/writers: ASCII PLY and LAS.
//!
//! Extra per-point columns land in `attrs_f32`; the binning core ignores
//! them, so a cloud with normals or colors feeds the operators unchanged.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use anyhow::{bail, Context, Result};
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Ply, Property};
use sphconv_core::Cloud;

/// Dispatch on file extension; PLY is the fallback.
pub fn read_auto(path: &str) -> Result<Cloud> {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".las") || lower.ends_with(".laz") {
        return read_las(path);
    }
    read_ply_ascii(path).with_context(|| format!("reading {} as PLY", path))
}

pub fn read_ply_ascii(path: &str) -> Result<Cloud> {
    let f = File::open(path).with_context(|| format!("open {}", path))?;
    let mut reader = BufReader::new(f);
    let parser = Parser::<DefaultElement>::new();
    let ply: Ply<DefaultElement> = parser.read_ply(&mut reader)?;

    let vertex = ply
        .payload
        .get("vertex")
        .ok_or_else(|| anyhow::anyhow!("PLY missing 'vertex' element"))?;

    let mut c = Cloud::default();
    c.reserve(vertex.len());

    for (row, el) in vertex.iter().enumerate() {
        let x = prop_f32(el, "x")?;
        let y = prop_f32(el, "y")?;
        let z = prop_f32(el, "z")?;
        c.push(x, y, z);

        // every other float-like property becomes an attribute column,
        // backfilled with zeros when a property appears late
        for (key, prop) in el.iter() {
            if key == "x" || key == "y" || key == "z" {
                continue;
            }
            let Some(val) = prop_as_f32(prop) else { continue };
            let col = c.attrs_f32.entry(key.clone()).or_default();
            if col.len() < row {
                col.resize(row, 0.0);
            }
            col.push(val);
        }
    }

    // pad columns that stopped appearing before the last row
    let n = c.len();
    for col in c.attrs_f32.values_mut() {
        if col.len() < n {
            col.resize(n, 0.0);
        }
    }
    Ok(c)
}

fn prop_f32(el: &DefaultElement, key: &str) -> Result<f32> {
    match el.get(key).and_then(prop_as_f32) {
        Some(v) => Ok(v),
        None => bail!("missing or non-float property '{}'", key),
    }
}

fn prop_as_f32(p: &Property) -> Option<f32> {
    match p {
        Property::Float(v) => Some(*v),
        Property::Double(v) => Some(*v as f32),
        Property::UChar(v) => Some(*v as f32),
        Property::Char(v) => Some(*v as f32),
        Property::UShort(v) => Some(*v as f32),
        Property::Short(v) => Some(*v as f32),
        Property::UInt(v) => Some(*v as f32),
        Property::Int(v) => Some(*v as f32),
        _ => None,
    }
}

pub fn read_las(path: &str) -> Result<Cloud> {
    let mut r = las::Reader::from_path(path).with_context(|| format!("open {}", path))?;
    let hdr = r.header().clone();

    let mut c = Cloud::default();
    c.reserve(hdr.number_of_points() as usize);

    for rec in r.points() {
        let p = rec?;
        c.push(p.x as f32, p.y as f32, p.z as f32);

        c.attrs_f32
            .entry("intensity".into())
            .or_default()
            .push(p.intensity as f32);

        if let Some(color) = p.color {
            c.attrs_f32.entry("red".into()).or_default().push(color.red as f32);
            c.attrs_f32.entry("green".into()).or_default().push(color.green as f32);
            c.attrs_f32.entry("blue".into()).or_default().push(color.blue as f32);
        } else {
            for k in ["red", "green", "blue"] {
                if let Some(col) = c.attrs_f32.get_mut(k) {
                    col.push(0.0);
                }
            }
        }

        let class_code: u8 = u8::from(p.classification);
        c.attrs_f32
            .entry("class".into())
            .or_default()
            .push(class_code as f32);
    }
    Ok(c)
}

pub fn write_ply_ascii(path: &str, cloud: &Cloud) -> Result<()> {
    let n = cloud.len();
    let mut w = BufWriter::new(File::create(path).with_context(|| format!("create {}", path))?);

    // only columns that stayed aligned with the cloud, in a stable order
    let mut keys: Vec<&str> = cloud
        .attrs_f32
        .iter()
        .filter_map(|(k, v)| if v.len() == n { Some(k.as_str()) } else { None })
        .collect();
    keys.sort_unstable();

    writeln!(w, "ply")?;
    writeln!(w, "format ascii 1.0")?;
    writeln!(w, "element vertex {}", n)?;
    writeln!(w, "property float x")?;
    writeln!(w, "property float y")?;
    writeln!(w, "property float z")?;
    for k in &keys {
        writeln!(w, "property float {}", k)?;
    }
    writeln!(w, "end_header")?;

    for i in 0..n {
        write!(w, "{} {} {}", cloud.x[i], cloud.y[i], cloud.z[i])?;
        for k in &keys {
            write!(w, " {}", cloud.attrs_f32[*k][i])?;
        }
        writeln!(w)?;
    }
    Ok(())
}
