//! Curve stores on disk.
//!
//! JSON: `{"<name>": [[x, y, exl, exh, eyl, eyh], ...], ...}`; `[x, y]` pairs are accepted too.
//! TSV (optionally gzipped): long format with columns `curve x y exl exh eyl eyh`, points of a
//! curve kept in file order.

use crate::calib::curve::{Curve, GraphPoint};
use crate::calib::sf::MemoryCurveStore;
use crate::io::tsv::{column, fmt_f64, parse_opt_f64, tsv_reader, write_tsv};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const CURVES_HEADER: &str = "curve\tx\ty\texl\texh\teyl\teyh";

pub fn read_curve_store<P: AsRef<Path>>(path: P) -> Result<MemoryCurveStore> {
    let path = path.as_ref();
    let p = path.to_string_lossy().to_ascii_lowercase();
    let store = if p.ends_with(".json") {
        let raw = fs::read_to_string(path).with_context(|| format!("failed to read: {}", path.display()))?;
        parse_json_store(&raw)
    } else if p.ends_with(".tsv") || p.ends_with(".tsv.gz") || p.ends_with(".txt") {
        read_tsv_store(path)
    } else {
        Err(anyhow!(
            "unsupported curve store extension: {} (expected .json, .tsv(.gz))",
            path.display()
        ))
    }
    .with_context(|| format!("failed reading curve store: {}", path.display()))?;
    tracing::debug!(path = %path.display(), curves = store.len(), "curve store loaded");
    Ok(store)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonPoint {
    Full([f64; 6]),
    Bare([f64; 2]),
}

impl From<JsonPoint> for GraphPoint {
    fn from(p: JsonPoint) -> Self {
        match p {
            JsonPoint::Full([x, y, exl, exh, eyl, eyh]) => GraphPoint {
                x,
                y,
                exl,
                exh,
                eyl,
                eyh,
            },
            JsonPoint::Bare([x, y]) => GraphPoint::new(x, y),
        }
    }
}

pub fn parse_json_store(raw: &str) -> Result<MemoryCurveStore> {
    let parsed: BTreeMap<String, Vec<JsonPoint>> =
        serde_json::from_str(raw).context("failed to parse curve store JSON")?;
    Ok(parsed
        .into_iter()
        .map(|(name, points)| Curve::new(name, points.into_iter().map(GraphPoint::from).collect()))
        .collect())
}

fn read_tsv_store(path: &Path) -> Result<MemoryCurveStore> {
    let mut rdr = tsv_reader(path)?;
    let headers = rdr.headers().context("failed reading curve header")?.clone();
    let idx_curve = column(&headers, "curve")?;
    let idx_x = column(&headers, "x")?;
    let idx_y = column(&headers, "y")?;
    let optional = |name: &str| headers.iter().position(|h| h.trim() == name);
    let idx_errors = [optional("exl"), optional("exh"), optional("eyl"), optional("eyh")];

    let mut curves: BTreeMap<String, Vec<GraphPoint>> = BTreeMap::new();
    for (row_idx, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("failed reading record {}", row_idx + 1))?;
        let value = |idx: Option<usize>, name: &str| -> Result<Option<f64>> {
            match idx.and_then(|i| rec.get(i)) {
                None => Ok(None),
                Some(raw) => parse_opt_f64(raw)
                    .with_context(|| format!("invalid {name} at record {}", row_idx + 1)),
            }
        };
        let name = rec
            .get(idx_curve)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("missing curve name at record {}", row_idx + 1))?;
        let x = value(Some(idx_x), "x")?.ok_or_else(|| anyhow!("missing x at record {}", row_idx + 1))?;
        // NA efficiencies are kept as NaN points.
        let y = value(Some(idx_y), "y")?.unwrap_or(f64::NAN);
        let [exl, exh, eyl, eyh] = [
            value(idx_errors[0], "exl")?.unwrap_or(0.0),
            value(idx_errors[1], "exh")?.unwrap_or(0.0),
            value(idx_errors[2], "eyl")?.unwrap_or(0.0),
            value(idx_errors[3], "eyh")?.unwrap_or(0.0),
        ];
        curves.entry(name.to_string()).or_default().push(GraphPoint {
            x,
            y,
            exl,
            exh,
            eyl,
            eyh,
        });
    }
    Ok(curves
        .into_iter()
        .map(|(name, points)| Curve::new(name, points))
        .collect())
}

/// Long-format TSV readable by [`read_curve_store`].
pub fn write_curves_tsv<'a, P: AsRef<Path>>(path: P, curves: impl IntoIterator<Item = &'a Curve>) -> Result<()> {
    let rows = curves.into_iter().flat_map(|c| {
        c.points.iter().map(move |p| {
            format!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                c.name,
                fmt_f64(p.x),
                fmt_f64(p.y),
                fmt_f64(p.exl),
                fmt_f64(p.exh),
                fmt_f64(p.eyl),
                fmt_f64(p.eyh)
            )
        })
    });
    write_tsv(path, CURVES_HEADER, rows)
}
