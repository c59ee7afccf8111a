use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

pub fn write_tsv<P: AsRef<Path>>(path: P, header: &str, rows: impl IntoIterator<Item = String>) -> Result<()> {
    let file = File::create(&path).with_context(|| format!("failed to create: {}", path.as_ref().display()))?;
    let mut w = BufWriter::new(file);
    writeln!(w, "{header}")?;
    for row in rows {
        writeln!(w, "{row}")?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_tsv_gz<P: AsRef<Path>>(path: P, header: &str, rows: impl IntoIterator<Item = String>) -> Result<()> {
    let file = File::create(&path).with_context(|| format!("failed to create: {}", path.as_ref().display()))?;
    let gz = GzEncoder::new(file, Compression::default());
    let mut w = BufWriter::new(gz);
    writeln!(w, "{header}")?;
    for row in rows {
        writeln!(w, "{row}")?;
    }
    let gz = w.into_inner().map_err(|e| e.into_error())?;
    gz.finish()
        .with_context(|| format!("failed to finish gzip stream: {}", path.as_ref().display()))?;
    Ok(())
}

/// Plain or gzip reader depending on a `.gz` suffix.
pub fn open_maybe_gz(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("failed to open: {}", path.display()))?;
    let path_low = path.to_string_lossy().to_ascii_lowercase();
    if path_low.ends_with(".gz") {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Tab-separated reader with a header row.
pub fn tsv_reader(path: &Path) -> Result<csv::Reader<Box<dyn Read>>> {
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(open_maybe_gz(path)?))
}

/// Position of a required header column.
pub fn column(headers: &csv::StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| anyhow::anyhow!("missing required column '{name}'"))
}

/// Full-precision float; non-finite values become `NA`.
pub fn fmt_f64(v: f64) -> String {
    if v.is_finite() {
        format!("{v}")
    } else {
        "NA".to_string()
    }
}

pub fn opt_f64(v: Option<f64>) -> String {
    v.map(fmt_f64).unwrap_or_else(|| "NA".to_string())
}

/// Inverse of [`fmt_f64`]: `NA` and empty fields read as `None`.
pub fn parse_opt_f64(raw: &str) -> Result<Option<f64>> {
    let t = raw.trim();
    if t.is_empty() || t.eq_ignore_ascii_case("na") || t.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    let v: f64 = t.parse().with_context(|| format!("invalid number '{t}'"))?;
    Ok(Some(v))
}
