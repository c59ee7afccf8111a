use crate::classify::scenario::MergeScenario;
use crate::histo::aggregate::Aggregator;
use crate::histo::bucket::{BucketKey, BucketLayout, JetCategory, PassFail, PtBinning, Tagger};
use crate::io::tsv::{column, fmt_f64, parse_opt_f64, tsv_reader, write_tsv_gz};
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

pub const BUCKETS_FILE: &str = "buckets.tsv.gz";
pub const BUCKET_MASS_FILE: &str = "bucket_mass.tsv.gz";

const BUCKETS_HEADER: &str =
    "pt_bin\tpt_min\tpt_max\tcategory\tworking_point\tthreshold\tpass\tscenario\tsum_w\tsum_w2\tentries";
const MASS_HEADER: &str =
    "pt_bin\tcategory\tworking_point\tpass\tscenario\tbin\tmass_min\tmass_max\tsum_w\tsum_w2";

/// A bucket table read back from disk, with the thresholds it was filled with.
#[derive(Debug, Clone)]
pub struct BucketTable {
    pub aggregator: Aggregator,
    pub tagger: Tagger,
}

pub fn write_bucket_table<P: AsRef<Path>>(path: P, agg: &Aggregator, tagger: &Tagger) -> Result<()> {
    let binning = agg.layout().binning();
    let rows = agg.iter().map(|(key, stats)| {
        let range = binning.range(key.pt_bin);
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            key.pt_bin.index(),
            fmt_f64(range.min),
            fmt_f64(range.max),
            key.category,
            key.working_point,
            tagger.threshold(key.working_point).map(fmt_f64).unwrap_or_else(|| "NA".to_string()),
            key.pass.as_str(),
            key.scenario,
            fmt_f64(stats.sum_w),
            fmt_f64(stats.sum_w2),
            stats.entries
        )
    });
    write_tsv_gz(path, BUCKETS_HEADER, rows)
}

pub fn write_bucket_mass<P: AsRef<Path>>(path: P, agg: &Aggregator) -> Result<()> {
    let edges = agg.mass_edges();
    let rows = agg.iter().flat_map(|(key, stats)| {
        let h = &stats.mass;
        let prefix = format!(
            "{}\t{}\t{}\t{}\t{}",
            key.pt_bin.index(),
            key.category,
            key.working_point,
            key.pass.as_str(),
            key.scenario
        );
        let under = (h.underflow != (0.0, 0.0)).then(|| {
            format!(
                "{prefix}\tunderflow\tNA\t{}\t{}\t{}",
                fmt_f64(edges[0]),
                fmt_f64(h.underflow.0),
                fmt_f64(h.underflow.1)
            )
        });
        let over = (h.overflow != (0.0, 0.0)).then(|| {
            format!(
                "{prefix}\toverflow\t{}\tNA\t{}\t{}",
                fmt_f64(edges[edges.len() - 1]),
                fmt_f64(h.overflow.0),
                fmt_f64(h.overflow.1)
            )
        });
        let bins: Vec<String> = (0..h.n_bins())
            .filter(|&i| h.sum_w[i] != 0.0 || h.sum_w2[i] != 0.0)
            .map(|i| {
                format!(
                    "{prefix}\t{i}\t{}\t{}\t{}\t{}",
                    fmt_f64(edges[i]),
                    fmt_f64(edges[i + 1]),
                    fmt_f64(h.sum_w[i]),
                    fmt_f64(h.sum_w2[i])
                )
            })
            .collect();
        under.into_iter().chain(bins).chain(over)
    });
    write_tsv_gz(path, MASS_HEADER, rows)
}

#[derive(Debug, Clone)]
struct BucketRow {
    pt_bin: usize,
    category: JetCategory,
    working_point: usize,
    pass: PassFail,
    scenario: MergeScenario,
    sum_w: f64,
    sum_w2: f64,
    entries: u64,
}

fn required(raw: Option<&str>, name: &str) -> Result<f64> {
    parse_opt_f64(raw.unwrap_or(""))?.ok_or_else(|| anyhow!("missing value in column '{name}'"))
}

fn field<'r>(rec: &'r csv::StringRecord, idx: usize, name: &str) -> Result<&'r str> {
    rec.get(idx)
        .map(str::trim)
        .ok_or_else(|| anyhow!("missing column '{name}'"))
}

/// Restore a bucket table written by [`write_bucket_table`].
///
/// The pt binning and thresholds are rebuilt from the rows and every bucket of the resulting
/// layout must appear exactly once. Mass histograms start empty with `mass_edges`; see
/// [`read_bucket_mass`].
pub fn read_bucket_table<P: AsRef<Path>>(path: P, mass_edges: &[f64]) -> Result<BucketTable> {
    let path = path.as_ref();
    let mut rdr = tsv_reader(path)?;
    let headers = rdr
        .headers()
        .with_context(|| format!("failed reading bucket table header: {}", path.display()))?
        .clone();
    let idx_pt_bin = column(&headers, "pt_bin")?;
    let idx_pt_min = column(&headers, "pt_min")?;
    let idx_pt_max = column(&headers, "pt_max")?;
    let idx_category = column(&headers, "category")?;
    let idx_wp = column(&headers, "working_point")?;
    let idx_threshold = column(&headers, "threshold")?;
    let idx_pass = column(&headers, "pass")?;
    let idx_scenario = column(&headers, "scenario")?;
    let idx_sum_w = column(&headers, "sum_w")?;
    let idx_sum_w2 = column(&headers, "sum_w2")?;
    let idx_entries = column(&headers, "entries")?;

    let mut pt_ranges: BTreeMap<usize, (f64, f64)> = BTreeMap::new();
    let mut thresholds: BTreeMap<usize, f64> = BTreeMap::new();
    let mut rows: Vec<BucketRow> = Vec::new();

    for (row_idx, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("failed reading record {}", row_idx + 1))?;
        let mut parse_row = || -> Result<()> {
            let pt_bin: usize = field(&rec, idx_pt_bin, "pt_bin")?.parse()?;
            let range = (
                required(rec.get(idx_pt_min), "pt_min")?,
                required(rec.get(idx_pt_max), "pt_max")?,
            );
            if *pt_ranges.entry(pt_bin).or_insert(range) != range {
                return Err(anyhow!("pt bin {pt_bin} has inconsistent edges"));
            }
            let working_point: usize = field(&rec, idx_wp, "working_point")?.parse()?;
            let threshold = required(rec.get(idx_threshold), "threshold")?;
            if *thresholds.entry(working_point).or_insert(threshold) != threshold {
                return Err(anyhow!("working point {working_point} has inconsistent thresholds"));
            }
            rows.push(BucketRow {
                pt_bin,
                category: field(&rec, idx_category, "category")?.parse()?,
                working_point,
                pass: field(&rec, idx_pass, "pass")?.parse()?,
                scenario: field(&rec, idx_scenario, "scenario")?.parse()?,
                sum_w: required(rec.get(idx_sum_w), "sum_w")?,
                sum_w2: required(rec.get(idx_sum_w2), "sum_w2")?,
                entries: field(&rec, idx_entries, "entries")?.parse()?,
            });
            Ok(())
        };
        parse_row().with_context(|| format!("invalid bucket row at record {}", row_idx + 1))?;
    }

    let binning = binning_from_ranges(&pt_ranges)?;
    let n_wp = thresholds.len();
    if thresholds.keys().copied().ne(0..n_wp) {
        return Err(anyhow!("working point indices are not contiguous from 0"));
    }
    let file_order: Vec<f64> = thresholds.values().copied().collect();
    let tagger = Tagger::new(file_order.clone(), None)?;
    if tagger.thresholds() != file_order.as_slice() {
        return Err(anyhow!("thresholds are not distinct and ordered loosest first"));
    }
    let layout = BucketLayout::new(binning, n_wp)?;
    let mut aggregator = Aggregator::new(layout, mass_edges.to_vec())?;

    let mut seen = vec![false; aggregator.layout().len()];
    for row in rows {
        let key = BucketKey {
            pt_bin: aggregator.layout().binning().bin(row.pt_bin)?,
            category: row.category,
            working_point: row.working_point,
            pass: row.pass,
            scenario: row.scenario,
        };
        let id = aggregator.layout().id(&key)?;
        if std::mem::replace(&mut seen[id.index()], true) {
            return Err(anyhow!("bucket {key:?} appears twice"));
        }
        let stats = aggregator.stats_mut(id);
        stats.sum_w = row.sum_w;
        stats.sum_w2 = row.sum_w2;
        stats.entries = row.entries;
    }
    let missing = seen.iter().filter(|s| !**s).count();
    if missing > 0 {
        return Err(anyhow!("bucket table is incomplete: {missing} buckets missing"));
    }

    tracing::debug!(
        path = %path.display(),
        buckets = aggregator.layout().len(),
        pt_bins = aggregator.layout().binning().len(),
        working_points = n_wp,
        "bucket table loaded"
    );
    Ok(BucketTable { aggregator, tagger })
}

fn binning_from_ranges(ranges: &BTreeMap<usize, (f64, f64)>) -> Result<PtBinning> {
    if ranges.keys().copied().ne(0..ranges.len()) {
        return Err(anyhow!("pt bin indices are not contiguous from 0"));
    }
    let mut edges: Vec<f64> = Vec::with_capacity(ranges.len() + 1);
    for (i, &(lo, hi)) in ranges.values().enumerate() {
        match edges.last() {
            Some(&prev) if prev != lo => {
                return Err(anyhow!("pt bin {i} starts at {lo} but the previous bin ends at {prev}"));
            }
            Some(_) => {}
            None => edges.push(lo),
        }
        edges.push(hi);
    }
    Ok(PtBinning::new(edges)?)
}

/// Fill the mass histograms of `agg` from a file written by [`write_bucket_mass`].
pub fn read_bucket_mass<P: AsRef<Path>>(path: P, agg: &mut Aggregator) -> Result<()> {
    let path = path.as_ref();
    let mut rdr = tsv_reader(path)?;
    let headers = rdr
        .headers()
        .with_context(|| format!("failed reading bucket mass header: {}", path.display()))?
        .clone();
    let idx_pt_bin = column(&headers, "pt_bin")?;
    let idx_category = column(&headers, "category")?;
    let idx_wp = column(&headers, "working_point")?;
    let idx_pass = column(&headers, "pass")?;
    let idx_scenario = column(&headers, "scenario")?;
    let idx_bin = column(&headers, "bin")?;
    let idx_min = column(&headers, "mass_min")?;
    let idx_max = column(&headers, "mass_max")?;
    let idx_sum_w = column(&headers, "sum_w")?;
    let idx_sum_w2 = column(&headers, "sum_w2")?;
    let edges = agg.mass_edges().to_vec();

    for (row_idx, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("failed reading record {}", row_idx + 1))?;
        let mut apply = || -> Result<()> {
            let key = BucketKey {
                pt_bin: agg.layout().binning().bin(field(&rec, idx_pt_bin, "pt_bin")?.parse()?)?,
                category: field(&rec, idx_category, "category")?.parse()?,
                working_point: field(&rec, idx_wp, "working_point")?.parse()?,
                pass: field(&rec, idx_pass, "pass")?.parse()?,
                scenario: field(&rec, idx_scenario, "scenario")?.parse()?,
            };
            let id = agg.layout().id(&key)?;
            let content = (
                required(rec.get(idx_sum_w), "sum_w")?,
                required(rec.get(idx_sum_w2), "sum_w2")?,
            );
            let lo = parse_opt_f64(field(&rec, idx_min, "mass_min")?)?;
            let hi = parse_opt_f64(field(&rec, idx_max, "mass_max")?)?;
            let hist = &mut agg.stats_mut(id).mass;
            match field(&rec, idx_bin, "bin")? {
                "underflow" => hist.underflow = content,
                "overflow" => hist.overflow = content,
                raw => {
                    let i: usize = raw.parse().with_context(|| format!("invalid bin '{raw}'"))?;
                    if i + 1 >= edges.len() || lo != Some(edges[i]) || hi != Some(edges[i + 1]) {
                        return Err(anyhow!("mass bin {i} does not match the configured mass edges"));
                    }
                    hist.sum_w[i] = content.0;
                    hist.sum_w2[i] = content.1;
                }
            }
            Ok(())
        };
        apply().with_context(|| format!("invalid mass row at record {}", row_idx + 1))?;
    }
    Ok(())
}
