//! The three runs behind the CLI: fill bucket tables, derive working points, combine scale
//! factors. Each writes its tables into an output directory.

use crate::calib::efficiency::build_curve_sets;
use crate::calib::scan::{derive_working_points, WorkingPointResult};
use crate::calib::sf::{combine_scale_factor, SfInfo, SfKey};
use crate::classify::scenario::{AssociatedPolicy, MergeScenario};
use crate::error::CalibError;
use crate::histo::aggregate::{Aggregator, FillContext, FillSummary};
use crate::histo::bucket::{BucketLayout, CategoryCuts, JetCategory, PtBinning, PtRange, Tagger};
use crate::io::buckets::{BucketTable, BUCKETS_FILE, BUCKET_MASS_FILE};
use crate::io::tsv::{fmt_f64, opt_f64};
use crate::kinematics::matching::JetAlgorithm;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const FILL_SUMMARY_FILE: &str = "fill_summary.tsv";
pub const WORKING_POINTS_FILE: &str = "working_points.tsv";
pub const EFFICIENCY_CURVES_FILE: &str = "efficiency_curves.tsv";
pub const SCALE_FACTORS_FILE: &str = "scale_factors.tsv";

#[derive(Debug, Clone)]
pub struct FillRunConfig {
    pub events_path: String,
    pub out_dir: String,
    pub algorithm: JetAlgorithm,
    pub policy: AssociatedPolicy,
    pub cuts: CategoryCuts,
    pub tagger: Tagger,
    pub pt_edges: Vec<f64>,
    pub mass_edges: Vec<f64>,
}

pub fn run_fill(cfg: FillRunConfig) -> Result<FillSummary> {
    fs::create_dir_all(&cfg.out_dir)
        .with_context(|| format!("failed creating out dir: {}", cfg.out_dir))?;
    let out_dir = PathBuf::from(&cfg.out_dir);

    let layout = BucketLayout::new(PtBinning::new(cfg.pt_edges.clone())?, cfg.tagger.len())?;
    let ctx = FillContext {
        algorithm: cfg.algorithm,
        policy: cfg.policy,
        cuts: cfg.cuts,
        tagger: cfg.tagger.clone(),
    };
    ctx.validate(&layout)?;
    tracing::info!(
        buckets = layout.len(),
        pt_bins = layout.binning().len(),
        working_points = layout.n_working_points(),
        "bucket layout ready"
    );

    let events = crate::io::events::read_events(&cfg.events_path)?;
    if events.is_empty() {
        return Err(anyhow!("no events in {}", cfg.events_path));
    }

    let mut agg = Aggregator::new(layout, cfg.mass_edges.clone())?;
    let summary = agg
        .accumulate_all(&events, &ctx)
        .with_context(|| format!("failed accumulating events from {}", cfg.events_path))?;
    tracing::info!(
        events = summary.events,
        no_probe_jet = summary.no_probe_jet,
        out_of_acceptance = summary.out_of_acceptance,
        bucket_increments = summary.bucket_increments,
        "events accumulated"
    );
    for (scenario, n) in &summary.by_scenario {
        tracing::debug!(scenario = %scenario, events = n, "scenario count");
    }

    crate::io::buckets::write_bucket_table(out_dir.join(BUCKETS_FILE), &agg, &cfg.tagger)?;
    crate::io::buckets::write_bucket_mass(out_dir.join(BUCKET_MASS_FILE), &agg)?;
    write_fill_summary(out_dir.join(FILL_SUMMARY_FILE), &cfg, &summary)?;
    Ok(summary)
}

fn write_fill_summary(path: PathBuf, cfg: &FillRunConfig, summary: &FillSummary) -> Result<()> {
    let policy = match cfg.policy {
        AssociatedPolicy::MergeTable => "merge_table",
        AssociatedPolicy::ThreeBodyAsBackground => "three_body_as_background",
    };
    let mut rows: Vec<(String, String)> = vec![
        ("events_path".to_string(), cfg.events_path.clone()),
        ("associated_policy".to_string(), policy.to_string()),
        ("mass_min".to_string(), fmt_f64(cfg.cuts.mass_min)),
        ("mass_max".to_string(), fmt_f64(cfg.cuts.mass_max)),
        ("btag_min".to_string(), fmt_f64(cfg.cuts.btag_min)),
        ("events".to_string(), summary.events.to_string()),
        ("no_probe_jet".to_string(), summary.no_probe_jet.to_string()),
        ("out_of_acceptance".to_string(), summary.out_of_acceptance.to_string()),
        ("bucket_increments".to_string(), summary.bucket_increments.to_string()),
    ];
    for scenario in MergeScenario::CONCRETE {
        let n = summary.by_scenario.get(&scenario).copied().unwrap_or(0);
        rows.push((format!("events_{scenario}"), n.to_string()));
    }
    crate::io::tsv::write_tsv(path, "key\tvalue", rows.into_iter().map(|(k, v)| format!("{k}\t{v}")))
}

#[derive(Debug, Clone)]
pub struct WorkingPointRunConfig {
    /// Bucket table file, or a fill output directory holding one.
    pub signal_buckets: String,
    pub background_buckets: String,
    pub out_dir: String,
    pub category: JetCategory,
    pub signal_scenarios: Vec<MergeScenario>,
    pub targets: Vec<f64>,
    pub reference_pt_bin: usize,
    pub mass_edges: Vec<f64>,
}

fn bucket_table_path(raw: &str) -> PathBuf {
    let p = Path::new(raw);
    if p.is_dir() {
        p.join(BUCKETS_FILE)
    } else {
        p.to_path_buf()
    }
}

/// The bucket table plus, when present next to it, its mass histograms.
fn load_bucket_table(raw: &str, mass_edges: &[f64]) -> Result<BucketTable> {
    let path = bucket_table_path(raw);
    let mut table = crate::io::buckets::read_bucket_table(&path, mass_edges)
        .with_context(|| format!("failed reading bucket table: {}", path.display()))?;
    let mass_path = path.with_file_name(BUCKET_MASS_FILE);
    if mass_path.is_file() {
        crate::io::buckets::read_bucket_mass(&mass_path, &mut table.aggregator)
            .with_context(|| format!("failed reading bucket mass: {}", mass_path.display()))?;
        tracing::debug!(path = %mass_path.display(), "bucket mass histograms loaded");
    }
    Ok(table)
}

pub fn run_working_points(cfg: WorkingPointRunConfig) -> Result<Vec<WorkingPointResult>> {
    fs::create_dir_all(&cfg.out_dir)
        .with_context(|| format!("failed creating out dir: {}", cfg.out_dir))?;
    let out_dir = PathBuf::from(&cfg.out_dir);

    let signal = load_bucket_table(&cfg.signal_buckets, &cfg.mass_edges)?;
    let background = load_bucket_table(&cfg.background_buckets, &cfg.mass_edges)?;
    if signal.tagger.thresholds() != background.tagger.thresholds() {
        return Err(anyhow!(
            "signal and background bucket tables were filled with different thresholds"
        ));
    }

    let sets = build_curve_sets(
        &signal.aggregator,
        &background.aggregator,
        &background.tagger,
        cfg.category,
        &cfg.signal_scenarios,
    )?;
    let results = derive_working_points(&sets, cfg.reference_pt_bin, &cfg.targets)?;

    let missing = results.iter().filter(|r| r.result.is_err()).count();
    tracing::info!(
        curve_sets = sets.len(),
        targets = cfg.targets.len(),
        entries = results.len(),
        missing,
        "working points derived"
    );

    write_working_points(out_dir.join(WORKING_POINTS_FILE), &results)?;
    let curves = sets.iter().flat_map(|s| {
        std::iter::once(s.curves().reference()).chain(s.curves().companions().iter())
    });
    crate::io::curves::write_curves_tsv(out_dir.join(EFFICIENCY_CURVES_FILE), curves)?;
    Ok(results)
}

fn write_working_points(path: PathBuf, results: &[WorkingPointResult]) -> Result<()> {
    let header = [
        "target",
        "label",
        "index",
        "threshold",
        "achieved",
        "signal_eff",
        "background_tagged_eff",
        "signal_tagged_eff",
        "status",
    ]
    .join("\t");
    let rows = results.iter().map(|r| match &r.result {
        Ok(wp) => format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\tok",
            fmt_f64(r.target),
            r.label,
            wp.index,
            fmt_f64(wp.threshold),
            fmt_f64(wp.achieved),
            opt_f64(wp.signal_eff),
            opt_f64(wp.background_tagged_eff),
            opt_f64(wp.signal_tagged_eff)
        ),
        Err(e) => format!(
            "{}\t{}\tNA\tNA\tNA\tNA\tNA\tNA\t{}",
            fmt_f64(r.target),
            r.label,
            e.status()
        ),
    });
    crate::io::tsv::write_tsv(path, &header, rows)
}

#[derive(Debug, Clone)]
pub struct ScaleFactorRunConfig {
    pub store_path: String,
    pub out_dir: String,
    pub years: Vec<String>,
    pub scenarios: Vec<MergeScenario>,
    pub working_points: Vec<String>,
    pub pt_edges: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScaleFactorRow {
    pub key: SfKey,
    pub pt: PtRange,
    pub result: std::result::Result<SfInfo, CalibError>,
}

/// Missing curves and pt bins without a point are reported per row; misaligned curves abort.
pub fn run_scale_factors(cfg: ScaleFactorRunConfig) -> Result<Vec<ScaleFactorRow>> {
    fs::create_dir_all(&cfg.out_dir)
        .with_context(|| format!("failed creating out dir: {}", cfg.out_dir))?;
    let out_dir = PathBuf::from(&cfg.out_dir);

    let store = crate::io::curves::read_curve_store(&cfg.store_path)?;
    let binning = PtBinning::new(cfg.pt_edges.clone())?;

    let mut rows: Vec<ScaleFactorRow> = Vec::new();
    for year in &cfg.years {
        for &scenario in &cfg.scenarios {
            for working_point in &cfg.working_points {
                let key = SfKey {
                    year: year.clone(),
                    scenario,
                    working_point: working_point.clone(),
                };
                for pt_bin in binning.bins() {
                    let pt = binning.range(pt_bin);
                    let result = combine_scale_factor(&store, &key, pt);
                    if let Err(e @ CalibError::AlignmentViolation { .. }) = &result {
                        return Err(anyhow::Error::new(e.clone())
                            .context(format!("scale factor {key} at pt {}", pt.label())));
                    }
                    if let Err(e) = &result {
                        tracing::warn!(key = %key, pt_bin = %pt.label(), error = %e, "scale factor missing");
                    }
                    rows.push(ScaleFactorRow {
                        key: key.clone(),
                        pt,
                        result,
                    });
                }
            }
        }
    }

    let missing = rows.iter().filter(|r| r.result.is_err()).count();
    tracing::info!(entries = rows.len(), missing, "scale factors combined");
    write_scale_factors(out_dir.join(SCALE_FACTORS_FILE), &rows)?;
    Ok(rows)
}

fn write_scale_factors(path: PathBuf, rows: &[ScaleFactorRow]) -> Result<()> {
    let header = [
        "year",
        "scenario",
        "working_point",
        "pt_min",
        "pt_max",
        "central",
        "total_up",
        "total_down",
        "stat_up",
        "stat_down",
        "syst_up",
        "syst_down",
        "combined_up",
        "combined_down",
        "status",
    ]
    .join("\t");
    let lines = rows.iter().map(|r| {
        let mut fields: Vec<String> = vec![
            r.key.year.clone(),
            r.key.scenario.to_string(),
            r.key.working_point.clone(),
            fmt_f64(r.pt.min),
            fmt_f64(r.pt.max),
        ];
        match &r.result {
            Ok(sf) => {
                fields.push(fmt_f64(sf.central));
                for e in [sf.total, sf.stat, sf.syst] {
                    fields.push(fmt_f64(e.up));
                    fields.push(fmt_f64(e.down));
                }
                fields.push(opt_f64(sf.combined.map(|c| c.up)));
                fields.push(opt_f64(sf.combined.map(|c| c.down)));
                fields.push("ok".to_string());
            }
            Err(e) => {
                fields.extend(std::iter::repeat("NA".to_string()).take(9));
                fields.push(e.status().to_string());
            }
        }
        fields.join("\t")
    });
    crate::io::tsv::write_tsv(path, &header, lines)
}
