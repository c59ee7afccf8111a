use anyhow::{anyhow, Context, Result};

pub mod calib;
pub mod classify;
pub mod config;
pub mod error;
pub mod event;
pub mod histo;
pub mod io;
pub mod kinematics;

use calib::pipeline::{ScaleFactorRow, ScaleFactorRunConfig, WorkingPointRunConfig};
use calib::scan::WorkingPointResult;
use classify::scenario::{AssociatedPolicy, MergeScenario};
use config::TaggerPreset;
use histo::aggregate::FillSummary;
use histo::bucket::{JetCategory, Tagger};

#[derive(Debug, Clone)]
pub struct FillConfig {
    pub events_path: String,
    pub out_dir: String,
    pub preset: TaggerPreset,
    pub policy: AssociatedPolicy,
    pub btag_min: f64,
    pub threads: usize,
    pub pt_edges_path: Option<String>,
    pub thresholds_path: Option<String>,
    pub mass_edges_path: Option<String>,
}

pub fn fill(cfg: FillConfig) -> Result<FillSummary> {
    if cfg.threads == 0 {
        return Err(anyhow!("--threads must be >= 1"));
    }
    if !cfg.btag_min.is_finite() {
        return Err(anyhow!("--btag-min must be finite"));
    }

    let pt_edges = config::values_or_default(
        cfg.pt_edges_path.as_deref(),
        cfg.preset.default_pt_edges(),
        "--pt-edges",
    )?;
    let thresholds = config::values_or_default(
        cfg.thresholds_path.as_deref(),
        config::DEFAULT_TAU32_THRESHOLDS,
        "--thresholds",
    )?;
    let mass_edges = config::values_or_default(
        cfg.mass_edges_path.as_deref(),
        config::DEFAULT_MASS_EDGES,
        "--mass-edges",
    )?;
    let tagger = Tagger::new(thresholds, cfg.preset.preselection())?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.threads)
        .build()
        .context("failed creating rayon thread pool")?;

    pool.install(|| {
        calib::pipeline::run_fill(calib::pipeline::FillRunConfig {
            events_path: cfg.events_path,
            out_dir: cfg.out_dir,
            algorithm: cfg.preset.algorithm(),
            policy: cfg.policy,
            cuts: cfg.preset.category_cuts(cfg.btag_min),
            tagger,
            pt_edges,
            mass_edges,
        })
    })
}

#[derive(Debug, Clone)]
pub struct WorkingPointConfig {
    pub signal_buckets: String,
    pub background_buckets: String,
    pub out_dir: String,
    pub category: JetCategory,
    pub signal_scenarios: Vec<MergeScenario>,
    /// Explicit targets; the targets file (or the embedded default) is used when empty.
    pub targets: Vec<f64>,
    pub targets_path: Option<String>,
    pub reference_pt_bin: usize,
    pub mass_edges_path: Option<String>,
}

pub fn working_points(cfg: WorkingPointConfig) -> Result<Vec<WorkingPointResult>> {
    if cfg.signal_scenarios.is_empty() {
        return Err(anyhow!("--signal-scenarios must name at least one scenario"));
    }
    let targets = if cfg.targets.is_empty() {
        config::values_or_default(cfg.targets_path.as_deref(), config::DEFAULT_TARGETS, "--targets-file")?
    } else {
        cfg.targets
    };
    if let Some(t) = targets.iter().find(|t| !(**t > 0.0 && **t <= 1.0)) {
        return Err(anyhow!("target efficiencies must be in (0, 1]; got {t}"));
    }
    let mass_edges = config::values_or_default(
        cfg.mass_edges_path.as_deref(),
        config::DEFAULT_MASS_EDGES,
        "--mass-edges",
    )?;

    calib::pipeline::run_working_points(WorkingPointRunConfig {
        signal_buckets: cfg.signal_buckets,
        background_buckets: cfg.background_buckets,
        out_dir: cfg.out_dir,
        category: cfg.category,
        signal_scenarios: cfg.signal_scenarios,
        targets,
        reference_pt_bin: cfg.reference_pt_bin,
        mass_edges,
    })
}

#[derive(Debug, Clone)]
pub struct ScaleFactorConfig {
    pub store_path: String,
    pub out_dir: String,
    pub years: Vec<String>,
    pub scenarios: Vec<MergeScenario>,
    pub working_points: Vec<String>,
    pub preset: TaggerPreset,
    pub pt_edges_path: Option<String>,
}

pub fn scale_factors(cfg: ScaleFactorConfig) -> Result<Vec<ScaleFactorRow>> {
    if cfg.years.is_empty() {
        return Err(anyhow!("--years must name at least one year"));
    }
    if cfg.scenarios.is_empty() {
        return Err(anyhow!("--scenarios must name at least one scenario"));
    }
    if cfg.working_points.is_empty() {
        return Err(anyhow!("--working-points must name at least one working point"));
    }
    if let Some(bad) = cfg
        .years
        .iter()
        .chain(cfg.working_points.iter())
        .find(|s| s.is_empty() || s.contains('/'))
    {
        return Err(anyhow!("year and working-point names must be non-empty without '/': {bad:?}"));
    }
    let pt_edges = config::values_or_default(
        cfg.pt_edges_path.as_deref(),
        cfg.preset.default_pt_edges(),
        "--pt-edges",
    )?;

    calib::pipeline::run_scale_factors(ScaleFactorRunConfig {
        store_path: cfg.store_path,
        out_dir: cfg.out_dir,
        years: cfg.years,
        scenarios: cfg.scenarios,
        working_points: cfg.working_points,
        pt_edges,
    })
}
