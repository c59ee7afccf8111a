use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tagcal::classify::scenario::{AssociatedPolicy, MergeScenario};
use tagcal::config::TaggerPreset;
use tagcal::histo::bucket::JetCategory;

#[derive(Parser, Debug)]
#[command(
    name = "tagcal",
    about = "Top-tagging calibration: merge-scenario bucket tables, working points and scale factors",
    version
)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify probe jets and fill the weighted bucket table.
    Fill(FillArgs),
    /// Derive tagger working points from signal and background bucket tables.
    WorkingPoints(WorkingPointArgs),
    /// Read scale factors from a curve store and combine their uncertainties.
    ScaleFactors(ScaleFactorArgs),
}

/// Labelling of a fully matched jet when the truth comes from associated production.
#[derive(ValueEnum, Debug, Clone, Copy)]
enum PolicyArg {
    /// Keep the decision table: the jet is fully merged.
    MergeTable,
    /// The jet is background.
    ThreeBodyAsBackground,
}

impl From<PolicyArg> for AssociatedPolicy {
    fn from(p: PolicyArg) -> Self {
        match p {
            PolicyArg::MergeTable => AssociatedPolicy::MergeTable,
            PolicyArg::ThreeBodyAsBackground => AssociatedPolicy::ThreeBodyAsBackground,
        }
    }
}

#[derive(Parser, Debug)]
struct FillArgs {
    /// Events table (CSV/TSV(.gz)/Parquet/JSON Lines).
    #[arg(long)]
    events: String,

    /// Output directory (created if missing).
    #[arg(long)]
    out: String,

    /// Probe-jet algorithm: matching rule, mass window, preselection and default pt binning.
    #[arg(long, value_enum, default_value_t = TaggerPreset::Ak8)]
    tagger: TaggerPreset,

    /// How associated-production truth is labelled. Required; there is no default.
    #[arg(long, value_enum)]
    associated_policy: PolicyArg,

    /// Subjet b-tag score above which a jet enters the b-tagged categories.
    #[arg(long, default_value_t = 0.5)]
    btag_min: f64,

    /// Number of threads (rayon worker threads).
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Optional pt edges file (one edge per line, GeV); defaults to the tagger's embedded binning.
    #[arg(long)]
    pt_edges: Option<String>,

    /// Optional τ32 thresholds file (one per line); defaults to the embedded threshold scan.
    #[arg(long)]
    thresholds: Option<String>,

    /// Optional jet-mass histogram edges file (one per line, GeV).
    #[arg(long)]
    mass_edges: Option<String>,
}

#[derive(Parser, Debug)]
struct WorkingPointArgs {
    /// Signal bucket table, or the `fill` output directory holding it.
    #[arg(long)]
    signal: String,

    /// Background bucket table, or the `fill` output directory holding it.
    #[arg(long)]
    background: String,

    /// Output directory (created if missing).
    #[arg(long)]
    out: String,

    /// Jet category the efficiencies are measured in.
    #[arg(long, default_value = "inclusive")]
    category: JetCategory,

    /// Merge scenarios counted as signal (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "fully_merged")]
    signal_scenarios: Vec<MergeScenario>,

    /// Target background efficiencies (comma-separated); overrides --targets-file.
    #[arg(long, value_delimiter = ',')]
    targets: Vec<f64>,

    /// Optional targets file (one per line); defaults to the embedded target list.
    #[arg(long)]
    targets_file: Option<String>,

    /// Pt bin whose curves are scanned; the found index is carried to the other bins.
    #[arg(long, default_value_t = 0)]
    reference_pt_bin: usize,

    /// Optional jet-mass histogram edges file used when the tables were filled.
    #[arg(long)]
    mass_edges: Option<String>,
}

#[derive(Parser, Debug)]
struct ScaleFactorArgs {
    /// Curve store (JSON or long TSV).
    #[arg(long)]
    store: String,

    /// Output directory (created if missing).
    #[arg(long)]
    out: String,

    /// Data-taking periods (comma-separated).
    #[arg(long, value_delimiter = ',', required = true)]
    years: Vec<String>,

    /// Merge scenarios (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "fully_merged,w_merged,qb_merged,not_merged,background")]
    scenarios: Vec<MergeScenario>,

    /// Working-point names as used in the store (comma-separated).
    #[arg(long, value_delimiter = ',', required = true)]
    working_points: Vec<String>,

    /// Tagger whose default pt binning is used.
    #[arg(long, value_enum, default_value_t = TaggerPreset::Ak8)]
    tagger: TaggerPreset,

    /// Optional pt edges file (one edge per line, GeV).
    #[arg(long)]
    pt_edges: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Fill(args) => {
            let cfg = tagcal::FillConfig {
                events_path: args.events,
                out_dir: args.out,
                preset: args.tagger,
                policy: args.associated_policy.into(),
                btag_min: args.btag_min,
                threads: args.threads,
                pt_edges_path: args.pt_edges,
                thresholds_path: args.thresholds,
                mass_edges_path: args.mass_edges,
            };
            tagcal::fill(cfg).map(|_| ())
        }
        Commands::WorkingPoints(args) => {
            let cfg = tagcal::WorkingPointConfig {
                signal_buckets: args.signal,
                background_buckets: args.background,
                out_dir: args.out,
                category: args.category,
                signal_scenarios: args.signal_scenarios,
                targets: args.targets,
                targets_path: args.targets_file,
                reference_pt_bin: args.reference_pt_bin,
                mass_edges_path: args.mass_edges,
            };
            tagcal::working_points(cfg).map(|_| ())
        }
        Commands::ScaleFactors(args) => {
            let cfg = tagcal::ScaleFactorConfig {
                store_path: args.store,
                out_dir: args.out,
                years: args.years,
                scenarios: args.scenarios,
                working_points: args.working_points,
                preset: args.tagger,
                pt_edges_path: args.pt_edges,
            };
            tagcal::scale_factors(cfg).map(|_| ())
        }
    }
}
