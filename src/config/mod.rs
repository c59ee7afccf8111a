use crate::histo::bucket::{CategoryCuts, Preselection};
use crate::kinematics::matching::JetAlgorithm;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;

pub const DEFAULT_PT_EDGES_AK8: &str = include_str!("../../config/pt_edges_ak8.txt");
pub const DEFAULT_PT_EDGES_HOTVR: &str = include_str!("../../config/pt_edges_hotvr.txt");
pub const DEFAULT_TAU32_THRESHOLDS: &str = include_str!("../../config/tau32_thresholds.txt");
pub const DEFAULT_MASS_EDGES: &str = include_str!("../../config/mass_edges.txt");
pub const DEFAULT_TARGETS: &str = include_str!("../../config/targets.txt");

/// One finite number per line; blank lines and `#` comments are skipped. Order is kept.
pub fn parse_values_str(raw: &str, label: &str) -> Result<Vec<f64>> {
    let mut values: Vec<f64> = Vec::new();
    for (line_idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let v: f64 = line.parse().map_err(|e| {
            anyhow!(
                "invalid value at line {} of {}: {} ({})",
                line_idx + 1,
                label,
                line,
                e
            )
        })?;
        if !v.is_finite() {
            return Err(anyhow!(
                "non-finite value at line {} of {}: {}",
                line_idx + 1,
                label,
                line
            ));
        }
        values.push(v);
    }
    if values.is_empty() {
        return Err(anyhow!("value list is empty: {}", label));
    }
    Ok(values)
}

pub fn read_values<P: AsRef<Path>>(path: P) -> Result<Vec<f64>> {
    let path_ref = path.as_ref();
    let raw = fs::read_to_string(path_ref)
        .with_context(|| format!("failed to read value list: {}", path_ref.display()))?;
    let label = path_ref.display().to_string();
    parse_values_str(&raw, &label)
}

/// Read `path` if given, otherwise parse the embedded default.
pub fn values_or_default(path: Option<&str>, default: &str, label: &str) -> Result<Vec<f64>> {
    match path {
        Some(p) => read_values(p).with_context(|| format!("failed reading {label}: {p}")),
        None => parse_values_str(default, label),
    }
}

/// Probe-jet algorithm families with their matching rule and default selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TaggerPreset {
    /// Fixed-cone R = 0.8 jets, soft-drop mass window.
    Ak8,
    /// Variable-cone jets with subjet preselection.
    Hotvr,
}

impl TaggerPreset {
    pub fn algorithm(self) -> JetAlgorithm {
        match self {
            TaggerPreset::Ak8 => JetAlgorithm::ak8(),
            TaggerPreset::Hotvr => JetAlgorithm::hotvr(),
        }
    }

    pub fn category_cuts(self, btag_min: f64) -> CategoryCuts {
        let (mass_min, mass_max) = match self {
            TaggerPreset::Ak8 => (105.0, 210.0),
            TaggerPreset::Hotvr => (140.0, 220.0),
        };
        CategoryCuts {
            mass_min,
            mass_max,
            btag_min,
        }
    }

    pub fn preselection(self) -> Option<Preselection> {
        match self {
            TaggerPreset::Ak8 => None,
            TaggerPreset::Hotvr => Some(Preselection::hotvr()),
        }
    }

    pub fn default_pt_edges(self) -> &'static str {
        match self {
            TaggerPreset::Ak8 => DEFAULT_PT_EDGES_AK8,
            TaggerPreset::Hotvr => DEFAULT_PT_EDGES_HOTVR,
        }
    }
}
