//! Bucket keys map to a flat index, row-major over (pt bin, category, working point, pass/fail,
//! scenario).

use crate::classify::scenario::MergeScenario;
use crate::error::{CalibError, Result};
use crate::histo::hist::check_edges;
use crate::kinematics::jet::ProbeJet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PtBin(usize);

impl PtBin {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PtRange {
    pub min: f64,
    pub max: f64,
}

impl PtRange {
    pub fn label(&self) -> String {
        format!("{}to{}", self.min, self.max)
    }
}

/// Half-open momentum bins over strictly increasing edges.
#[derive(Debug, Clone, PartialEq)]
pub struct PtBinning {
    edges: Vec<f64>,
}

impl PtBinning {
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        check_edges(&edges)?;
        Ok(Self { edges })
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn locate(&self, pt: f64) -> Option<PtBin> {
        let last = self.edges[self.edges.len() - 1];
        if !(pt >= self.edges[0]) || pt >= last {
            return None;
        }
        Some(PtBin(self.edges.partition_point(|&e| e <= pt) - 1))
    }

    pub fn bin(&self, index: usize) -> Result<PtBin> {
        if index < self.len() {
            Ok(PtBin(index))
        } else {
            Err(CalibError::UnknownBucket(format!(
                "pt bin {index} outside {} bins",
                self.len()
            )))
        }
    }

    pub fn range(&self, bin: PtBin) -> PtRange {
        PtRange {
            min: self.edges[bin.0],
            max: self.edges[bin.0 + 1],
        }
    }

    pub fn bins(&self) -> impl Iterator<Item = PtBin> {
        (0..self.len()).map(PtBin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JetCategory {
    /// No requirement beyond the tagger itself.
    Inclusive,
    MassWindow,
    BTag,
    MassWindowBTag,
}

impl JetCategory {
    pub const ALL: [JetCategory; 4] = [
        JetCategory::Inclusive,
        JetCategory::MassWindow,
        JetCategory::BTag,
        JetCategory::MassWindowBTag,
    ];

    pub fn index(self) -> usize {
        match self {
            JetCategory::Inclusive => 0,
            JetCategory::MassWindow => 1,
            JetCategory::BTag => 2,
            JetCategory::MassWindowBTag => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JetCategory::Inclusive => "inclusive",
            JetCategory::MassWindow => "mass_window",
            JetCategory::BTag => "btag",
            JetCategory::MassWindowBTag => "mass_window_btag",
        }
    }

    /// The same category with the b-tag requirement added.
    pub fn with_btag(self) -> JetCategory {
        match self {
            JetCategory::Inclusive | JetCategory::BTag => JetCategory::BTag,
            JetCategory::MassWindow | JetCategory::MassWindowBTag => JetCategory::MassWindowBTag,
        }
    }
}

impl fmt::Display for JetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JetCategory {
    type Err = CalibError;

    fn from_str(s: &str) -> Result<Self> {
        JetCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| CalibError::Configuration(format!("unknown jet category '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryCuts {
    pub mass_min: f64,
    pub mass_max: f64,
    pub btag_min: f64,
}

impl CategoryCuts {
    pub fn validate(&self) -> Result<()> {
        if !(self.mass_min < self.mass_max) {
            return Err(CalibError::Configuration(format!(
                "mass window [{}, {}] is empty",
                self.mass_min, self.mass_max
            )));
        }
        if !self.btag_min.is_finite() {
            return Err(CalibError::Configuration("b-tag threshold must be finite".to_string()));
        }
        Ok(())
    }

    pub fn in_mass_window(&self, jet: &ProbeJet) -> bool {
        let m = jet.mass();
        m > self.mass_min && m < self.mass_max
    }

    pub fn is_btagged(&self, jet: &ProbeJet) -> bool {
        jet.btag > self.btag_min
    }

    /// Every category the jet belongs to. Categories are independent axes, so a jet is usually
    /// in more than one.
    pub fn categories_of(&self, jet: &ProbeJet) -> impl Iterator<Item = JetCategory> {
        let mass = self.in_mass_window(jet);
        let btag = self.is_btagged(jet);
        JetCategory::ALL.into_iter().filter(move |c| match c {
            JetCategory::Inclusive => true,
            JetCategory::MassWindow => mass,
            JetCategory::BTag => btag,
            JetCategory::MassWindowBTag => mass && btag,
        })
    }
}

/// Substructure requirements applied before the τ32 cut (variable-cone tagger).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Preselection {
    pub min_subjets: usize,
    pub min_pair_mass: f64,
    pub max_subjet_fraction: f64,
}

impl Preselection {
    pub fn hotvr() -> Self {
        Self {
            min_subjets: 3,
            min_pair_mass: 50.0,
            max_subjet_fraction: 0.8,
        }
    }

    pub fn accepts(&self, jet: &ProbeJet) -> bool {
        jet.n_subjets() >= self.min_subjets
            && jet.pair_mass > self.min_pair_mass
            && jet.subjet_fraction < self.max_subjet_fraction
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassFail {
    Pass,
    Fail,
}

impl PassFail {
    pub fn index(self) -> usize {
        match self {
            PassFail::Pass => 0,
            PassFail::Fail => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PassFail::Pass => "pass",
            PassFail::Fail => "fail",
        }
    }
}

impl FromStr for PassFail {
    type Err = CalibError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pass" => Ok(PassFail::Pass),
            "fail" => Ok(PassFail::Fail),
            other => Err(CalibError::Configuration(format!("unknown pass/fail '{other}'"))),
        }
    }
}

/// τ32 working points, loosest first, plus the optional preselection.
#[derive(Debug, Clone, PartialEq)]
pub struct Tagger {
    thresholds: Vec<f64>,
    preselection: Option<Preselection>,
}

impl Tagger {
    /// Thresholds are deduplicated and ordered from the loosest (largest τ32) to the tightest.
    pub fn new(mut thresholds: Vec<f64>, preselection: Option<Preselection>) -> Result<Self> {
        if thresholds.is_empty() {
            return Err(CalibError::Configuration("no working-point thresholds".to_string()));
        }
        if let Some(bad) = thresholds.iter().find(|t| !t.is_finite()) {
            return Err(CalibError::Configuration(format!("non-finite threshold {bad}")));
        }
        thresholds.sort_by(|a, b| b.total_cmp(a));
        thresholds.dedup();
        Ok(Self {
            thresholds,
            preselection,
        })
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    pub fn threshold(&self, working_point: usize) -> Option<f64> {
        self.thresholds.get(working_point).copied()
    }

    /// Pass requires the preselection (if any) and τ32 strictly below the threshold.
    /// `None` for a working point the tagger does not have.
    pub fn decide(&self, jet: &ProbeJet, working_point: usize) -> Option<PassFail> {
        let cut = self.threshold(working_point)?;
        let preselected = self.preselection.map_or(true, |p| p.accepts(jet));
        Some(if preselected && jet.tau32 < cut {
            PassFail::Pass
        } else {
            PassFail::Fail
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    pub pt_bin: PtBin,
    pub category: JetCategory,
    pub working_point: usize,
    pub pass: PassFail,
    pub scenario: MergeScenario,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketId(usize);

impl BucketId {
    pub fn index(self) -> usize {
        self.0
    }
}

const N_CATEGORIES: usize = JetCategory::ALL.len();
const N_PASS: usize = 2;
const N_SCENARIOS: usize = MergeScenario::CONCRETE.len();

#[derive(Debug, Clone, PartialEq)]
pub struct BucketLayout {
    binning: PtBinning,
    n_working_points: usize,
}

impl BucketLayout {
    pub fn new(binning: PtBinning, n_working_points: usize) -> Result<Self> {
        if n_working_points == 0 {
            return Err(CalibError::Configuration(
                "bucket layout needs at least one working point".to_string(),
            ));
        }
        Ok(Self {
            binning,
            n_working_points,
        })
    }

    pub fn binning(&self) -> &PtBinning {
        &self.binning
    }

    pub fn n_working_points(&self) -> usize {
        self.n_working_points
    }

    pub fn len(&self) -> usize {
        self.binning.len() * N_CATEGORIES * self.n_working_points * N_PASS * N_SCENARIOS
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat index of a key; the inverse of [`BucketLayout::key`].
    pub fn id(&self, key: &BucketKey) -> Result<BucketId> {
        if key.pt_bin.0 >= self.binning.len() {
            return Err(CalibError::UnknownBucket(format!(
                "pt bin {} outside layout",
                key.pt_bin.0
            )));
        }
        if key.working_point >= self.n_working_points {
            return Err(CalibError::UnknownBucket(format!(
                "working point {} outside layout ({} defined)",
                key.working_point, self.n_working_points
            )));
        }
        let scenario = key.scenario.storage_index().ok_or_else(|| {
            CalibError::UnknownBucket("the 'all' scenario is not a stored bucket".to_string())
        })?;

        let mut idx = key.pt_bin.0;
        idx = idx * N_CATEGORIES + key.category.index();
        idx = idx * self.n_working_points + key.working_point;
        idx = idx * N_PASS + key.pass.index();
        idx = idx * N_SCENARIOS + scenario;
        Ok(BucketId(idx))
    }

    pub fn key(&self, id: BucketId) -> BucketKey {
        let mut rest = id.0;
        let scenario = MergeScenario::CONCRETE[rest % N_SCENARIOS];
        rest /= N_SCENARIOS;
        let pass = if rest % N_PASS == 0 {
            PassFail::Pass
        } else {
            PassFail::Fail
        };
        rest /= N_PASS;
        let working_point = rest % self.n_working_points;
        rest /= self.n_working_points;
        let category = JetCategory::ALL[rest % N_CATEGORIES];
        rest /= N_CATEGORIES;
        BucketKey {
            pt_bin: PtBin(rest),
            category,
            working_point,
            pass,
            scenario,
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = BucketId> {
        (0..self.len()).map(BucketId)
    }

    /// Bucket receiving a jet; every argument is required.
    pub fn bucket_key(
        &self,
        pt_bin: PtBin,
        category: JetCategory,
        pass: PassFail,
        working_point: usize,
        scenario: MergeScenario,
    ) -> Result<BucketId> {
        self.id(&BucketKey {
            pt_bin,
            category,
            working_point,
            pass,
            scenario,
        })
    }
}
