use crate::kinematics::vector::FourMomentum;
use serde::{Deserialize, Serialize};

/// Reconstructed jet under study, plus the substructure scalars computed upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeJet {
    pub p4: FourMomentum,
    /// pt before any late-stage rescaling (jet energy corrections); drives the matching radius.
    pub pt_raw: f64,
    #[serde(default)]
    pub subjets: Vec<FourMomentum>,
    /// N-subjettiness ratio τ3/τ2.
    pub tau32: f64,
    /// Minimum pairwise invariant mass of the three leading subjets.
    #[serde(default)]
    pub pair_mass: f64,
    /// pt fraction carried by the leading subjet.
    #[serde(default)]
    pub subjet_fraction: f64,
    /// Highest b-tagging score among the subjets.
    #[serde(default)]
    pub btag: f64,
}

impl ProbeJet {
    pub fn n_subjets(&self) -> usize {
        self.subjets.len()
    }

    pub fn mass(&self) -> f64 {
        self.p4.mass
    }
}

/// Minimum pairwise mass among the three leading subjets; `None` with fewer than three.
pub fn min_pair_mass(subjets: &[FourMomentum]) -> Option<f64> {
    if subjets.len() < 3 {
        return None;
    }
    let mut leading: Vec<&FourMomentum> = subjets.iter().collect();
    leading.sort_by(|a, b| b.pt.total_cmp(&a.pt));
    let (a, b, c) = (leading[0], leading[1], leading[2]);
    let m = a.pair_mass(b).min(a.pair_mass(c)).min(b.pair_mass(c));
    Some(m)
}

/// Leading subjet pt over the jet pt.
pub fn leading_subjet_fraction(jet_pt: f64, subjets: &[FourMomentum]) -> Option<f64> {
    if jet_pt <= 0.0 {
        return None;
    }
    subjets
        .iter()
        .map(|s| s.pt)
        .max_by(|a, b| a.total_cmp(b))
        .map(|pt| pt / jet_pt)
}
