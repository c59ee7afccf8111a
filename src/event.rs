use crate::classify::truth::GenTruthSet;
use crate::kinematics::jet::ProbeJet;
use serde::{Deserialize, Serialize};

/// One event as handed over by the probe-jet provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Signed generator/analysis weight.
    pub weight: f64,
    #[serde(default)]
    pub jet: Option<ProbeJet>,
    #[serde(default)]
    pub truth: Option<GenTruthSet>,
}
