use crate::kinematics::vector::FourMomentum;
use serde::{Deserialize, Serialize};

/// Generator-level decay products used for merge classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenTruthSet {
    /// t -> bW, W -> q1 q2.
    TopDecay {
        b: FourMomentum,
        q1: FourMomentum,
        q2: FourMomentum,
    },
    /// Associated production: the associated b and the decay products of the second W.
    Associated {
        b: FourMomentum,
        q1: FourMomentum,
        q2: FourMomentum,
    },
}

impl GenTruthSet {
    pub fn b(&self) -> &FourMomentum {
        match self {
            GenTruthSet::TopDecay { b, .. } | GenTruthSet::Associated { b, .. } => b,
        }
    }

    pub fn q1(&self) -> &FourMomentum {
        match self {
            GenTruthSet::TopDecay { q1, .. } | GenTruthSet::Associated { q1, .. } => q1,
        }
    }

    pub fn q2(&self) -> &FourMomentum {
        match self {
            GenTruthSet::TopDecay { q2, .. } | GenTruthSet::Associated { q2, .. } => q2,
        }
    }

    pub fn is_associated(&self) -> bool {
        matches!(self, GenTruthSet::Associated { .. })
    }
}
