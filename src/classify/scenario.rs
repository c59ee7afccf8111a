use crate::classify::truth::GenTruthSet;
use crate::error::{CalibError, Result};
use crate::kinematics::jet::ProbeJet;
use crate::kinematics::matching::{is_matched, matching_radius, JetAlgorithm};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeScenario {
    FullyMerged,
    WMerged,
    QbMerged,
    NotMerged,
    Background,
    /// Inclusive pseudo-label; never assigned to a jet.
    All,
}

impl MergeScenario {
    /// Labels a jet can actually receive, in storage order.
    pub const CONCRETE: [MergeScenario; 5] = [
        MergeScenario::FullyMerged,
        MergeScenario::WMerged,
        MergeScenario::QbMerged,
        MergeScenario::NotMerged,
        MergeScenario::Background,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MergeScenario::FullyMerged => "fully_merged",
            MergeScenario::WMerged => "w_merged",
            MergeScenario::QbMerged => "qb_merged",
            MergeScenario::NotMerged => "not_merged",
            MergeScenario::Background => "background",
            MergeScenario::All => "all",
        }
    }

    /// Position in [`MergeScenario::CONCRETE`]; `None` for `All`.
    pub fn storage_index(self) -> Option<usize> {
        match self {
            MergeScenario::FullyMerged => Some(0),
            MergeScenario::WMerged => Some(1),
            MergeScenario::QbMerged => Some(2),
            MergeScenario::NotMerged => Some(3),
            MergeScenario::Background => Some(4),
            MergeScenario::All => None,
        }
    }
}

impl fmt::Display for MergeScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeScenario {
    type Err = CalibError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fully_merged" | "FullyMerged" => Ok(MergeScenario::FullyMerged),
            "w_merged" | "WMerged" => Ok(MergeScenario::WMerged),
            "qb_merged" | "QBMerged" | "QbMerged" => Ok(MergeScenario::QbMerged),
            "not_merged" | "NotMerged" => Ok(MergeScenario::NotMerged),
            "background" | "Background" => Ok(MergeScenario::Background),
            "all" | "All" => Ok(MergeScenario::All),
            other => Err(CalibError::Configuration(format!(
                "unknown merge scenario '{other}'"
            ))),
        }
    }
}

/// How a three-body match is labelled when the truth comes from associated production.
///
/// The two readings disagree only on the fully matched case, so there is no default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociatedPolicy {
    /// Use the decision table as is: b + both W products inside the jet is `FullyMerged`.
    MergeTable,
    /// b + both W products of an associated W is not a top decay: label it `Background`.
    ThreeBodyAsBackground,
}

/// The decision table. Exhaustive over all eight match triples.
pub fn merge_scenario(merged_b: bool, merged_q1: bool, merged_q2: bool) -> MergeScenario {
    match (merged_b, merged_q1, merged_q2) {
        (true, true, true) => MergeScenario::FullyMerged,
        (false, true, true) => MergeScenario::WMerged,
        (true, true, false) | (true, false, true) => MergeScenario::QbMerged,
        (true, false, false) | (false, true, false) | (false, false, true) | (false, false, false) => {
            MergeScenario::NotMerged
        }
    }
}

/// Assign a merge scenario to a probe jet.
///
/// All three flags use the same jet direction and one radius computed from the jet.
pub fn classify(
    jet: &ProbeJet,
    truth: Option<&GenTruthSet>,
    algorithm: &JetAlgorithm,
    policy: AssociatedPolicy,
) -> Result<MergeScenario> {
    let Some(truth) = truth else {
        return Ok(MergeScenario::Background);
    };

    let radius = matching_radius(jet, algorithm)?;
    let axis = jet.p4.direction()?;
    let merged_b = is_matched(&axis, &truth.b().direction()?, radius);
    let merged_q1 = is_matched(&axis, &truth.q1().direction()?, radius);
    let merged_q2 = is_matched(&axis, &truth.q2().direction()?, radius);

    let scenario = merge_scenario(merged_b, merged_q1, merged_q2);
    if truth.is_associated()
        && scenario == MergeScenario::FullyMerged
        && policy == AssociatedPolicy::ThreeBodyAsBackground
    {
        return Ok(MergeScenario::Background);
    }
    Ok(scenario)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::vector::FourMomentum;
    use pretty_assertions::assert_eq;

    fn probe(eta: f64, phi: f64) -> ProbeJet {
        ProbeJet {
            p4: FourMomentum::new(500.0, eta, phi, 175.0),
            pt_raw: 480.0,
            subjets: Vec::new(),
            tau32: 0.5,
            pair_mass: 60.0,
            subjet_fraction: 0.5,
            btag: 0.0,
        }
    }

    fn parton(eta: f64, phi: f64) -> FourMomentum {
        FourMomentum::massless(100.0, eta, phi)
    }

    #[test]
    fn decision_table_covers_all_triples() {
        let expected = [
            ((false, false, false), MergeScenario::NotMerged),
            ((false, false, true), MergeScenario::NotMerged),
            ((false, true, false), MergeScenario::NotMerged),
            ((false, true, true), MergeScenario::WMerged),
            ((true, false, false), MergeScenario::NotMerged),
            ((true, false, true), MergeScenario::QbMerged),
            ((true, true, false), MergeScenario::QbMerged),
            ((true, true, true), MergeScenario::FullyMerged),
        ];
        for ((b, q1, q2), want) in expected {
            assert_eq!(merge_scenario(b, q1, q2), want, "b={b} q1={q1} q2={q2}");
        }
        let qb = expected
            .iter()
            .filter(|(t, _)| merge_scenario(t.0, t.1, t.2) == MergeScenario::QbMerged)
            .count();
        assert_eq!(qb, 2);
    }

    #[test]
    fn table_never_yields_pseudo_labels() {
        for bits in 0u8..8 {
            let s = merge_scenario(bits & 4 != 0, bits & 2 != 0, bits & 1 != 0);
            assert!(s != MergeScenario::Background && s != MergeScenario::All);
        }
    }

    #[test]
    fn light_quark_order_does_not_matter() {
        for bits in 0u8..8 {
            let (b, q1, q2) = (bits & 4 != 0, bits & 2 != 0, bits & 1 != 0);
            assert_eq!(merge_scenario(b, q1, q2), merge_scenario(b, q2, q1));
            // Repeated evaluation gives the same answer.
            assert_eq!(merge_scenario(b, q1, q2), merge_scenario(b, q1, q2));
        }
    }

    #[test]
    fn no_truth_is_background() {
        let s = classify(
            &probe(0.0, 0.0),
            None,
            &JetAlgorithm::ak8(),
            AssociatedPolicy::MergeTable,
        )
        .unwrap();
        assert_eq!(s, MergeScenario::Background);
    }

    #[test]
    fn top_decay_scenarios() {
        let jet = probe(0.0, 0.0);
        let alg = JetAlgorithm::ak8();
        let inside = parton(0.3, 0.2);
        let outside = parton(1.5, 0.0);

        let full = GenTruthSet::TopDecay { b: inside, q1: inside, q2: inside };
        let w = GenTruthSet::TopDecay { b: outside, q1: inside, q2: inside };
        let qb = GenTruthSet::TopDecay { b: inside, q1: outside, q2: inside };
        let none = GenTruthSet::TopDecay { b: inside, q1: outside, q2: outside };

        let run = |t: &GenTruthSet| classify(&jet, Some(t), &alg, AssociatedPolicy::MergeTable).unwrap();
        assert_eq!(run(&full), MergeScenario::FullyMerged);
        assert_eq!(run(&w), MergeScenario::WMerged);
        assert_eq!(run(&qb), MergeScenario::QbMerged);
        assert_eq!(run(&none), MergeScenario::NotMerged);
    }

    #[test]
    fn variable_cone_radius_shrinks_with_pt() {
        // pt_raw 480 -> radius 1.25 (600/480); a parton at dR = 1.0 is inside.
        let jet = probe(0.0, 0.0);
        let near = parton(1.0, 0.0);
        let t = GenTruthSet::TopDecay { b: near, q1: near, q2: near };
        let s = classify(&jet, Some(&t), &JetAlgorithm::hotvr(), AssociatedPolicy::MergeTable).unwrap();
        assert_eq!(s, MergeScenario::FullyMerged);

        let mut boosted = probe(0.0, 0.0);
        boosted.pt_raw = 1200.0;
        let s = classify(&boosted, Some(&t), &JetAlgorithm::hotvr(), AssociatedPolicy::MergeTable).unwrap();
        assert_eq!(s, MergeScenario::NotMerged);
    }

    #[test]
    fn associated_three_body_follows_policy() {
        let jet = probe(0.0, 0.0);
        let p = parton(0.1, 0.1);
        let t = GenTruthSet::Associated { b: p, q1: p, q2: p };
        let alg = JetAlgorithm::ak8();
        assert_eq!(
            classify(&jet, Some(&t), &alg, AssociatedPolicy::MergeTable).unwrap(),
            MergeScenario::FullyMerged
        );
        assert_eq!(
            classify(&jet, Some(&t), &alg, AssociatedPolicy::ThreeBodyAsBackground).unwrap(),
            MergeScenario::Background
        );

        let far = parton(2.0, 0.0);
        let w_only = GenTruthSet::Associated { b: far, q1: p, q2: p };
        assert_eq!(
            classify(&jet, Some(&w_only), &alg, AssociatedPolicy::ThreeBodyAsBackground).unwrap(),
            MergeScenario::WMerged
        );
    }

    #[test]
    fn degenerate_parton_aborts() {
        let jet = probe(0.0, 0.0);
        let zero = FourMomentum::massless(0.0, 0.0, 0.0);
        let t = GenTruthSet::TopDecay { b: zero, q1: parton(0.1, 0.0), q2: parton(0.1, 0.0) };
        let err = classify(&jet, Some(&t), &JetAlgorithm::ak8(), AssociatedPolicy::MergeTable).unwrap_err();
        assert!(matches!(err, CalibError::DegenerateInput(_)));
    }

    #[test]
    fn scenario_names_round_trip() {
        for s in MergeScenario::CONCRETE.iter().chain([MergeScenario::All].iter()) {
            assert_eq!(s.as_str().parse::<MergeScenario>().unwrap(), *s);
        }
        assert!("merged".parse::<MergeScenario>().is_err());
    }
}
