use crate::error::{CalibError, Result};
use crate::kinematics::jet::ProbeJet;
use crate::kinematics::vector::{delta_r, Direction};
use serde::{Deserialize, Serialize};

pub const VARIABLE_CONE_RHO: f64 = 600.0;
pub const VARIABLE_CONE_R_MIN: f64 = 0.1;
pub const VARIABLE_CONE_R_MAX: f64 = 1.5;

/// Jet clustering family; decides how the truth-matching radius is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JetAlgorithm {
    FixedCone { radius: f64 },
    VariableCone { rho: f64, r_min: f64, r_max: f64 },
}

impl JetAlgorithm {
    pub fn ak8() -> Self {
        JetAlgorithm::FixedCone { radius: 0.8 }
    }

    pub fn hotvr() -> Self {
        JetAlgorithm::VariableCone {
            rho: VARIABLE_CONE_RHO,
            r_min: VARIABLE_CONE_R_MIN,
            r_max: VARIABLE_CONE_R_MAX,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            JetAlgorithm::FixedCone { radius } => {
                if !(radius.is_finite() && radius > 0.0) {
                    return Err(CalibError::Configuration(format!(
                        "fixed cone radius must be > 0; got {radius}"
                    )));
                }
            }
            JetAlgorithm::VariableCone { rho, r_min, r_max } => {
                if !(rho.is_finite() && rho > 0.0) {
                    return Err(CalibError::Configuration(format!(
                        "variable cone rho must be > 0; got {rho}"
                    )));
                }
                if !(r_min > 0.0 && r_min <= r_max && r_max.is_finite()) {
                    return Err(CalibError::Configuration(format!(
                        "variable cone radius range invalid: [{r_min}, {r_max}]"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Strict containment: a separation equal to the radius does not match.
pub fn is_matched(a: &Direction, b: &Direction, radius: f64) -> bool {
    delta_r(a, b) < radius
}

pub fn matching_radius(jet: &ProbeJet, algorithm: &JetAlgorithm) -> Result<f64> {
    match *algorithm {
        JetAlgorithm::FixedCone { radius } => Ok(radius),
        JetAlgorithm::VariableCone { rho, r_min, r_max } => {
            if !(jet.pt_raw.is_finite() && jet.pt_raw > 0.0) {
                return Err(CalibError::DegenerateInput(format!(
                    "variable-cone radius needs pt_raw > 0; got {}",
                    jet.pt_raw
                )));
            }
            Ok((rho / jet.pt_raw).clamp(r_min, r_max))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::vector::FourMomentum;
    use approx::assert_relative_eq;

    fn jet(pt: f64, pt_raw: f64) -> ProbeJet {
        ProbeJet {
            p4: FourMomentum::new(pt, 0.0, 0.0, 172.0),
            pt_raw,
            subjets: Vec::new(),
            tau32: 0.5,
            pair_mass: 0.0,
            subjet_fraction: 0.0,
            btag: 0.0,
        }
    }

    #[test]
    fn fixed_cone_ignores_pt() {
        let r = matching_radius(&jet(1000.0, 900.0), &JetAlgorithm::ak8()).unwrap();
        assert_eq!(r, 0.8);
    }

    #[test]
    fn variable_cone_is_clamped_on_raw_pt() {
        let alg = JetAlgorithm::hotvr();
        // 600 / 400 = 1.5 from the raw pt, not from the corrected pt.
        assert_relative_eq!(matching_radius(&jet(500.0, 400.0), &alg).unwrap(), 1.5);
        assert_relative_eq!(matching_radius(&jet(1000.0, 1000.0), &alg).unwrap(), 0.6);
        assert_relative_eq!(matching_radius(&jet(200.0, 200.0), &alg).unwrap(), 1.5);
        assert_relative_eq!(matching_radius(&jet(9000.0, 9000.0), &alg).unwrap(), 0.1);
    }

    #[test]
    fn variable_cone_rejects_zero_pt() {
        let err = matching_radius(&jet(0.0, 0.0), &JetAlgorithm::hotvr()).unwrap_err();
        assert!(matches!(err, CalibError::DegenerateInput(_)));
    }

    #[test]
    fn matching_is_strict() {
        let a = Direction { eta: 0.0, phi: 0.0 };
        let b = Direction { eta: 0.5, phi: 0.0 };
        assert!(is_matched(&a, &b, 0.6));
        assert!(!is_matched(&a, &b, 0.5));
    }

    #[test]
    fn invalid_algorithms_are_rejected() {
        assert!(JetAlgorithm::FixedCone { radius: 0.0 }.validate().is_err());
        let bad = JetAlgorithm::VariableCone {
            rho: 600.0,
            r_min: 1.5,
            r_max: 0.1,
        };
        assert!(bad.validate().is_err());
        assert!(JetAlgorithm::hotvr().validate().is_ok());
    }
}
