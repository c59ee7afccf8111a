use crate::error::{CalibError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Transverse momentum, pseudorapidity, azimuth, mass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FourMomentum {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    #[serde(default)]
    pub mass: f64,
}

impl FourMomentum {
    pub fn new(pt: f64, eta: f64, phi: f64, mass: f64) -> Self {
        Self { pt, eta, phi, mass }
    }

    /// Massless momentum, used for generator-level partons where only the direction matters.
    pub fn massless(pt: f64, eta: f64, phi: f64) -> Self {
        Self::new(pt, eta, phi, 0.0)
    }

    /// Direction in (η, φ). Zero or non-finite momentum has no defined pseudorapidity.
    pub fn direction(&self) -> Result<Direction> {
        if !(self.pt.is_finite() && self.eta.is_finite() && self.phi.is_finite()) {
            return Err(CalibError::DegenerateInput(format!(
                "non-finite momentum (pt={}, eta={}, phi={})",
                self.pt, self.eta, self.phi
            )));
        }
        if self.pt <= 0.0 {
            return Err(CalibError::DegenerateInput(format!(
                "zero-momentum direction (pt={})",
                self.pt
            )));
        }
        Ok(Direction {
            eta: self.eta,
            phi: self.phi,
        })
    }

    pub fn px(&self) -> f64 {
        self.pt * self.phi.cos()
    }

    pub fn py(&self) -> f64 {
        self.pt * self.phi.sin()
    }

    pub fn pz(&self) -> f64 {
        self.pt * self.eta.sinh()
    }

    pub fn energy(&self) -> f64 {
        let p = self.pt * self.eta.cosh();
        (p * p + self.mass * self.mass).sqrt()
    }

    /// Invariant mass of the sum of two momenta.
    pub fn pair_mass(&self, other: &FourMomentum) -> f64 {
        let e = self.energy() + other.energy();
        let px = self.px() + other.px();
        let py = self.py() + other.py();
        let pz = self.pz() + other.pz();
        let m2 = e * e - px * px - py * py - pz * pz;
        m2.max(0.0).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Direction {
    pub eta: f64,
    pub phi: f64,
}

/// Azimuthal difference wrapped into [-π, π].
pub fn delta_phi(a: f64, b: f64) -> f64 {
    let mut d = (a - b) % (2.0 * PI);
    if d > PI {
        d -= 2.0 * PI;
    } else if d < -PI {
        d += 2.0 * PI;
    }
    d
}

pub fn delta_r(a: &Direction, b: &Direction) -> f64 {
    let deta = a.eta - b.eta;
    let dphi = delta_phi(a.phi, b.phi);
    (deta * deta + dphi * dphi).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn delta_phi_wraps_across_pi() {
        assert_relative_eq!(delta_phi(3.0, -3.0), 6.0 - 2.0 * PI, epsilon = 1e-12);
        assert_relative_eq!(delta_phi(-3.0, 3.0), 2.0 * PI - 6.0, epsilon = 1e-12);
        assert_relative_eq!(delta_phi(0.5, 0.2), 0.3, epsilon = 1e-12);
        assert!(delta_phi(7.0 * PI, 0.0).abs() <= PI + 1e-12);
    }

    #[test]
    fn delta_r_uses_wrapped_phi() {
        let a = Direction { eta: 0.0, phi: PI - 0.1 };
        let b = Direction { eta: 0.3, phi: -PI + 0.3 };
        assert_relative_eq!(delta_r(&a, &b), (0.09f64 + 0.16).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn zero_momentum_has_no_direction() {
        let p = FourMomentum::massless(0.0, 0.1, 0.2);
        assert!(matches!(p.direction(), Err(CalibError::DegenerateInput(_))));
        let p = FourMomentum::massless(10.0, f64::NAN, 0.2);
        assert!(matches!(p.direction(), Err(CalibError::DegenerateInput(_))));
    }

    #[test]
    fn pair_mass_of_back_to_back_massless() {
        let a = FourMomentum::massless(50.0, 0.0, 0.0);
        let b = FourMomentum::massless(50.0, 0.0, PI);
        assert_relative_eq!(a.pair_mass(&b), 100.0, epsilon = 1e-9);
    }
}
