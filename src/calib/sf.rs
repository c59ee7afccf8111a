//! The central value of a scale factor always comes from the total-uncertainty curve.

use crate::calib::curve::{AlignedCurves, Curve, GraphPoint};
use crate::classify::scenario::MergeScenario;
use crate::error::{CalibError, Result};
use crate::histo::bucket::PtRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Guard (GeV) keeping the located point away from the pt bin edges.
pub const BIN_EDGE_GUARD: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyKind {
    Total,
    Stat,
    Syst,
}

impl UncertaintyKind {
    pub const ALL: [UncertaintyKind; 3] = [
        UncertaintyKind::Total,
        UncertaintyKind::Stat,
        UncertaintyKind::Syst,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            UncertaintyKind::Total => "total",
            UncertaintyKind::Stat => "stat",
            UncertaintyKind::Syst => "syst",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AsymError {
    pub up: f64,
    pub down: f64,
}

impl AsymError {
    pub fn new(up: f64, down: f64) -> Self {
        Self { up, down }
    }

    /// Per-side sum in quadrature.
    pub fn quadrature(&self, other: &AsymError) -> AsymError {
        AsymError {
            up: self.up.hypot(other.up),
            down: self.down.hypot(other.down),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SfInfo {
    pub central: f64,
    pub total: AsymError,
    pub stat: AsymError,
    pub syst: AsymError,
    /// stat ⊕ syst, filled by [`combine_scale_factor`].
    pub combined: Option<AsymError>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SfKey {
    pub year: String,
    pub scenario: MergeScenario,
    pub working_point: String,
}

impl SfKey {
    pub fn curve_name(&self, kind: UncertaintyKind) -> String {
        format!(
            "sf/{}/{}/{}/{}",
            self.year,
            self.scenario.as_str(),
            self.working_point,
            kind.as_str()
        )
    }
}

impl fmt::Display for SfKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.year, self.scenario, self.working_point)
    }
}

/// Curves addressed by name.
pub trait CurveStore {
    fn curve(&self, name: &str) -> Option<&Curve>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryCurveStore {
    curves: BTreeMap<String, Curve>,
}

impl MemoryCurveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, curve: Curve) -> Option<Curve> {
        self.curves.insert(curve.name.clone(), curve)
    }

    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.curves.keys().map(String::as_str)
    }

    /// Store one scale factor as a point at `x` on the key's three curves.
    pub fn push_sf(&mut self, key: &SfKey, x: f64, info: &SfInfo) {
        for kind in UncertaintyKind::ALL {
            let err = match kind {
                UncertaintyKind::Total => info.total,
                UncertaintyKind::Stat => info.stat,
                UncertaintyKind::Syst => info.syst,
            };
            let name = key.curve_name(kind);
            let curve = self
                .curves
                .entry(name.clone())
                .or_insert_with(|| Curve::new(name, Vec::new()));
            curve
                .points
                .push(GraphPoint::new(x, info.central).with_y_errors(err.down, err.up));
        }
    }
}

impl FromIterator<Curve> for MemoryCurveStore {
    fn from_iter<I: IntoIterator<Item = Curve>>(iter: I) -> Self {
        let mut store = MemoryCurveStore::new();
        for c in iter {
            store.insert(c);
        }
        store
    }
}

impl CurveStore for MemoryCurveStore {
    fn curve(&self, name: &str) -> Option<&Curve> {
        self.curves.get(name)
    }
}

fn load<'a, S: CurveStore + ?Sized>(store: &'a S, name: &str) -> Result<&'a Curve> {
    store
        .curve(name)
        .ok_or_else(|| CalibError::MissingCurve(name.to_string()))
}

/// Read central value and the three asymmetric uncertainties for one pt bin.
pub fn read_sf<S: CurveStore + ?Sized>(store: &S, key: &SfKey, pt: PtRange) -> Result<SfInfo> {
    let total = load(store, &key.curve_name(UncertaintyKind::Total))?;
    let stat = load(store, &key.curve_name(UncertaintyKind::Stat))?;
    let syst = load(store, &key.curve_name(UncertaintyKind::Syst))?;
    let curves = AlignedCurves::new(total.clone(), vec![stat.clone(), syst.clone()])?;

    let lo = pt.min + BIN_EDGE_GUARD;
    let hi = pt.max - BIN_EDGE_GUARD;
    let index = curves
        .position(|_, p| p.x > lo && p.x < hi)
        .ok_or_else(|| {
            CalibError::Configuration(format!(
                "no scale-factor point inside pt bin [{}, {}] for {key}",
                pt.min, pt.max
            ))
        })?;
    let (t, companions) = curves.read_at(index)?;
    let (s, y) = (companions[0], companions[1]);
    Ok(SfInfo {
        central: t.y,
        total: AsymError::new(t.eyh, t.eyl),
        stat: AsymError::new(s.eyh, s.eyl),
        syst: AsymError::new(y.eyh, y.eyl),
        combined: None,
    })
}

/// [`read_sf`] plus the derived stat ⊕ syst combination. The central value is passed through.
pub fn combine_scale_factor<S: CurveStore + ?Sized>(
    store: &S,
    key: &SfKey,
    pt: PtRange,
) -> Result<SfInfo> {
    let mut info = read_sf(store, key, pt)?;
    info.combined = Some(info.stat.quadrature(&info.syst));
    Ok(info)
}

/// Ratio of a subset to its superset with the correlated uncertainty
/// `sqrt((σn/n)² + (σd/d)² - 2σn²/(n·d))`.
///
/// Not valid for independent samples. `None` if either value is zero or non-finite.
pub fn ratio_with_uncertainty(
    numerator: f64,
    denominator: f64,
    numerator_unc: f64,
    denominator_unc: f64,
) -> Option<(f64, f64)> {
    if !(numerator.is_finite() && denominator.is_finite()) || numerator == 0.0 || denominator == 0.0 {
        return None;
    }
    let ratio = numerator / denominator;
    let rn = numerator_unc / numerator;
    let rd = denominator_unc / denominator;
    let radicand = rn * rn + rd * rd - 2.0 * numerator_unc * numerator_unc / (numerator * denominator);
    // Rounding can push a fully correlated radicand slightly below zero.
    let rel = radicand.max(0.0).sqrt();
    Some((ratio, ratio * rel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    fn key() -> SfKey {
        SfKey {
            year: "UL17".to_string(),
            scenario: MergeScenario::FullyMerged,
            working_point: "wp3".to_string(),
        }
    }

    fn info(central: f64) -> SfInfo {
        SfInfo {
            central,
            total: AsymError::new(0.05, 0.04),
            stat: AsymError::new(0.03, 0.02),
            syst: AsymError::new(0.04, 0.0346),
            combined: None,
        }
    }

    #[test]
    fn ratio_regression_value() {
        let (r, u) = ratio_with_uncertainty(10.0, 100.0, 1.0, 5.0).unwrap();
        assert_relative_eq!(r, 0.1, epsilon = 1e-15);
        assert_relative_eq!(u, 0.1 * 0.0105f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(u, 0.010247, epsilon = 1e-6);
    }

    #[test]
    fn ratio_rejects_zero() {
        assert_eq!(ratio_with_uncertainty(0.0, 10.0, 0.0, 1.0), None);
        assert_eq!(ratio_with_uncertainty(1.0, 0.0, 1.0, 0.0), None);
        // Numerator equal to denominator: fully correlated, zero uncertainty.
        let (r, u) = ratio_with_uncertainty(4.0, 4.0, 2.0, 2.0).unwrap();
        assert_eq!(r, 1.0);
        assert_relative_eq!(u, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn round_trip_keeps_central_value_bits() {
        let mut store = MemoryCurveStore::new();
        let central = 0.987_654_321_012_345_6;
        store.push_sf(&key(), 250.0, &info(1.1));
        store.push_sf(&key(), 350.0, &info(central));
        store.push_sf(&key(), 450.0, &info(0.9));

        let pt = PtRange { min: 300.0, max: 400.0 };
        let got = combine_scale_factor(&store, &key(), pt).unwrap();
        assert_eq!(got.central.to_bits(), central.to_bits());
        assert_eq!(got.total, AsymError::new(0.05, 0.04));
        assert_eq!(got.stat, AsymError::new(0.03, 0.02));
        assert_eq!(got.syst, AsymError::new(0.04, 0.0346));
        let combined = got.combined.unwrap();
        assert_relative_eq!(combined.up, 0.05, epsilon = 1e-12);
        assert_relative_eq!(combined.down, (0.02f64 * 0.02 + 0.0346 * 0.0346).sqrt(), epsilon = 1e-12);

        assert_eq!(read_sf(&store, &key(), pt).unwrap().combined, None);
    }

    #[test]
    fn point_on_bin_edge_is_not_taken() {
        let mut store = MemoryCurveStore::new();
        store.push_sf(&key(), 300.5, &info(2.0));
        store.push_sf(&key(), 350.0, &info(1.0));
        let got = read_sf(&store, &key(), PtRange { min: 300.0, max: 400.0 }).unwrap();
        assert_eq!(got.central, 1.0);

        let err = read_sf(&store, &key(), PtRange { min: 400.0, max: 480.0 }).unwrap_err();
        assert!(matches!(err, CalibError::Configuration(_)));
    }

    #[test]
    fn missing_curve_is_reported_by_name() {
        let mut store = MemoryCurveStore::new();
        store.push_sf(&key(), 350.0, &info(1.0));
        let other = SfKey { year: "UL18".to_string(), ..key() };
        let err = read_sf(&store, &other, PtRange { min: 300.0, max: 400.0 }).unwrap_err();
        assert_eq!(err, CalibError::MissingCurve("sf/UL18/fully_merged/wp3/total".to_string()));
    }

    #[test]
    fn misaligned_uncertainty_curves_are_rejected() {
        let mut store = MemoryCurveStore::new();
        store.push_sf(&key(), 350.0, &info(1.0));
        store.insert(Curve::new(
            key().curve_name(UncertaintyKind::Syst),
            vec![GraphPoint::new(350.0, 1.0), GraphPoint::new(450.0, 1.0)],
        ));
        let err = read_sf(&store, &key(), PtRange { min: 300.0, max: 400.0 }).unwrap_err();
        assert!(matches!(err, CalibError::AlignmentViolation { .. }));
    }
}
