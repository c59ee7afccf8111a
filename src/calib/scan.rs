//! Curves run from the loosest cut (index 0) to the tightest. The scan stops at the first point
//! below the target and only weighs its looser neighbour; it is not a nearest-point search.

use crate::calib::curve::{AlignedCurves, Curve, GraphPoint};
use crate::error::{CalibError, Result};

/// Background efficiency vs threshold plus the companions read at the same index.
#[derive(Debug, Clone, PartialEq)]
pub struct EfficiencyCurveSet {
    label: String,
    curves: AlignedCurves,
    signal: Option<usize>,
    background_tagged: Option<usize>,
    signal_tagged: Option<usize>,
}

impl EfficiencyCurveSet {
    pub fn new(
        label: impl Into<String>,
        background: Curve,
        signal: Option<Curve>,
        background_tagged: Option<Curve>,
        signal_tagged: Option<Curve>,
    ) -> Result<Self> {
        let mut companions = Vec::new();
        let mut slot = |c: Option<Curve>| {
            c.map(|c| {
                companions.push(c);
                companions.len() - 1
            })
        };
        let signal = slot(signal);
        let background_tagged = slot(background_tagged);
        let signal_tagged = slot(signal_tagged);
        Ok(Self {
            label: label.into(),
            curves: AlignedCurves::new(background, companions)?,
            signal,
            background_tagged,
            signal_tagged,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn curves(&self) -> &AlignedCurves {
        &self.curves
    }

    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }

    fn working_point_at(&self, index: usize, target: f64) -> Result<WorkingPoint> {
        let (reference, companions) = self.curves.read_at(index)?;
        let pick = |slot: Option<usize>| slot.map(|i| companions[i].y);
        Ok(WorkingPoint {
            target,
            achieved: reference.y,
            threshold: reference.x,
            index,
            source_points: self.len(),
            signal_eff: pick(self.signal),
            background_tagged_eff: pick(self.background_tagged),
            signal_tagged_eff: pick(self.signal_tagged),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkingPoint {
    /// Requested background efficiency.
    pub target: f64,
    /// Background efficiency at the selected threshold.
    pub achieved: f64,
    pub threshold: f64,
    /// Index into the curve set the working point was read from.
    pub index: usize,
    /// Point count of the set the index was selected on.
    pub source_points: usize,
    pub signal_eff: Option<f64>,
    pub background_tagged_eff: Option<f64>,
    pub signal_tagged_eff: Option<f64>,
}

fn check_target(target: f64) -> Result<()> {
    if !(target.is_finite() && target > 0.0) {
        return Err(CalibError::Configuration(format!(
            "target efficiency must be finite and > 0; got {target}"
        )));
    }
    Ok(())
}

/// Select the working point for `target` on the set's background curve.
pub fn scan_working_point(set: &EfficiencyCurveSet, target: f64) -> Result<WorkingPoint> {
    check_target(target)?;
    let reference = set.curves.reference();

    let Some(crossing) = set.curves.position(|_, p| p.y < target) else {
        let min_efficiency = reference
            .ys()
            .filter(|y| y.is_finite())
            .fold(None, |acc: Option<f64>, y| Some(acc.map_or(y, |m| m.min(y))));
        return Err(CalibError::NoCrossingFound {
            target,
            min_efficiency,
        });
    };

    let distance = |p: &GraphPoint| (p.y - target).abs();
    let mut index = crossing;
    if crossing > 0 {
        let looser = crossing - 1;
        if distance(&reference.points[looser]) < distance(&reference.points[crossing]) {
            index = looser;
        }
    }
    set.working_point_at(index, target)
}

/// Re-read a working point on another curve set at the same index, without scanning.
///
/// Sets of different momentum bins must have the same point count as the set the working point
/// came from; equal thresholds point by point are trusted, not checked.
pub fn carry_working_point(wp: &WorkingPoint, set: &EfficiencyCurveSet) -> Result<WorkingPoint> {
    if set.len() != wp.source_points {
        return Err(CalibError::AlignmentViolation {
            curve: set.label().to_string(),
            detail: format!(
                "{} points, working point was selected on {} points",
                set.len(),
                wp.source_points
            ),
        });
    }
    set.working_point_at(wp.index, wp.target)
}

/// Outcome for one (target, curve set) pair. Only a missing crossing stays local to the entry.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingPointResult {
    pub target: f64,
    pub label: String,
    pub result: Result<WorkingPoint>,
}

/// Scan each target on `sets[reference]` and carry the index to every set.
///
/// `NoCrossingFound` is recorded per entry; any other failure aborts the derivation.
pub fn derive_working_points(
    sets: &[EfficiencyCurveSet],
    reference: usize,
    targets: &[f64],
) -> Result<Vec<WorkingPointResult>> {
    let reference_set = sets.get(reference).ok_or_else(|| {
        CalibError::Configuration(format!(
            "reference curve set {reference} outside {} sets",
            sets.len()
        ))
    })?;

    let mut out = Vec::with_capacity(sets.len() * targets.len());
    for &target in targets {
        let scanned = match scan_working_point(reference_set, target) {
            Err(e) if !e.is_recoverable() => return Err(e),
            other => other,
        };
        match &scanned {
            Ok(wp) => tracing::info!(
                target,
                threshold = wp.threshold,
                achieved = wp.achieved,
                index = wp.index,
                reference = reference_set.label(),
                "working point found"
            ),
            Err(e) => tracing::warn!(target, error = %e, "working point missing"),
        }
        for (i, set) in sets.iter().enumerate() {
            let result = match &scanned {
                Ok(wp) if i == reference => Ok(*wp),
                Ok(wp) => Ok(carry_working_point(wp, set)?),
                Err(e) => Err(e.clone()),
            };
            out.push(WorkingPointResult {
                target,
                label: set.label().to_string(),
                result,
            });
        }
    }
    Ok(out)
}
