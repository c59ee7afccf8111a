use crate::error::{CalibError, Result};
use serde::{Deserialize, Serialize};

/// Tolerance for deciding that two curves share an x value.
pub const ALIGNMENT_TOLERANCE: f64 = 1e-9;

/// Point with asymmetric errors on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphPoint {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub exl: f64,
    #[serde(default)]
    pub exh: f64,
    #[serde(default)]
    pub eyl: f64,
    #[serde(default)]
    pub eyh: f64,
}

impl GraphPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            exl: 0.0,
            exh: 0.0,
            eyl: 0.0,
            eyh: 0.0,
        }
    }

    pub fn with_y_errors(mut self, down: f64, up: f64) -> Self {
        self.eyl = down;
        self.eyh = up;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    pub name: String,
    pub points: Vec<GraphPoint>,
}

impl Curve {
    pub fn new(name: impl Into<String>, points: Vec<GraphPoint>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn ys(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.y)
    }
}

/// A reference curve with companions known to share its points.
///
/// Alignment is checked once here, so reads by index afterwards need no further checks.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedCurves {
    reference: Curve,
    companions: Vec<Curve>,
}

impl AlignedCurves {
    pub fn new(reference: Curve, companions: Vec<Curve>) -> Result<Self> {
        for c in &companions {
            check_aligned(&reference, c)?;
        }
        Ok(Self {
            reference,
            companions,
        })
    }

    pub fn reference(&self) -> &Curve {
        &self.reference
    }

    pub fn companions(&self) -> &[Curve] {
        &self.companions
    }

    pub fn companion(&self, name: &str) -> Option<&Curve> {
        self.companions.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }

    /// First reference index (scanning from 0) whose point satisfies `pred`.
    pub fn position<F>(&self, mut pred: F) -> Option<usize>
    where
        F: FnMut(usize, &GraphPoint) -> bool,
    {
        self.reference
            .points
            .iter()
            .enumerate()
            .position(|(i, p)| pred(i, p))
    }

    /// The reference point and each companion's point at `index`, companions in insertion order.
    pub fn read_at(&self, index: usize) -> Result<(GraphPoint, Vec<GraphPoint>)> {
        let reference = self.reference.points.get(index).copied().ok_or_else(|| {
            CalibError::AlignmentViolation {
                curve: self.reference.name.clone(),
                detail: format!("index {index} outside {} points", self.reference.len()),
            }
        })?;
        // Lengths were checked at construction.
        let companions = self.companions.iter().map(|c| c.points[index]).collect();
        Ok((reference, companions))
    }
}

/// Equal point counts and equal x values.
pub fn check_aligned(reference: &Curve, other: &Curve) -> Result<()> {
    if reference.len() != other.len() {
        return Err(CalibError::AlignmentViolation {
            curve: other.name.clone(),
            detail: format!(
                "{} points vs {} in '{}'",
                other.len(),
                reference.len(),
                reference.name
            ),
        });
    }
    for (i, (a, b)) in reference.points.iter().zip(&other.points).enumerate() {
        if (a.x - b.x).abs() > ALIGNMENT_TOLERANCE {
            return Err(CalibError::AlignmentViolation {
                curve: other.name.clone(),
                detail: format!(
                    "x[{i}] = {} differs from '{}' x[{i}] = {}",
                    b.x, reference.name, a.x
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn curve(name: &str, xs: &[f64]) -> Curve {
        Curve::new(
            name,
            xs.iter().map(|&x| GraphPoint::new(x, x * 10.0)).collect(),
        )
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let err = AlignedCurves::new(curve("ref", &[1.0, 2.0]), vec![curve("c", &[1.0])]).unwrap_err();
        assert!(matches!(err, CalibError::AlignmentViolation { ref curve, .. } if curve == "c"));
    }

    #[test]
    fn x_mismatch_is_rejected() {
        let err = AlignedCurves::new(curve("ref", &[1.0, 2.0]), vec![curve("c", &[1.0, 2.5])]).unwrap_err();
        assert!(matches!(err, CalibError::AlignmentViolation { .. }));
    }

    #[test]
    fn locate_then_read() {
        let set = AlignedCurves::new(
            curve("ref", &[1.0, 2.0, 3.0]),
            vec![curve("a", &[1.0, 2.0, 3.0]), curve("b", &[1.0, 2.0, 3.0])],
        )
        .unwrap();
        let idx = set.position(|_, p| p.x > 1.5).unwrap();
        assert_eq!(idx, 1);
        let (r, c) = set.read_at(idx).unwrap();
        assert_eq!(r.y, 20.0);
        assert_eq!(c.len(), 2);
        assert_eq!(c[1].x, 2.0);
        assert!(set.read_at(3).is_err());
        assert_eq!(set.companion("b").map(|c| c.len()), Some(3));
    }
}
