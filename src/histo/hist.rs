use crate::error::{CalibError, Result};

/// Fixed-edge weighted histogram with under/overflow.
#[derive(Debug, Clone, PartialEq)]
pub struct Hist1D {
    edges: Vec<f64>,
    pub sum_w: Vec<f64>,
    pub sum_w2: Vec<f64>,
    pub underflow: (f64, f64),
    pub overflow: (f64, f64),
}

impl Hist1D {
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        check_edges(&edges)?;
        let n = edges.len() - 1;
        Ok(Self {
            edges,
            sum_w: vec![0.0; n],
            sum_w2: vec![0.0; n],
            underflow: (0.0, 0.0),
            overflow: (0.0, 0.0),
        })
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn n_bins(&self) -> usize {
        self.sum_w.len()
    }

    /// Half-open bins: `edges[i] <= x < edges[i+1]`.
    pub fn bin_index(&self, x: f64) -> Option<usize> {
        let n = self.edges.len();
        if !(x >= self.edges[0]) || x >= self.edges[n - 1] {
            return None;
        }
        // partition_point returns the first edge > x.
        Some(self.edges.partition_point(|&e| e <= x) - 1)
    }

    pub fn fill(&mut self, x: f64, w: f64) {
        match self.bin_index(x) {
            Some(i) => {
                self.sum_w[i] += w;
                self.sum_w2[i] += w * w;
            }
            None if x >= self.edges[self.edges.len() - 1] => {
                self.overflow.0 += w;
                self.overflow.1 += w * w;
            }
            // NaN lands in underflow together with x < first edge.
            None => {
                self.underflow.0 += w;
                self.underflow.1 += w * w;
            }
        }
    }

    pub fn merge(&mut self, other: &Hist1D) -> Result<()> {
        if self.edges != other.edges {
            return Err(CalibError::Configuration(
                "cannot merge histograms with different edges".to_string(),
            ));
        }
        for (a, b) in self.sum_w.iter_mut().zip(&other.sum_w) {
            *a += b;
        }
        for (a, b) in self.sum_w2.iter_mut().zip(&other.sum_w2) {
            *a += b;
        }
        self.underflow.0 += other.underflow.0;
        self.underflow.1 += other.underflow.1;
        self.overflow.0 += other.overflow.0;
        self.overflow.1 += other.overflow.1;
        Ok(())
    }

    /// Sum of weights including under/overflow.
    pub fn integral(&self) -> f64 {
        self.sum_w.iter().sum::<f64>() + self.underflow.0 + self.overflow.0
    }
}

/// Edges must be finite, at least two, strictly increasing.
pub fn check_edges(edges: &[f64]) -> Result<()> {
    if edges.len() < 2 {
        return Err(CalibError::BinEdges(format!(
            "need at least 2 edges; got {}",
            edges.len()
        )));
    }
    if let Some(bad) = edges.iter().find(|e| !e.is_finite()) {
        return Err(CalibError::BinEdges(format!("non-finite edge {bad}")));
    }
    for w in edges.windows(2) {
        if !(w[1] > w[0]) {
            return Err(CalibError::BinEdges(format!(
                "edges must be strictly increasing; {} followed by {}",
                w[0], w[1]
            )));
        }
    }
    Ok(())
}
