use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibError {
    /// Invalid or inconsistent configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Bin edges that are not strictly increasing, overlap, or are non-finite.
    #[error("invalid bin edges: {0}")]
    BinEdges(String),

    /// A bucket key outside the layout enumerated at configuration time.
    #[error("unknown bucket: {0}")]
    UnknownBucket(String),

    /// A curve requested from the curve store does not exist.
    #[error("curve missing from store: {0}")]
    MissingCurve(String),

    /// Companion curves that do not share the reference curve's points.
    #[error("curve alignment violated for '{curve}': {detail}")]
    AlignmentViolation { curve: String, detail: String },

    /// The reference efficiency never drops below the target.
    #[error("no threshold reaches target efficiency {target} (lowest efficiency on curve: {min_efficiency:?})")]
    NoCrossingFound {
        target: f64,
        min_efficiency: Option<f64>,
    },

    /// Zero-momentum or non-finite direction.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),
}

impl CalibError {
    /// True for errors that only invalidate a single derived entry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CalibError::NoCrossingFound { .. })
    }

    /// Short label written to the status column of output tables.
    pub fn status(&self) -> &'static str {
        match self {
            CalibError::Configuration(_) => "configuration",
            CalibError::BinEdges(_) => "bin_edges",
            CalibError::UnknownBucket(_) => "unknown_bucket",
            CalibError::MissingCurve(_) => "missing_curve",
            CalibError::AlignmentViolation { .. } => "misaligned",
            CalibError::NoCrossingFound { .. } => "no_crossing",
            CalibError::DegenerateInput(_) => "degenerate_input",
        }
    }
}

pub type Result<T> = std::result::Result<T, CalibError>;
