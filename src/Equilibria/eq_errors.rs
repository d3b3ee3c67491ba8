use thiserror::Error;

/// errors raised by the equilibrium machinery.
/// Numerical trouble (non-convergence, insane results) is never reported here: it lives in
/// `SolveInfo::success` and `SanityReport` so that batch runs are not aborted by one bad point.
#[derive(Debug, Error)]
pub enum EquilibriumError {
    /// the feasible interval of the reaction coordinate collapsed to [0, 0]
    #[error("0-interval: reaction coordinate span collapsed to [0, 0]")]
    IllPosedInterval,
    #[error("ambiguous configuration: {0}")]
    AmbiguousConfiguration(String),
    #[error("unknown substance: {0}")]
    UnknownSubstance(String),
    #[error("substance {0} is defined more than once")]
    DuplicateSubstance(String),
    #[error("reaction {reaction} transfers more than one substance between phases")]
    MultiplePrecipitates { reaction: usize },
    #[error("reaction {reaction} has a negative equilibrium constant")]
    NegativeEquilibriumConstant { reaction: usize },
    #[error("dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        got: usize,
    },
    #[error("no sign change in bracket [{lo}, {hi}]")]
    NoSignChange { lo: f64, hi: f64 },
    #[error("root finder exceeded {0} iterations")]
    RootFinderMaxIter(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    Serde(#[from] serde_json::Error),
}
