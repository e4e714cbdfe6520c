//! Error taxonomy for the sampling engine.
//!
//! The split matters for control flow: [`PmcError::DegenerateFit`] is
//! recoverable (the updater prunes the offending component), while
//! [`PmcError::CollapsedMixture`] and [`PmcError::DegenerateWeights`] end the
//! current PMC run and are surfaced to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PmcError {
    /// A weighted component fit has too little effective weight to produce a
    /// non-singular covariance. Callers either prune the component or refit
    /// with a minimum-variance floor.
    #[error("degenerate component fit: effective sample count {n_eff:.3} is below dimension {dim}")]
    DegenerateFit { n_eff: f64, dim: usize },

    /// Every component of a mixture was pruned in a single PMC update.
    #[error("all mixture components were pruned; the proposal has collapsed")]
    CollapsedMixture,

    /// Removing a component would leave the mixture empty.
    #[error("cannot remove the last component of a mixture")]
    EmptyMixture,

    /// All importance weights vanished in log-space, i.e. the proposal has no
    /// overlap with the target support.
    #[error("all importance weights vanished; proposal and target do not overlap")]
    DegenerateWeights,

    /// A covariance or scale matrix failed its Cholesky factorization at
    /// construction time.
    #[error("covariance matrix is not positive definite")]
    NotPositiveDefinite,

    /// Student-t degrees of freedom must be positive and finite.
    #[error("invalid degrees of freedom: {0}")]
    InvalidDof(f64),

    /// Random-walk step size must be positive and finite.
    #[error("invalid step size: {0}")]
    InvalidStepSize(f64),

    /// A component or point does not match the dimension of its mixture.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A checkpoint file could not be interpreted as a mixture.
    #[error("malformed checkpoint: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}
