//! Error types for binned-data analysis
//!
//! Provides a unified error type for all binfit crates.

use thiserror::Error;

/// Core error type for binned-data operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid argument provided to an operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Index outside its valid range
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Reading or writing a bin that holds no data
    #[error("Empty bin: {0}")]
    EmptyBin(String),

    /// Structural mutation attempted on a finalized container
    #[error("Object is finalized: {0}")]
    Finalized(String),

    /// Mutation attempted on a covariance matrix that other containers share
    #[error("Shared covariance is not modifiable: {0}")]
    SharedCovariance(String),

    /// Datasets disagree on binning, occupied bins, or covariance presence
    #[error("Datasets are not congruent: {0}")]
    NotCongruent(String),

    /// Numerical computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// Other errors
    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

// Helper functions for common error patterns

impl Error {
    /// Create an error for a vector-size mismatch
    pub fn size_mismatch(expected: usize, actual: usize, context: &str) -> Self {
        Self::InvalidArgument(format!(
            "Size mismatch in {context}: expected {expected}, got {actual}"
        ))
    }

    /// Create an error for an index outside `[0, bound)`
    pub fn index_out_of_range(index: usize, bound: usize, context: &str) -> Self {
        Self::OutOfRange(format!("{context}: index {index} not in [0, {bound})"))
    }

    /// Create an error for a finalized-object violation
    pub fn finalized(operation: &str) -> Self {
        Self::Finalized(operation.to_string())
    }

    /// Create an error for a matrix that failed a Cholesky factorization
    pub fn not_positive_definite(context: &str) -> Self {
        Self::Computation(format!("{context}: matrix is not positive definite"))
    }
}
