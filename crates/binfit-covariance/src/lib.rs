//! Covariance-matrix engine for binned measurement data
//!
//! A [`CovarianceMatrix`] owns a symmetric positive-definite matrix together
//! with its inverse, keeping only one side materialized at a time when
//! possible. Reads of the missing side trigger a Cholesky inversion on
//! demand; semantic writes invalidate the derived side. The binned-data
//! container drives this engine for weighting, chi-square evaluation,
//! pruning, and noise sampling.
//!
//! # Examples
//!
//! ```rust
//! use binfit_covariance::CovarianceMatrix;
//!
//! let mut cov = CovarianceMatrix::new(2);
//! cov.set_covariance(0, 0, 4.0).unwrap();
//! cov.set_covariance(1, 1, 9.0).unwrap();
//!
//! // The inverse is materialized lazily on first read.
//! assert!((cov.inverse_covariance(0, 0).unwrap() - 0.25).abs() < 1e-12);
//! assert!((cov.chi_square(&[2.0, 3.0]).unwrap() - 2.0).abs() < 1e-12);
//! ```

pub mod matrix;

pub use matrix::CovarianceMatrix;
