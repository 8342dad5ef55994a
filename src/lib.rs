//! Sparse binned measurement data for fitting pipelines
//!
//! This facade re-exports the workspace crates:
//!
//! - [`binfit_core`]: shared error type and seeded random helpers
//! - [`binfit_binning`]: 1D bin-edge specifications behind the [`Binning`]
//!   trait
//! - [`binfit_covariance`]: positive-definite covariance matrices with a
//!   lazy covariance/inverse dual representation
//! - [`binfit_data`]: the [`BinnedData`] container tying them together
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use binfit::{BinnedData, BinningRef, UniformBinning};
//!
//! let axis: BinningRef = Arc::new(UniformBinning::new(0.0, 10.0, 10)?);
//! let mut data = BinnedData::new_1d(axis)?;
//! data.set_data(3, 1.5)?;
//! data.set_data(7, 2.5)?;
//! data.set_covariance(3, 3, 0.25)?;
//! data.set_covariance(7, 7, 0.16)?;
//!
//! let chi2 = data.chi_square(&[1.5, 2.1])?;
//! assert!(chi2 > 0.9 && chi2 < 1.1);
//! # Ok::<(), binfit::Error>(())
//! ```

pub use binfit_core::{seeded_rng, Error, Result};

pub use binfit_binning::{
    Binning, BinningRef, NonUniformBinning, UniformBinning, UniformSampledBinning,
};

pub use binfit_covariance::CovarianceMatrix;

pub use binfit_data::BinnedData;
