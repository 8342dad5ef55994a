//! Sparse binned measurement data with shared covariance
//!
//! [`BinnedData`] bins measurements into a multi-axis grid (1 to 3 axes),
//! stores only the occupied bins, and optionally attaches a covariance
//! matrix describing their uncertainties. It is the data layer of a fitting
//! pipeline: populate bins, attach or share a covariance, combine congruent
//! datasets with [`BinnedData::add`], prune to a region of interest, then
//! evaluate [`BinnedData::chi_square`] repeatedly inside a fit loop or draw
//! synthetic realizations with [`BinnedData::sample`].
//!
//! Two pieces of state are deliberately lazy and observable through shared
//! references:
//!
//! - the *weighted* representation toggle, which caches whether the stored
//!   values are raw or pre-multiplied by the inverse covariance, and
//! - the covariance matrix's own dual covariance/inverse representation.
//!
//! Covariance matrices are shared by reference across containers. A
//! container mutates its matrix only while it is the unique holder; the
//! combining and pruning operations clone shared matrices automatically,
//! while the direct setters fail instead so the caller notices the aliasing.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use binfit_binning::{BinningRef, UniformBinning};
//! use binfit_data::BinnedData;
//!
//! let axis: BinningRef = Arc::new(UniformBinning::new(0.0, 4.0, 4).unwrap());
//! let mut data = BinnedData::new_1d(axis).unwrap();
//! data.set_data(0, 1.0).unwrap();
//! data.set_data(2, 3.0).unwrap();
//!
//! assert_eq!(data.n_bins_with_data(), 2);
//! assert_eq!(data.chi_square(&[1.0, 3.0]).unwrap(), 0.0);
//! assert_eq!(data.chi_square(&[0.0, 3.0]).unwrap(), 1.0);
//! ```

pub mod container;
mod ops;
mod weighting;

pub use container::BinnedData;

// Re-export the collaborator handles callers need to construct containers.
pub use binfit_binning::BinningRef;
pub use binfit_covariance::CovarianceMatrix;
