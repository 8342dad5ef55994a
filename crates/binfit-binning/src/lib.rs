//! Axis binning for multi-dimensional measurement grids
//!
//! A binning maps a continuous coordinate onto a discrete axis of bins and
//! reports each bin's geometry (low edge, width, center). The binned-data
//! container consumes this capability set through the [`Binning`] trait and
//! never looks at the concrete scheme, so uniform, non-uniform, and sampled
//! axes are interchangeable.
//!
//! Axis identity is by reference, not by structure: two containers use "the
//! same" axis only when they hold clones of the same [`BinningRef`]. This
//! makes container compatibility checks O(1).
//!
//! # Examples
//!
//! ```rust
//! use binfit_binning::{Binning, UniformBinning};
//!
//! let axis = UniformBinning::new(0.0, 4.0, 4).unwrap();
//! assert_eq!(axis.n_bins(), 4);
//! assert_eq!(axis.bin_index(2.5).unwrap(), 2);
//! assert_eq!(axis.center(2).unwrap(), 2.5);
//! ```

pub mod traits;
pub mod types;

pub use traits::{Binning, BinningRef};
pub use types::{NonUniformBinning, UniformBinning, UniformSampledBinning};
