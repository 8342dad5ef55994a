//! Concrete binning schemes

use crate::traits::Binning;
use binfit_core::{Error, Result};

fn check_edge_index(index: usize, n_bins: usize, context: &str) -> Result<()> {
    if index > n_bins {
        return Err(Error::index_out_of_range(index, n_bins + 1, context));
    }
    Ok(())
}

fn check_bin_index(index: usize, n_bins: usize, context: &str) -> Result<()> {
    if index >= n_bins {
        return Err(Error::index_out_of_range(index, n_bins, context));
    }
    Ok(())
}

/// Equal-width bins over `[lo, hi)`.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformBinning {
    lo: f64,
    hi: f64,
    n_bins: usize,
}

impl UniformBinning {
    /// Create `n_bins` equal-width bins covering `[lo, hi)`.
    pub fn new(lo: f64, hi: f64, n_bins: usize) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::InvalidArgument(
                "UniformBinning: need at least one bin".to_string(),
            ));
        }
        if !(hi > lo) {
            return Err(Error::InvalidArgument(format!(
                "UniformBinning: invalid range [{lo}, {hi})"
            )));
        }
        Ok(Self { lo, hi, n_bins })
    }

    fn bin_width(&self) -> f64 {
        (self.hi - self.lo) / self.n_bins as f64
    }
}

impl Binning for UniformBinning {
    fn n_bins(&self) -> usize {
        self.n_bins
    }

    fn bin_index(&self, value: f64) -> Result<usize> {
        if value < self.lo || value >= self.hi {
            return Err(Error::OutOfRange(format!(
                "UniformBinning: value {value} outside [{}, {})",
                self.lo, self.hi
            )));
        }
        let bin = ((value - self.lo) / self.bin_width()) as usize;
        // Guard against floating roundoff at the upper boundary.
        Ok(bin.min(self.n_bins - 1))
    }

    fn low_edge(&self, index: usize) -> Result<f64> {
        check_edge_index(index, self.n_bins, "UniformBinning::low_edge")?;
        Ok(self.lo + index as f64 * self.bin_width())
    }

    fn width(&self, index: usize) -> Result<f64> {
        check_bin_index(index, self.n_bins, "UniformBinning::width")?;
        Ok(self.bin_width())
    }
}

/// Bins bounded by an explicit ascending edge list.
#[derive(Clone, Debug, PartialEq)]
pub struct NonUniformBinning {
    edges: Vec<f64>,
}

impl NonUniformBinning {
    /// Create bins from `n_bins + 1` strictly ascending edges.
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::InvalidArgument(
                "NonUniformBinning: need at least two edges".to_string(),
            ));
        }
        if edges.windows(2).any(|pair| !(pair[1] > pair[0])) {
            return Err(Error::InvalidArgument(
                "NonUniformBinning: edges must be strictly ascending".to_string(),
            ));
        }
        Ok(Self { edges })
    }
}

impl Binning for NonUniformBinning {
    fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    fn bin_index(&self, value: f64) -> Result<usize> {
        let first = self.edges[0];
        let last = *self.edges.last().unwrap();
        if value < first || value >= last {
            return Err(Error::OutOfRange(format!(
                "NonUniformBinning: value {value} outside [{first}, {last})"
            )));
        }
        // partition_point returns the count of edges <= value, which is the
        // one-past-the-containing-bin position.
        Ok(self.edges.partition_point(|&edge| edge <= value) - 1)
    }

    fn low_edge(&self, index: usize) -> Result<f64> {
        check_edge_index(index, self.n_bins(), "NonUniformBinning::low_edge")?;
        Ok(self.edges[index])
    }

    fn width(&self, index: usize) -> Result<f64> {
        check_bin_index(index, self.n_bins(), "NonUniformBinning::width")?;
        Ok(self.edges[index + 1] - self.edges[index])
    }
}

/// Uniformly spaced sample points, each bin centered on its point.
///
/// Useful for axes that represent a sampled quantity (or a categorical one)
/// rather than a continuous range: bin `i` is centered at
/// `first + i * spacing` and covers half a spacing to either side.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformSampledBinning {
    first: f64,
    spacing: f64,
    n_bins: usize,
}

impl UniformSampledBinning {
    /// Create `n_bins` bins centered on `first`, `first + spacing`, ...
    pub fn new(first: f64, spacing: f64, n_bins: usize) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::InvalidArgument(
                "UniformSampledBinning: need at least one sample point".to_string(),
            ));
        }
        if !(spacing > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "UniformSampledBinning: invalid spacing {spacing}"
            )));
        }
        Ok(Self {
            first,
            spacing,
            n_bins,
        })
    }
}

impl Binning for UniformSampledBinning {
    fn n_bins(&self) -> usize {
        self.n_bins
    }

    fn bin_index(&self, value: f64) -> Result<usize> {
        let lo = self.first - 0.5 * self.spacing;
        let offset = (value - lo) / self.spacing;
        if offset < 0.0 || offset >= self.n_bins as f64 {
            return Err(Error::OutOfRange(format!(
                "UniformSampledBinning: value {value} outside the sampled range"
            )));
        }
        Ok((offset as usize).min(self.n_bins - 1))
    }

    fn low_edge(&self, index: usize) -> Result<f64> {
        check_edge_index(index, self.n_bins, "UniformSampledBinning::low_edge")?;
        Ok(self.first + (index as f64 - 0.5) * self.spacing)
    }

    fn width(&self, index: usize) -> Result<f64> {
        check_bin_index(index, self.n_bins, "UniformSampledBinning::width")?;
        Ok(self.spacing)
    }

    fn center(&self, index: usize) -> Result<f64> {
        check_bin_index(index, self.n_bins, "UniformSampledBinning::center")?;
        Ok(self.first + index as f64 * self.spacing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_uniform_binning() {
        let axis = UniformBinning::new(0.0, 4.0, 4).unwrap();
        assert_eq!(axis.n_bins(), 4);
        assert_eq!(axis.bin_index(0.0).unwrap(), 0);
        assert_eq!(axis.bin_index(3.999).unwrap(), 3);
        assert!(axis.bin_index(4.0).is_err());
        assert!(axis.bin_index(-0.001).is_err());
        assert_relative_eq!(axis.low_edge(1).unwrap(), 1.0);
        assert_relative_eq!(axis.low_edge(4).unwrap(), 4.0); // upper edge
        assert_relative_eq!(axis.width(2).unwrap(), 1.0);
        assert_relative_eq!(axis.center(2).unwrap(), 2.5);
        assert!(axis.width(4).is_err());
    }

    #[test]
    fn test_uniform_binning_validation() {
        assert!(UniformBinning::new(0.0, 1.0, 0).is_err());
        assert!(UniformBinning::new(1.0, 1.0, 4).is_err());
        assert!(UniformBinning::new(2.0, 1.0, 4).is_err());
    }

    #[test]
    fn test_non_uniform_binning() {
        let axis = NonUniformBinning::new(vec![0.0, 1.0, 4.0, 10.0]).unwrap();
        assert_eq!(axis.n_bins(), 3);
        assert_eq!(axis.bin_index(0.5).unwrap(), 0);
        assert_eq!(axis.bin_index(1.0).unwrap(), 1);
        assert_eq!(axis.bin_index(9.999).unwrap(), 2);
        assert!(axis.bin_index(10.0).is_err());
        assert_relative_eq!(axis.width(1).unwrap(), 3.0);
        assert_relative_eq!(axis.center(2).unwrap(), 7.0);
        assert_relative_eq!(axis.low_edge(3).unwrap(), 10.0);
    }

    #[test]
    fn test_non_uniform_binning_validation() {
        assert!(NonUniformBinning::new(vec![0.0]).is_err());
        assert!(NonUniformBinning::new(vec![0.0, 1.0, 1.0]).is_err());
        assert!(NonUniformBinning::new(vec![0.0, 2.0, 1.0]).is_err());
    }

    #[test]
    fn test_uniform_sampled_binning() {
        let axis = UniformSampledBinning::new(10.0, 2.0, 3).unwrap();
        assert_eq!(axis.n_bins(), 3);
        // Bins centered at 10, 12, 14 with width 2.
        assert_relative_eq!(axis.center(0).unwrap(), 10.0);
        assert_relative_eq!(axis.center(2).unwrap(), 14.0);
        assert_relative_eq!(axis.low_edge(0).unwrap(), 9.0);
        assert_relative_eq!(axis.low_edge(3).unwrap(), 15.0);
        assert_eq!(axis.bin_index(10.9).unwrap(), 0);
        assert_eq!(axis.bin_index(11.1).unwrap(), 1);
        assert!(axis.bin_index(8.9).is_err());
        assert!(axis.bin_index(15.0).is_err());
    }

    #[test]
    fn test_dump_format() {
        let axis = UniformBinning::new(0.0, 2.0, 2).unwrap();
        let mut out = Vec::new();
        axis.dump(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "2 0 1 2\n");
    }
}
