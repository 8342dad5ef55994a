//! The axis-binning capability set

use binfit_core::Result;
use std::fmt::Debug;
use std::io::Write;
use std::sync::Arc;

/// Shared, immutable handle to an axis binning.
///
/// Containers compare axes with [`Arc::ptr_eq`], so clones of one handle are
/// "the same axis" while structurally identical but separately constructed
/// binnings are not.
pub type BinningRef = Arc<dyn Binning + Send + Sync>;

/// Maps continuous coordinates onto a discrete axis of bins.
///
/// Bin indices run over `[0, n_bins())`. Edge accessors additionally accept
/// `n_bins()` itself, which addresses the upper edge of the axis.
pub trait Binning: Debug {
    /// Number of bins along this axis
    fn n_bins(&self) -> usize;

    /// Bin containing `value`, or `OutOfRange` when the value lies outside
    /// the axis domain
    fn bin_index(&self, value: f64) -> Result<usize>;

    /// Low edge of bin `index` (valid for `index <= n_bins()`)
    fn low_edge(&self, index: usize) -> Result<f64>;

    /// Width of bin `index`
    fn width(&self, index: usize) -> Result<f64>;

    /// Center of bin `index`
    fn center(&self, index: usize) -> Result<f64> {
        Ok(self.low_edge(index)? + 0.5 * self.width(index)?)
    }

    /// Write the bin count followed by the `n_bins() + 1` edges, one line.
    fn dump(&self, out: &mut dyn Write) -> Result<()> {
        let n = self.n_bins();
        write!(out, "{n}").map_err(anyhow::Error::from)?;
        for bin in 0..=n {
            let edge = self.low_edge(bin)?;
            write!(out, " {edge}").map_err(anyhow::Error::from)?;
        }
        writeln!(out).map_err(anyhow::Error::from)?;
        Ok(())
    }
}
