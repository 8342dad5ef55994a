//! The binned-data container and its sparse index/offset engine

use binfit_binning::BinningRef;
use binfit_core::{Error, Result};
use binfit_covariance::CovarianceMatrix;
use std::cell::{Cell, RefCell};
use std::io::Write;
use std::sync::Arc;

/// Sparse multi-dimensional binned data with an optional covariance matrix.
///
/// The logical index space is the dense cartesian product of the axis bins,
/// composed mixed-radix with the most significant axis first. Physical
/// storage is sparse: only bins that have been populated via
/// [`Self::set_data`] occupy a slot in the data buffer, in insertion order
/// (ascending offset order after [`Self::prune`]).
///
/// Cloning a container shares its covariance matrix by reference; the clone
/// (or the original) deep-copies the matrix before any mutation unless it is
/// the unique holder.
#[derive(Clone, Debug)]
pub struct BinnedData {
    pub(crate) axes: Vec<BinningRef>,
    pub(crate) nbins: usize,
    /// One slot per logical index; `None` marks an empty bin.
    pub(crate) offsets: Vec<Option<usize>>,
    /// Logical index stored at each physical offset.
    pub(crate) indices: Vec<usize>,
    /// Values at each physical offset; raw or inverse-covariance-weighted
    /// depending on the `weighted` tag.
    pub(crate) values: RefCell<Vec<f64>>,
    pub(crate) covariance: Option<Arc<CovarianceMatrix>>,
    /// Scalar stand-in for the inverse covariance while no matrix is attached.
    pub(crate) weight: f64,
    /// Lazy representation tag; mutable cache state, not semantic state.
    pub(crate) weighted: Cell<bool>,
    pub(crate) finalized: bool,
}

impl BinnedData {
    /// Create an empty container over the given axes (1 to 3 supported).
    pub fn new(axes: Vec<BinningRef>) -> Result<Self> {
        if axes.is_empty() {
            return Err(Error::InvalidArgument(
                "BinnedData: no axes provided".to_string(),
            ));
        }
        if axes.len() > 3 {
            return Err(Error::InvalidArgument(format!(
                "BinnedData: {} axes provided, at most 3 supported",
                axes.len()
            )));
        }
        let nbins = axes.iter().map(|axis| axis.n_bins()).product();
        Ok(Self {
            axes,
            nbins,
            offsets: vec![None; nbins],
            indices: Vec::new(),
            values: RefCell::new(Vec::new()),
            covariance: None,
            weight: 1.0,
            weighted: Cell::new(false),
            finalized: false,
        })
    }

    /// Create a one-dimensional container.
    pub fn new_1d(axis: BinningRef) -> Result<Self> {
        Self::new(vec![axis])
    }

    /// Create a two-dimensional container.
    pub fn new_2d(axis1: BinningRef, axis2: BinningRef) -> Result<Self> {
        Self::new(vec![axis1, axis2])
    }

    /// Create a three-dimensional container.
    pub fn new_3d(axis1: BinningRef, axis2: BinningRef, axis3: BinningRef) -> Result<Self> {
        Self::new(vec![axis1, axis2, axis3])
    }

    /// Fresh empty container over the same axis objects.
    pub fn clone_binning(&self) -> Self {
        Self {
            axes: self.axes.clone(),
            nbins: self.nbins,
            offsets: vec![None; self.nbins],
            indices: Vec::new(),
            values: RefCell::new(Vec::new()),
            covariance: None,
            weight: 1.0,
            weighted: Cell::new(false),
            finalized: false,
        }
    }

    /// The axis binning objects, most significant first
    pub fn axes(&self) -> &[BinningRef] {
        &self.axes
    }

    /// Number of axes
    pub fn n_axes(&self) -> usize {
        self.axes.len()
    }

    /// Total number of logical bins (product of the axis bin counts)
    pub fn n_bins_total(&self) -> usize {
        self.nbins
    }

    /// Number of occupied bins
    pub fn n_bins_with_data(&self) -> usize {
        self.indices.len()
    }

    /// The scalar weight standing in for the inverse covariance
    pub fn scalar_weight(&self) -> f64 {
        self.weight
    }

    /// Current representation of the data buffer
    pub fn is_weighted(&self) -> bool {
        self.weighted.get()
    }

    /// Forbid further structural growth. One-way: existing values and
    /// covariance entries may still be updated afterwards.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub(crate) fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.nbins {
            return Err(Error::index_out_of_range(index, self.nbins, "BinnedData"));
        }
        Ok(())
    }

    /// Compose per-axis bin indices into a logical index, most significant
    /// axis first.
    pub fn index_from_bins(&self, bin_indices: &[usize]) -> Result<usize> {
        if bin_indices.len() != self.n_axes() {
            return Err(Error::size_mismatch(
                self.n_axes(),
                bin_indices.len(),
                "index_from_bins",
            ));
        }
        let mut index = 0;
        for (axis, &bin) in self.axes.iter().zip(bin_indices) {
            let n_bins = axis.n_bins();
            if bin >= n_bins {
                return Err(Error::index_out_of_range(bin, n_bins, "index_from_bins"));
            }
            index = bin + index * n_bins;
        }
        Ok(index)
    }

    /// Map per-axis coordinate values to the logical index of the bin that
    /// contains them.
    pub fn index_from_values(&self, values: &[f64]) -> Result<usize> {
        if values.len() != self.n_axes() {
            return Err(Error::size_mismatch(
                self.n_axes(),
                values.len(),
                "index_from_values",
            ));
        }
        let mut bin_indices = Vec::with_capacity(self.n_axes());
        for (axis, &value) in self.axes.iter().zip(values) {
            bin_indices.push(axis.bin_index(value)?);
        }
        self.index_from_bins(&bin_indices)
    }

    /// Decompose a logical index into per-axis bin indices (the inverse of
    /// [`Self::index_from_bins`]).
    pub fn bin_indices(&self, index: usize) -> Result<Vec<usize>> {
        self.check_index(index)?;
        let mut bin_indices = vec![0; self.n_axes()];
        let mut partial = index;
        for (axis, slot) in self.axes.iter().zip(bin_indices.iter_mut()).rev() {
            let n_bins = axis.n_bins();
            *slot = partial % n_bins;
            partial /= n_bins;
        }
        Ok(bin_indices)
    }

    /// Per-axis bin centers for a logical index
    pub fn bin_centers(&self, index: usize) -> Result<Vec<f64>> {
        let bins = self.bin_indices(index)?;
        let mut centers = Vec::with_capacity(self.n_axes());
        for (axis, &bin) in self.axes.iter().zip(&bins) {
            centers.push(axis.center(bin)?);
        }
        Ok(centers)
    }

    /// Per-axis bin widths for a logical index
    pub fn bin_widths(&self, index: usize) -> Result<Vec<f64>> {
        let bins = self.bin_indices(index)?;
        let mut widths = Vec::with_capacity(self.n_axes());
        for (axis, &bin) in self.axes.iter().zip(&bins) {
            widths.push(axis.width(bin)?);
        }
        Ok(widths)
    }

    /// O(1) test whether a logical index holds data
    pub fn has_data(&self, index: usize) -> Result<bool> {
        self.check_index(index)?;
        Ok(self.offsets[index].is_some())
    }

    /// Logical index stored at a physical offset
    pub fn index_at_offset(&self, offset: usize) -> Result<usize> {
        if offset >= self.indices.len() {
            return Err(Error::index_out_of_range(
                offset,
                self.indices.len(),
                "index_at_offset",
            ));
        }
        Ok(self.indices[offset])
    }

    /// Physical offset of an occupied logical index
    pub fn offset_for_index(&self, index: usize) -> Result<usize> {
        self.check_index(index)?;
        self.offsets[index]
            .ok_or_else(|| Error::EmptyBin(format!("no data at index {index}")))
    }

    /// Occupied logical indices in physical-offset order
    pub fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }

    /// Value of an occupied bin in the unweighted representation
    pub fn value(&self, index: usize) -> Result<f64> {
        let offset = self.offset_for_index(index)?;
        self.set_weighted(false)?;
        Ok(self.values.borrow()[offset])
    }

    /// Value of an occupied bin in the inverse-covariance-weighted
    /// representation
    pub fn value_weighted(&self, index: usize) -> Result<f64> {
        let offset = self.offset_for_index(index)?;
        self.set_weighted(true)?;
        Ok(self.values.borrow()[offset])
    }

    pub(crate) fn set_data_repr(&mut self, index: usize, value: f64, weighted: bool) -> Result<()> {
        self.set_weighted(weighted)?;
        self.check_index(index)?;
        match self.offsets[index] {
            Some(offset) => {
                self.values.borrow_mut()[offset] = value;
            }
            None => {
                if self.covariance.is_some() {
                    return Err(Error::InvalidArgument(
                        "set_data: cannot add bins after a covariance matrix is attached"
                            .to_string(),
                    ));
                }
                if self.finalized {
                    return Err(Error::finalized("set_data"));
                }
                self.offsets[index] = Some(self.indices.len());
                self.indices.push(index);
                self.values.borrow_mut().push(value);
            }
        }
        Ok(())
    }

    /// Set an unweighted value, populating the bin on first write.
    ///
    /// Growing the occupied set fails once the container is finalized or a
    /// covariance matrix is attached; overwriting an occupied bin stays
    /// allowed.
    pub fn set_data(&mut self, index: usize, value: f64) -> Result<()> {
        self.set_data_repr(index, value, false)
    }

    /// Set a value in the weighted representation.
    pub fn set_data_weighted(&mut self, index: usize, value: f64) -> Result<()> {
        self.set_data_repr(index, value, true)
    }

    /// Add `delta` to an occupied bin's unweighted value.
    pub fn add_data(&mut self, index: usize, delta: f64) -> Result<()> {
        let offset = self.offset_for_index(index)?;
        self.set_weighted(false)?;
        self.values.borrow_mut()[offset] += delta;
        Ok(())
    }

    /// True when both containers reference the identical binning object
    /// along every axis.
    pub fn has_same_binning(&self, other: &Self) -> bool {
        self.axes.len() == other.axes.len()
            && self
                .axes
                .iter()
                .zip(&other.axes)
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }

    /// Full congruence: same binning objects, same covariance presence, and
    /// the identical occupied-bin list (order included).
    pub fn is_congruent(&self, other: &Self) -> bool {
        self.has_same_binning(other)
            && self.covariance.is_some() == other.covariance.is_some()
            && self.indices == other.indices
    }

    /// Approximate resident bytes
    pub fn memory_usage(&self, include_covariance: bool) -> usize {
        let mut size = std::mem::size_of::<Self>()
            + self.offsets.capacity() * std::mem::size_of::<Option<usize>>()
            + self.indices.capacity() * std::mem::size_of::<usize>()
            + self.values.borrow().capacity() * std::mem::size_of::<f64>();
        if include_covariance {
            if let Some(cov) = &self.covariance {
                size += cov.memory_usage();
            }
        }
        size
    }

    /// Stream the occupied bins as `[index] value` lines, formatting each
    /// value with the caller-supplied formatter.
    pub fn dump<W: Write, F: Fn(f64) -> String>(&self, out: &mut W, format_value: F) -> Result<()> {
        self.set_weighted(false)?;
        let values = self.values.borrow();
        for (offset, &index) in self.indices.iter().enumerate() {
            writeln!(out, "[{index:4}] {}", format_value(values[offset]))
                .map_err(anyhow::Error::from)?;
        }
        Ok(())
    }
}
