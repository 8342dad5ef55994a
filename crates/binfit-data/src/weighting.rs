//! Lazy weighting toggle and the covariance-sharing protocol

use crate::container::BinnedData;
use binfit_core::{Error, Result};
use binfit_covariance::CovarianceMatrix;
use std::sync::Arc;
use tracing::{debug, trace};

impl BinnedData {
    /// Switch the data buffer between the raw and the
    /// inverse-covariance-weighted representation.
    ///
    /// Idempotent: asking for the current state is a no-op. Transitioning to
    /// weighted multiplies the buffer by the inverse covariance (or by the
    /// scalar weight when no matrix is attached); transitioning back applies
    /// the inverse transform. This is cache materialization on a logically
    /// immutable view, so it is callable on shared references; read
    /// accessors use it to get the representation they need.
    ///
    /// An attached but still empty matrix acts as the identity.
    pub fn set_weighted(&self, weighted: bool) -> Result<()> {
        if weighted == self.weighted.get() {
            return Ok(());
        }
        if self.n_bins_with_data() > 0 {
            match &self.covariance {
                Some(cov) if !cov.is_empty() => {
                    trace!(weighted, n = self.n_bins_with_data(), "toggling representation");
                    let mut values = self.values.borrow_mut();
                    if weighted {
                        cov.multiply_by_inverse_covariance(&mut values)?;
                    } else {
                        cov.multiply_by_covariance(&mut values)?;
                    }
                }
                Some(_) => {}
                None => {
                    if self.weight != 1.0 {
                        let mut values = self.values.borrow_mut();
                        for value in values.iter_mut() {
                            if weighted {
                                *value *= self.weight;
                            } else {
                                *value /= self.weight;
                            }
                        }
                    }
                }
            }
        }
        self.weighted.set(weighted);
        Ok(())
    }

    /// True iff a covariance matrix is attached
    pub fn has_covariance(&self) -> bool {
        self.covariance.is_some()
    }

    /// True when no other container shares our covariance matrix (vacuously
    /// true when none is attached).
    pub fn is_covariance_modifiable(&self) -> bool {
        match &self.covariance {
            Some(arc) => Arc::strong_count(arc) == 1,
            None => true,
        }
    }

    /// Replace a shared covariance handle with a private deep copy.
    pub fn clone_covariance(&mut self) {
        if let Some(arc) = &self.covariance {
            debug!(size = arc.size(), "cloning covariance matrix");
            self.covariance = Some(Arc::new((**arc).clone()));
        }
    }

    pub(crate) fn covariance_mut(&mut self, context: &str) -> Result<&mut CovarianceMatrix> {
        match self.covariance.as_mut() {
            Some(arc) => Arc::get_mut(arc)
                .ok_or_else(|| Error::SharedCovariance(context.to_string())),
            None => Err(Error::InvalidArgument(format!(
                "{context}: no covariance matrix attached"
            ))),
        }
    }

    fn ensure_covariance(&mut self, context: &str) -> Result<()> {
        if self.covariance.is_none() {
            if self.finalized {
                return Err(Error::finalized(context));
            }
            self.covariance = Some(Arc::new(CovarianceMatrix::new(self.n_bins_with_data())));
        }
        Ok(())
    }

    /// Covariance entry between two occupied bins
    pub fn covariance(&self, index1: usize, index2: usize) -> Result<f64> {
        let cov = self.covariance.as_ref().ok_or_else(|| {
            Error::InvalidArgument("covariance: no covariance matrix attached".to_string())
        })?;
        let off1 = self.offset_for_index(index1)?;
        let off2 = self.offset_for_index(index2)?;
        cov.covariance(off1, off2)
    }

    /// Inverse-covariance entry between two occupied bins
    pub fn inverse_covariance(&self, index1: usize, index2: usize) -> Result<f64> {
        let cov = self.covariance.as_ref().ok_or_else(|| {
            Error::InvalidArgument("inverse_covariance: no covariance matrix attached".to_string())
        })?;
        let off1 = self.offset_for_index(index1)?;
        let off2 = self.offset_for_index(index2)?;
        cov.inverse_covariance(off1, off2)
    }

    /// Set a covariance entry between two occupied bins, creating an empty
    /// matrix sized to the occupied-bin count if none is attached yet.
    ///
    /// Fails if the matrix is shared: clone it first (or let `add`/`prune`
    /// do so). Deliberately does **not** touch the weighted flag, so the
    /// interpretation of the already-stored values under the edited matrix
    /// depends on the current representation; callers editing covariances
    /// must track which representation they are working in.
    pub fn set_covariance(&mut self, index1: usize, index2: usize, value: f64) -> Result<()> {
        let off1 = self.offset_for_index(index1)?;
        let off2 = self.offset_for_index(index2)?;
        self.ensure_covariance("set_covariance")?;
        self.covariance_mut("set_covariance")?
            .set_covariance(off1, off2, value)
    }

    /// Set an inverse-covariance entry between two occupied bins.
    ///
    /// Same contract and the same weighted-flag caveat as
    /// [`Self::set_covariance`].
    pub fn set_inverse_covariance(
        &mut self,
        index1: usize,
        index2: usize,
        value: f64,
    ) -> Result<()> {
        let off1 = self.offset_for_index(index1)?;
        let off2 = self.offset_for_index(index2)?;
        self.ensure_covariance("set_inverse_covariance")?;
        self.covariance_mut("set_inverse_covariance")?
            .set_inverse_covariance(off1, off2, value)
    }

    /// Bulk-replace the covariance matrix.
    pub fn set_covariance_matrix(&mut self, matrix: Arc<CovarianceMatrix>) -> Result<()> {
        if self.finalized {
            return Err(Error::finalized("set_covariance_matrix"));
        }
        if matrix.size() != self.n_bins_with_data() {
            return Err(Error::size_mismatch(
                self.n_bins_with_data(),
                matrix.size(),
                "set_covariance_matrix",
            ));
        }
        self.covariance = Some(matrix);
        Ok(())
    }

    /// Adopt another congruent container's covariance matrix by reference.
    ///
    /// A provisional empty matrix of the right size is attached first so
    /// covariance presence does not spoil the congruence check.
    pub fn share_covariance_matrix(&mut self, other: &BinnedData) -> Result<()> {
        if self.finalized {
            return Err(Error::finalized("share_covariance_matrix"));
        }
        if self.covariance.is_none() {
            self.covariance = Some(Arc::new(CovarianceMatrix::new(self.n_bins_with_data())));
        }
        if !self.is_congruent(other) {
            return Err(Error::NotCongruent(
                "share_covariance_matrix: datasets are not congruent".to_string(),
            ));
        }
        // Congruence guarantees the other container has a matrix.
        self.covariance = other.covariance.clone();
        Ok(())
    }

    /// Replace our covariance `C` with the triple product `C * D^-1 * C`,
    /// handing the previous `C` back in `d`.
    ///
    /// The buffer is forced unweighted first so the stored values stay
    /// decoupled from the matrix that is being swapped out. Other containers
    /// sharing the old matrix keep observing it unchanged.
    pub fn transform_covariance(&mut self, d: &mut CovarianceMatrix) -> Result<()> {
        let cov = self.covariance.as_ref().ok_or_else(|| {
            Error::InvalidArgument("transform_covariance: no covariance to transform".to_string())
        })?;
        self.set_weighted(false)?;
        d.replace_with_triple_product(cov)?;
        let transformed = std::mem::replace(d, (**cov).clone());
        self.covariance = Some(Arc::new(transformed));
        Ok(())
    }

    /// Detach the covariance matrix and substitute a scalar fallback weight.
    ///
    /// Fails when finalized with a covariance attached: committed
    /// statistical information cannot be discarded once locked.
    pub fn drop_covariance(&mut self, weight: f64) -> Result<()> {
        if self.has_covariance() && self.finalized {
            return Err(Error::finalized("drop_covariance"));
        }
        self.set_weighted(false)?;
        self.covariance = None;
        self.weight = weight;
        Ok(())
    }

    /// Compress the attached covariance matrix (if any) after forcing the
    /// requested representation. Returns whether a compression happened.
    pub fn compress(&self, weighted: bool) -> Result<bool> {
        self.set_weighted(weighted)?;
        Ok(self
            .covariance
            .as_ref()
            .map(|cov| cov.compress())
            .unwrap_or(false))
    }

    /// True when the attached covariance matrix is compressed
    pub fn is_compressed(&self) -> bool {
        self.covariance
            .as_ref()
            .map(|cov| cov.is_compressed())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use binfit_binning::{BinningRef, UniformBinning};

    fn axis(n_bins: usize) -> BinningRef {
        Arc::new(UniformBinning::new(0.0, n_bins as f64, n_bins).unwrap())
    }

    fn two_bin_data() -> BinnedData {
        let mut data = BinnedData::new_1d(axis(4)).unwrap();
        data.set_data(0, 1.0).unwrap();
        data.set_data(2, 3.0).unwrap();
        data
    }

    #[test]
    fn test_set_weighted_idempotent_scalar() {
        let mut data = two_bin_data();
        data.drop_covariance(2.0).unwrap();
        data.set_weighted(true).unwrap();
        let once: Vec<f64> = data.values.borrow().clone();
        data.set_weighted(true).unwrap();
        let twice: Vec<f64> = data.values.borrow().clone();
        assert_eq!(once, twice);
        assert_eq!(once, vec![2.0, 6.0]);
    }

    #[test]
    fn test_set_weighted_round_trip_with_covariance() {
        let mut data = two_bin_data();
        data.set_covariance(0, 0, 2.0).unwrap();
        data.set_covariance(2, 2, 5.0).unwrap();
        data.set_covariance(0, 2, 1.0).unwrap();
        data.set_weighted(true).unwrap();
        data.set_weighted(false).unwrap();
        assert_relative_eq!(data.value(0).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(data.value(2).unwrap(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_covariance_is_identity_for_weighting() {
        let mut data = two_bin_data();
        // Attach an empty matrix directly; toggling must not touch values.
        data.set_covariance_matrix(Arc::new(CovarianceMatrix::new(2)))
            .unwrap();
        data.set_weighted(true).unwrap();
        assert_eq!(*data.values.borrow(), vec![1.0, 3.0]);
    }

    #[test]
    fn test_covariance_setters_require_occupied_bins() {
        let mut data = two_bin_data();
        assert!(data.set_covariance(0, 1, 0.5).is_err());
        assert!(data.set_covariance(0, 2, 0.5).is_ok());
        assert!(data.covariance(0, 1).is_err());
    }

    #[test]
    fn test_lazy_covariance_creation_fails_when_finalized() {
        let mut data = two_bin_data();
        data.finalize();
        assert!(matches!(
            data.set_covariance(0, 0, 1.0),
            Err(Error::Finalized(_))
        ));
    }

    #[test]
    fn test_shared_covariance_blocks_setters() {
        let mut a = two_bin_data();
        a.set_covariance(0, 0, 4.0).unwrap();
        a.set_covariance(2, 2, 9.0).unwrap();
        let shared_axis = a.axes()[0].clone();
        let mut b = BinnedData::new_1d(shared_axis).unwrap();
        // b is not congruent (different axis object reference)...
        assert!(b.share_covariance_matrix(&a).is_err());
        // ...so rebuild b over the same axes and occupied set.
        let mut b = a.clone_binning();
        b.set_data(0, 0.0).unwrap();
        b.set_data(2, 0.0).unwrap();
        b.share_covariance_matrix(&a).unwrap();
        assert!(!a.is_covariance_modifiable());
        assert!(!b.is_covariance_modifiable());
        assert_relative_eq!(b.covariance(0, 0).unwrap(), 4.0);
        assert!(matches!(
            a.set_covariance(0, 0, 1.0),
            Err(Error::SharedCovariance(_))
        ));
        // Cloning restores modifiability without corrupting the other view.
        a.clone_covariance();
        assert!(a.is_covariance_modifiable());
        a.set_covariance(0, 0, 16.0).unwrap();
        assert_relative_eq!(a.covariance(0, 0).unwrap(), 16.0);
        assert_relative_eq!(b.covariance(0, 0).unwrap(), 4.0);
    }

    #[test]
    fn test_set_covariance_matrix_size_check() {
        let mut data = two_bin_data();
        assert!(data
            .set_covariance_matrix(Arc::new(CovarianceMatrix::new(3)))
            .is_err());
        assert!(data
            .set_covariance_matrix(Arc::new(CovarianceMatrix::new(2)))
            .is_ok());
        data.finalize();
        assert!(data
            .set_covariance_matrix(Arc::new(CovarianceMatrix::new(2)))
            .is_err());
    }

    #[test]
    fn test_setters_are_blind_to_weighting_state() {
        // The sharp edge: covariance edits write through without forcing a
        // representation, so values set while weighted keep meaning
        // Cinv * data under the edited matrix.
        let mut data = two_bin_data();
        data.set_inverse_covariance(0, 0, 0.25).unwrap();
        data.set_inverse_covariance(2, 2, 0.5).unwrap();
        data.set_weighted(true).unwrap();
        // Edit the inverse while weighted; the buffer is not transformed.
        data.set_inverse_covariance(0, 0, 1.0).unwrap();
        assert!(data.is_weighted());
        // Returning to unweighted now divides by the *new* matrix.
        let value = data.value(0).unwrap();
        assert_relative_eq!(value, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_drop_covariance() {
        let mut data = two_bin_data();
        data.set_covariance(0, 0, 4.0).unwrap();
        data.set_covariance(2, 2, 9.0).unwrap();
        data.drop_covariance(3.0).unwrap();
        assert!(!data.has_covariance());
        assert_eq!(data.scalar_weight(), 3.0);
        // Values survive the detach in unweighted form.
        assert_relative_eq!(data.value(0).unwrap(), 1.0);
        // Once finalized with a covariance, dropping is forbidden.
        let mut locked = two_bin_data();
        locked.set_covariance(0, 0, 1.0).unwrap();
        locked.finalize();
        assert!(locked.drop_covariance(1.0).is_err());
    }

    #[test]
    fn test_transform_covariance() {
        let mut data = two_bin_data();
        data.set_covariance(0, 0, 2.0).unwrap();
        data.set_covariance(2, 2, 5.0).unwrap();
        // D = C makes the triple product C itself; d receives the old C.
        let mut d = CovarianceMatrix::new(2);
        d.set_covariance(0, 0, 2.0).unwrap();
        d.set_covariance(1, 1, 5.0).unwrap();
        data.transform_covariance(&mut d).unwrap();
        assert_relative_eq!(data.covariance(0, 0).unwrap(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(d.covariance(0, 0).unwrap(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_compress_round_trip() {
        let mut data = two_bin_data();
        data.set_covariance(0, 0, 4.0).unwrap();
        data.set_covariance(2, 2, 9.0).unwrap();
        assert!(!data.is_compressed());
        assert!(data.compress(false).unwrap());
        assert!(data.is_compressed());
        assert_relative_eq!(data.inverse_covariance(0, 0).unwrap(), 0.25);
    }
}
