//! Combination, pruning, and statistical evaluation

use crate::container::BinnedData;
use binfit_core::{Error, Result};
use binfit_covariance::CovarianceMatrix;
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

impl BinnedData {
    /// Accumulate another dataset into this one, scaled by `weight`.
    ///
    /// Accumulation happens in the inverse-covariance-weighted
    /// representation, which is the statistically correct way to combine
    /// independent measurements (inverse-variance weighting); second-moment
    /// information is combined by adding the inverse covariance matrices (or
    /// the scalar weights) with the same scale.
    ///
    /// An empty destination only needs the same binning: it is seeded with
    /// zero entries over the other dataset's occupied bins and adopts its
    /// covariance structure. A populated destination must be fully congruent
    /// with `other`; a shared covariance matrix is cloned before it is
    /// modified.
    pub fn add(&mut self, other: &BinnedData, weight: f64) -> Result<()> {
        if weight == 0.0 {
            return Ok(());
        }
        if self.n_bins_with_data() == 0 {
            if !self.has_same_binning(other) {
                return Err(Error::NotCongruent(
                    "add: datasets have different binning".to_string(),
                ));
            }
            debug!(
                n = other.n_bins_with_data(),
                "seeding empty destination for combination"
            );
            let occupied: Vec<usize> = other.occupied().collect();
            for index in occupied {
                self.set_data(index, 0.0)?;
            }
            if other.has_covariance() {
                self.covariance = Some(Arc::new(CovarianceMatrix::new(self.n_bins_with_data())));
            } else {
                // The scalar weight plays the role of Cinv in the absence of
                // a matrix; zero it here since the other's weight
                // accumulates below.
                self.weight = 0.0;
            }
            // A zero buffer reads the same in either representation, so tag
            // it weighted without transforming.
            self.weighted.set(true);
        } else {
            if !self.is_congruent(other) {
                return Err(Error::NotCongruent(
                    "add: datasets are not congruent".to_string(),
                ));
            }
            if self.has_covariance() && !self.is_covariance_modifiable() {
                self.clone_covariance();
            }
        }
        self.set_weighted(true)?;
        other.set_weighted(true)?;
        {
            let mut mine = self.values.borrow_mut();
            let theirs = other.values.borrow();
            for (value, &other_value) in mine.iter_mut().zip(theirs.iter()) {
                *value += weight * other_value;
            }
        }
        if self.has_covariance() {
            let other_cov = other.covariance.as_deref().ok_or_else(|| {
                Error::NotCongruent("add: other dataset has no covariance".to_string())
            })?;
            self.covariance_mut("add")?.add_inverse(other_cov, weight)?;
        } else {
            self.weight += other.weight * weight;
        }
        Ok(())
    }

    /// Retain only the bins in `keep` (logical indices, all of which must
    /// hold data), renumbering offsets compactly.
    ///
    /// Retained bins are walked in ascending order of their current physical
    /// offset, so no element is overwritten before it is read; the surviving
    /// storage order is therefore ascending-offset order of the kept set. An
    /// attached covariance matrix is cloned if shared, then pruned with the
    /// same offset set.
    pub fn prune(&mut self, keep: &BTreeSet<usize>) -> Result<()> {
        if self.finalized {
            return Err(Error::finalized("prune"));
        }
        let mut kept_offsets = BTreeSet::new();
        for &index in keep {
            kept_offsets.insert(self.offset_for_index(index)?);
        }
        let new_size = kept_offsets.len();
        if new_size == self.n_bins_with_data() {
            return Ok(());
        }
        debug!(old = self.n_bins_with_data(), new = new_size, "pruning");
        self.set_weighted(false)?;
        self.offsets = vec![None; self.nbins];
        {
            let mut values = self.values.borrow_mut();
            for (new_offset, &old_offset) in kept_offsets.iter().enumerate() {
                // old_offset >= new_offset, so this never clobbers an
                // element that is still needed
                let index = self.indices[old_offset];
                self.offsets[index] = Some(new_offset);
                self.indices[new_offset] = index;
                values[new_offset] = values[old_offset];
            }
            self.indices.truncate(new_size);
            values.truncate(new_size);
        }
        if self.has_covariance() {
            if !self.is_covariance_modifiable() {
                self.clone_covariance();
            }
            self.covariance_mut("prune")?.prune(&kept_offsets)?;
        }
        Ok(())
    }

    /// Chi-square of a prediction against this dataset.
    ///
    /// The prediction vector runs over the occupied bins in offset order.
    /// With a covariance attached this is `r^T Cinv r` for the residual
    /// `r = prediction - data`; otherwise it is the scalar weight times the
    /// sum of squared residuals.
    pub fn chi_square(&self, prediction: &[f64]) -> Result<f64> {
        let n_data = self.n_bins_with_data();
        if prediction.len() != n_data {
            return Err(Error::size_mismatch(n_data, prediction.len(), "chi_square"));
        }
        self.set_weighted(false)?;
        let mut unweighted = 0.0;
        let residuals: Vec<f64> = {
            let values = self.values.borrow();
            prediction
                .iter()
                .zip(values.iter())
                .map(|(&pred, &value)| {
                    let residual = pred - value;
                    unweighted += residual * residual;
                    residual
                })
                .collect()
        };
        match &self.covariance {
            Some(cov) => cov.chi_square(&residuals),
            None => Ok(unweighted * self.weight),
        }
    }

    /// Per-bin effective weights that reproduce the correlated chi-square
    /// contribution as `weight_j * delta_j^2`.
    ///
    /// Usable as decorrelated error bars when plotting residuals against a
    /// correlated covariance. A vanishing `delta_j` degenerates to the
    /// diagonal inverse-covariance entry (avoiding 0/0); without a
    /// covariance every weight is the scalar weight.
    pub fn decorrelated_weights(&self, prediction: &[f64]) -> Result<Vec<f64>> {
        let n_data = self.n_bins_with_data();
        if prediction.len() != n_data {
            return Err(Error::size_mismatch(
                n_data,
                prediction.len(),
                "decorrelated_weights",
            ));
        }
        self.set_weighted(false)?;
        let delta: Vec<f64> = {
            let values = self.values.borrow();
            values
                .iter()
                .zip(prediction)
                .map(|(&value, &pred)| value - pred)
                .collect()
        };
        let mut dweights = Vec::with_capacity(n_data);
        match &self.covariance {
            Some(cov) => {
                for j in 0..n_data {
                    let dweight = if delta[j] == 0.0 {
                        cov.inverse_covariance(j, j)?
                    } else {
                        let mut sum = 0.0;
                        for (k, &delta_k) in delta.iter().enumerate() {
                            sum += cov.inverse_covariance(j, k)? * delta_k / delta[j];
                        }
                        sum
                    };
                    dweights.push(dweight);
                }
            }
            None => dweights.resize(n_data, self.weight),
        }
        Ok(dweights)
    }

    /// Draw a synthetic realization of this dataset.
    ///
    /// The result shares our axes, occupied-bin bookkeeping, and covariance
    /// matrix (by reference); its values are a correlated noise draw from
    /// the covariance added to our unweighted values. Requires a covariance
    /// matrix.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<BinnedData> {
        let cov = self.covariance.as_ref().ok_or_else(|| {
            Error::InvalidArgument("sample: requires a covariance matrix".to_string())
        })?;
        let n_data = self.n_bins_with_data();
        debug!(n = n_data, "sampling synthetic realization");
        let mut noise = vec![0.0; n_data];
        cov.sample(&mut noise, rng)?;
        self.set_weighted(false)?;
        {
            let values = self.values.borrow();
            for (noise_value, &value) in noise.iter_mut().zip(values.iter()) {
                *noise_value += value;
            }
        }
        let mut sampled = self.clone_binning();
        sampled.offsets = self.offsets.clone();
        sampled.indices = self.indices.clone();
        sampled.values = std::cell::RefCell::new(noise);
        sampled.covariance = Some(Arc::clone(cov));
        Ok(sampled)
    }
}
