//! Lazy dual-representation covariance matrix

use binfit_core::{Error, Result};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use std::cell::{Ref, RefCell};
use std::collections::BTreeSet;
use tracing::debug;

/// Which sides of the covariance / inverse-covariance pair are materialized.
///
/// At most one side is authoritative after a semantic write; the other is a
/// cache rebuilt on demand. `compressed` records that the redundant side has
/// been dropped to save memory.
#[derive(Clone, Debug, Default)]
struct Repr {
    cov: Option<DMatrix<f64>>,
    icov: Option<DMatrix<f64>>,
    compressed: bool,
}

/// A symmetric positive-definite covariance matrix and its inverse.
///
/// Reads may materialize the missing representation via Cholesky inversion,
/// so accessors work on shared references; the materialization is cache
/// state, not semantic state. Semantic mutation (setters, `add_inverse`,
/// `prune`, `replace_with_triple_product`) requires `&mut self`, which is
/// how the binned-data container enforces its copy-on-write sharing rules
/// through [`std::sync::Arc::get_mut`].
///
/// A freshly constructed matrix is *empty*: no entries on either side. Empty
/// matrices act as accumulation targets for [`Self::add_inverse`] but fail
/// any operation that needs actual values.
#[derive(Clone, Debug)]
pub struct CovarianceMatrix {
    size: usize,
    repr: RefCell<Repr>,
}

impl CovarianceMatrix {
    /// Create an empty matrix for `size` positions.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            repr: RefCell::new(Repr::default()),
        }
    }

    /// Number of positions (rows/columns)
    pub fn size(&self) -> usize {
        self.size
    }

    /// True until any entry has been set or accumulated
    pub fn is_empty(&self) -> bool {
        let repr = self.repr.borrow();
        repr.cov.is_none() && repr.icov.is_none()
    }

    fn check_position(&self, i: usize, j: usize, context: &str) -> Result<()> {
        if i >= self.size || j >= self.size {
            return Err(Error::OutOfRange(format!(
                "{context}: position ({i}, {j}) not in [0, {})",
                self.size
            )));
        }
        Ok(())
    }

    fn invert(matrix: &DMatrix<f64>, context: &str) -> Result<DMatrix<f64>> {
        matrix
            .clone()
            .cholesky()
            .map(|chol| chol.inverse())
            .ok_or_else(|| Error::not_positive_definite(context))
    }

    /// Borrow the covariance side, inverting the inverse side if needed.
    fn cov_matrix(&self, context: &str) -> Result<Ref<'_, DMatrix<f64>>> {
        {
            let mut repr = self.repr.borrow_mut();
            if repr.cov.is_none() {
                let icov = repr.icov.as_ref().ok_or_else(|| {
                    Error::Computation(format!("{context}: covariance matrix has no entries"))
                })?;
                debug!(size = self.size, context, "materializing covariance from inverse");
                repr.cov = Some(Self::invert(icov, context)?);
                repr.compressed = false;
            }
        }
        Ref::filter_map(self.repr.borrow(), |repr| repr.cov.as_ref())
            .map_err(|_| Error::Computation(format!("{context}: no covariance representation")))
    }

    /// Borrow the inverse side, inverting the covariance side if needed.
    fn icov_matrix(&self, context: &str) -> Result<Ref<'_, DMatrix<f64>>> {
        {
            let mut repr = self.repr.borrow_mut();
            if repr.icov.is_none() {
                let cov = repr.cov.as_ref().ok_or_else(|| {
                    Error::Computation(format!("{context}: covariance matrix has no entries"))
                })?;
                debug!(size = self.size, context, "materializing inverse from covariance");
                repr.icov = Some(Self::invert(cov, context)?);
                repr.compressed = false;
            }
        }
        Ref::filter_map(self.repr.borrow(), |repr| repr.icov.as_ref())
            .map_err(|_| Error::Computation(format!("{context}: no inverse representation")))
    }

    /// Covariance entry `(i, j)`
    pub fn covariance(&self, i: usize, j: usize) -> Result<f64> {
        self.check_position(i, j, "covariance")?;
        Ok(self.cov_matrix("covariance")?[(i, j)])
    }

    /// Inverse-covariance entry `(i, j)`
    pub fn inverse_covariance(&self, i: usize, j: usize) -> Result<f64> {
        self.check_position(i, j, "inverse_covariance")?;
        Ok(self.icov_matrix("inverse_covariance")?[(i, j)])
    }

    /// Set covariance entry `(i, j)` (and its mirror), invalidating the
    /// inverse representation.
    pub fn set_covariance(&mut self, i: usize, j: usize, value: f64) -> Result<()> {
        self.check_position(i, j, "set_covariance")?;
        if !self.is_empty() {
            // Bring the side we are editing up to date before the write.
            self.cov_matrix("set_covariance")?;
        }
        let size = self.size;
        let mut repr = self.repr.borrow_mut();
        let cov = repr.cov.get_or_insert_with(|| DMatrix::zeros(size, size));
        cov[(i, j)] = value;
        cov[(j, i)] = value;
        repr.icov = None;
        repr.compressed = false;
        Ok(())
    }

    /// Set inverse-covariance entry `(i, j)` (and its mirror), invalidating
    /// the covariance representation.
    pub fn set_inverse_covariance(&mut self, i: usize, j: usize, value: f64) -> Result<()> {
        self.check_position(i, j, "set_inverse_covariance")?;
        if !self.is_empty() {
            self.icov_matrix("set_inverse_covariance")?;
        }
        let size = self.size;
        let mut repr = self.repr.borrow_mut();
        let icov = repr.icov.get_or_insert_with(|| DMatrix::zeros(size, size));
        icov[(i, j)] = value;
        icov[(j, i)] = value;
        repr.cov = None;
        repr.compressed = false;
        Ok(())
    }

    /// Accumulate `weight` times the other matrix's inverse into ours:
    /// `Cinv += weight * other.Cinv`. An empty matrix accumulates from zero.
    pub fn add_inverse(&mut self, other: &CovarianceMatrix, weight: f64) -> Result<()> {
        if other.size != self.size {
            return Err(Error::size_mismatch(self.size, other.size, "add_inverse"));
        }
        if other.is_empty() {
            return Ok(());
        }
        let scaled = other.icov_matrix("add_inverse")?.scale(weight);
        if !self.is_empty() {
            self.icov_matrix("add_inverse")?;
        }
        let size = self.size;
        let mut repr = self.repr.borrow_mut();
        let icov = repr.icov.get_or_insert_with(|| DMatrix::zeros(size, size));
        *icov += scaled;
        repr.cov = None;
        repr.compressed = false;
        Ok(())
    }

    /// In-place `v = C * v`
    pub fn multiply_by_covariance(&self, v: &mut [f64]) -> Result<()> {
        if v.len() != self.size {
            return Err(Error::size_mismatch(self.size, v.len(), "multiply_by_covariance"));
        }
        let result = &*self.cov_matrix("multiply_by_covariance")? * DVector::from_column_slice(v);
        v.copy_from_slice(result.as_slice());
        Ok(())
    }

    /// In-place `v = Cinv * v`
    pub fn multiply_by_inverse_covariance(&self, v: &mut [f64]) -> Result<()> {
        if v.len() != self.size {
            return Err(Error::size_mismatch(
                self.size,
                v.len(),
                "multiply_by_inverse_covariance",
            ));
        }
        let result =
            &*self.icov_matrix("multiply_by_inverse_covariance")? * DVector::from_column_slice(v);
        v.copy_from_slice(result.as_slice());
        Ok(())
    }

    /// Replace our matrix `D` with the triple product `C * D^-1 * C`.
    pub fn replace_with_triple_product(&mut self, c: &CovarianceMatrix) -> Result<()> {
        if c.size != self.size {
            return Err(Error::size_mismatch(self.size, c.size, "replace_with_triple_product"));
        }
        let product = {
            let dinv = self.icov_matrix("replace_with_triple_product")?;
            let cmat = c.cov_matrix("replace_with_triple_product")?;
            &*cmat * &*dinv * &*cmat
        };
        let mut repr = self.repr.borrow_mut();
        repr.cov = Some(product);
        repr.icov = None;
        repr.compressed = false;
        Ok(())
    }

    /// Shrink to the covariance submatrix over `keep`, in ascending order of
    /// the kept positions.
    pub fn prune(&mut self, keep: &BTreeSet<usize>) -> Result<()> {
        for &pos in keep {
            if pos >= self.size {
                return Err(Error::index_out_of_range(pos, self.size, "prune"));
            }
        }
        let kept: Vec<usize> = keep.iter().copied().collect();
        let new_size = kept.len();
        debug!(old_size = self.size, new_size, "pruning covariance matrix");
        if self.is_empty() {
            self.size = new_size;
            return Ok(());
        }
        let sub = {
            let cov = self.cov_matrix("prune")?;
            DMatrix::from_fn(new_size, new_size, |r, c| cov[(kept[r], kept[c])])
        };
        self.size = new_size;
        let mut repr = self.repr.borrow_mut();
        repr.cov = Some(sub);
        repr.icov = None;
        repr.compressed = false;
        Ok(())
    }

    /// Evaluate `v^T * Cinv * v`
    pub fn chi_square(&self, v: &[f64]) -> Result<f64> {
        if v.len() != self.size {
            return Err(Error::size_mismatch(self.size, v.len(), "chi_square"));
        }
        let delta = DVector::from_column_slice(v);
        let weighted = &*self.icov_matrix("chi_square")? * &delta;
        Ok(delta.dot(&weighted))
    }

    /// Fill `out` with correlated Gaussian noise `L * z` where `L L^T = C`
    /// and `z` is standard normal.
    pub fn sample<R: Rng + ?Sized>(&self, out: &mut [f64], rng: &mut R) -> Result<()> {
        if out.len() != self.size {
            return Err(Error::size_mismatch(self.size, out.len(), "sample"));
        }
        let chol = self
            .cov_matrix("sample")?
            .clone()
            .cholesky()
            .ok_or_else(|| Error::not_positive_definite("sample"))?;
        let mut z = DVector::zeros(self.size);
        for value in z.iter_mut() {
            *value = rng.sample(StandardNormal);
        }
        let noise = chol.l() * z;
        out.copy_from_slice(noise.as_slice());
        Ok(())
    }

    /// Drop the redundant representation, keeping a single side.
    ///
    /// Semantically transparent: the dropped side is rebuilt on the next
    /// read. Returns false when there is nothing to compress. When both
    /// sides are present the inverse is kept, since chi-square loops consume
    /// it directly.
    pub fn compress(&self) -> bool {
        let mut repr = self.repr.borrow_mut();
        if repr.cov.is_none() && repr.icov.is_none() {
            return false;
        }
        if repr.cov.is_some() && repr.icov.is_some() {
            repr.cov = None;
        }
        repr.compressed = true;
        true
    }

    /// True after [`Self::compress`] until the dropped side is rebuilt
    pub fn is_compressed(&self) -> bool {
        self.repr.borrow().compressed
    }

    /// Approximate resident bytes
    pub fn memory_usage(&self) -> usize {
        let repr = self.repr.borrow();
        let matrix_bytes = |m: &Option<DMatrix<f64>>| {
            m.as_ref()
                .map(|m| m.len() * std::mem::size_of::<f64>())
                .unwrap_or(0)
        };
        std::mem::size_of::<Self>() + matrix_bytes(&repr.cov) + matrix_bytes(&repr.icov)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use binfit_core::seeded_rng;

    fn diagonal(values: &[f64]) -> CovarianceMatrix {
        let mut cov = CovarianceMatrix::new(values.len());
        for (i, &v) in values.iter().enumerate() {
            cov.set_covariance(i, i, v).unwrap();
        }
        cov
    }

    #[test]
    fn test_empty_matrix() {
        let cov = CovarianceMatrix::new(3);
        assert_eq!(cov.size(), 3);
        assert!(cov.is_empty());
        assert!(cov.covariance(0, 0).is_err());
        assert!(cov.chi_square(&[1.0, 2.0, 3.0]).is_err());
        assert!(!cov.compress());
    }

    #[test]
    fn test_lazy_inverse() {
        let cov = diagonal(&[4.0, 9.0]);
        assert_relative_eq!(cov.inverse_covariance(0, 0).unwrap(), 0.25);
        assert_relative_eq!(cov.inverse_covariance(1, 1).unwrap(), 1.0 / 9.0);
        assert_relative_eq!(cov.inverse_covariance(0, 1).unwrap(), 0.0);
    }

    #[test]
    fn test_set_inverse_then_read_covariance() {
        let mut cov = CovarianceMatrix::new(2);
        cov.set_inverse_covariance(0, 0, 0.5).unwrap();
        cov.set_inverse_covariance(1, 1, 0.1).unwrap();
        assert_relative_eq!(cov.covariance(0, 0).unwrap(), 2.0);
        assert_relative_eq!(cov.covariance(1, 1).unwrap(), 10.0);
    }

    #[test]
    fn test_correlated_matrix_round_trip() {
        let mut cov = CovarianceMatrix::new(2);
        cov.set_covariance(0, 0, 2.0).unwrap();
        cov.set_covariance(1, 1, 3.0).unwrap();
        cov.set_covariance(0, 1, 1.0).unwrap();
        // C * Cinv applied to a vector should be the identity.
        let mut v = [1.5, -2.5];
        cov.multiply_by_inverse_covariance(&mut v).unwrap();
        cov.multiply_by_covariance(&mut v).unwrap();
        assert_relative_eq!(v[0], 1.5, epsilon = 1e-12);
        assert_relative_eq!(v[1], -2.5, epsilon = 1e-12);
    }

    #[test]
    fn test_not_positive_definite() {
        let mut cov = CovarianceMatrix::new(2);
        cov.set_covariance(0, 0, 1.0).unwrap();
        cov.set_covariance(1, 1, 1.0).unwrap();
        cov.set_covariance(0, 1, 2.0).unwrap(); // |rho| > 1
        assert!(cov.inverse_covariance(0, 0).is_err());
    }

    #[test]
    fn test_chi_square() {
        let cov = diagonal(&[4.0, 9.0]);
        // 2^2/4 + 3^2/9 = 2
        assert_relative_eq!(cov.chi_square(&[2.0, 3.0]).unwrap(), 2.0);
        assert!(cov.chi_square(&[1.0]).is_err());
    }

    #[test]
    fn test_add_inverse() {
        let mut a = diagonal(&[2.0]);
        let b = diagonal(&[4.0]);
        a.add_inverse(&b, 2.0).unwrap();
        // 1/2 + 2 * 1/4 = 1
        assert_relative_eq!(a.inverse_covariance(0, 0).unwrap(), 1.0);
        // Accumulation into an empty matrix starts from zero.
        let mut empty = CovarianceMatrix::new(1);
        empty.add_inverse(&b, 1.0).unwrap();
        assert_relative_eq!(empty.inverse_covariance(0, 0).unwrap(), 0.25);
    }

    #[test]
    fn test_triple_product_with_equal_matrices_is_identity() {
        let c = diagonal(&[2.0, 5.0]);
        let mut d = c.clone();
        // C * C^-1 * C = C
        d.replace_with_triple_product(&c).unwrap();
        assert_relative_eq!(d.covariance(0, 0).unwrap(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(d.covariance(1, 1).unwrap(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_prune() {
        let mut cov = diagonal(&[1.0, 2.0, 3.0, 4.0]);
        cov.set_covariance(1, 3, 0.5).unwrap();
        let keep: BTreeSet<usize> = [1, 3].into_iter().collect();
        cov.prune(&keep).unwrap();
        assert_eq!(cov.size(), 2);
        assert_relative_eq!(cov.covariance(0, 0).unwrap(), 2.0);
        assert_relative_eq!(cov.covariance(1, 1).unwrap(), 4.0);
        assert_relative_eq!(cov.covariance(0, 1).unwrap(), 0.5);
    }

    #[test]
    fn test_prune_rejects_bad_position() {
        let mut cov = diagonal(&[1.0, 2.0]);
        let keep: BTreeSet<usize> = [0, 5].into_iter().collect();
        assert!(cov.prune(&keep).is_err());
    }

    #[test]
    fn test_compress_is_transparent() {
        let cov = diagonal(&[4.0, 9.0]);
        // Materialize both sides, then compress away the redundant one.
        cov.inverse_covariance(0, 0).unwrap();
        let before = cov.memory_usage();
        assert!(cov.compress());
        assert!(cov.is_compressed());
        assert!(cov.memory_usage() < before);
        // Reads still work; rebuilding clears the compressed flag.
        assert_relative_eq!(cov.covariance(1, 1).unwrap(), 9.0);
        assert!(!cov.is_compressed());
    }

    #[test]
    fn test_sample_statistics() {
        let cov = diagonal(&[4.0, 0.25]);
        let mut rng = seeded_rng(42);
        let n = 4000;
        let mut sums = [0.0; 2];
        let mut sq_sums = [0.0; 2];
        let mut draw = [0.0; 2];
        for _ in 0..n {
            cov.sample(&mut draw, &mut rng).unwrap();
            for k in 0..2 {
                sums[k] += draw[k];
                sq_sums[k] += draw[k] * draw[k];
            }
        }
        for k in 0..2 {
            let mean = sums[k] / n as f64;
            let var = sq_sums[k] / n as f64 - mean * mean;
            let expected = cov.covariance(k, k).unwrap();
            assert!(mean.abs() < 0.2, "mean {mean} too far from 0");
            assert!(
                (var - expected).abs() / expected < 0.15,
                "variance {var} too far from {expected}"
            );
        }
    }
}
