//! Smoke tests through the facade re-exports

use approx::assert_relative_eq;
use binfit::{seeded_rng, BinnedData, BinningRef, NonUniformBinning, Result, UniformBinning};
use std::sync::Arc;

#[test]
fn test_combine_measure_and_sample() -> Result<()> {
    let energy: BinningRef = Arc::new(NonUniformBinning::new(vec![0.0, 1.0, 3.0, 10.0])?);
    let angle: BinningRef = Arc::new(UniformBinning::new(-1.0, 1.0, 2)?);

    let mut run1 = BinnedData::new_2d(Arc::clone(&energy), Arc::clone(&angle))?;
    let index = run1.index_from_values(&[2.0, 0.5])?;
    run1.set_data(index, 4.0)?;
    run1.set_covariance(index, index, 1.0)?;

    let mut run2 = run1.clone_binning();
    run2.set_data(index, 6.0)?;
    run2.set_covariance(index, index, 1.0)?;

    let mut combined = run1.clone_binning();
    combined.add(&run1, 1.0)?;
    combined.add(&run2, 1.0)?;
    assert_relative_eq!(combined.value(index)?, 5.0, epsilon = 1e-12);
    assert_relative_eq!(combined.covariance(index, index)?, 0.5, epsilon = 1e-12);

    let chi2 = combined.chi_square(&[5.0])?;
    assert_relative_eq!(chi2, 0.0, epsilon = 1e-12);

    let mut rng = seeded_rng(99);
    let realization = combined.sample(&mut rng)?;
    assert!(realization.is_congruent(&combined));
    assert!(realization.value(index)?.is_finite());
    Ok(())
}
