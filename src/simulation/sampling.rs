//! Elementwise binomial and Poisson draws over abundance matrices.
//!
//! Draws are parallel over rows. One `u64` is taken from the caller's
//! generator per call and every row derives its own `ChaCha8Rng` stream from
//! it, so the output depends only on the caller's seed and not on how rayon
//! schedules the rows.

use ndarray::{Array2, ArrayView2, Zip};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Binomial, Distribution, Poisson};
use serde::{Deserialize, Serialize};

use super::error::SamplingError;

/// Odd constant used to decorrelate per-row seeds.
const ROW_SEED_PRIME: u64 = 0x9E37_79B9_7F4A_7C15;

/// Whether stochastic stages draw random numbers or use their expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Binomial and Poisson draws.
    #[default]
    Stochastic,
    /// `n * p` for binomial stages and `lambda` for Poisson stages.
    Expected,
}

/// Derives an independent generator for one row.
pub fn derive_row_rng(base_seed: u64, row: usize) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(base_seed ^ (row as u64 + 1).wrapping_mul(ROW_SEED_PRIME))
}

/// Draws `Binomial(n[i, j], p[i, j])` for every element.
///
/// Trial counts are rounded to the nearest integer. In
/// [`SamplingMode::Expected`] the result is `n * p` and `rng` is not touched.
pub fn binomial_draw<R: Rng + ?Sized>(
    trials: ArrayView2<'_, f64>,
    probabilities: ArrayView2<'_, f64>,
    mode: SamplingMode,
    rng: &mut R,
) -> Result<Array2<f64>, SamplingError> {
    if trials.dim() != probabilities.dim() {
        return Err(SamplingError::ShapeMismatch {
            trials: trials.dim(),
            probabilities: probabilities.dim(),
        });
    }
    for ((row, col), &n) in trials.indexed_iter() {
        if !(n.is_finite() && n >= 0.0) {
            return Err(SamplingError::Magnitude {
                what: "trial count",
                row,
                col,
                value: n,
            });
        }
        let p = probabilities[[row, col]];
        if !(0.0..=1.0).contains(&p) {
            return Err(SamplingError::Probability {
                row,
                col,
                value: p,
            });
        }
    }

    if mode == SamplingMode::Expected {
        return Ok(&trials * &probabilities);
    }

    let base_seed: u64 = rng.random();
    let mut out = Array2::zeros(trials.raw_dim());
    Zip::indexed(out.rows_mut())
        .and(trials.rows())
        .and(probabilities.rows())
        .par_for_each(|row, mut out_row, n_row, p_row| {
            let mut row_rng = derive_row_rng(base_seed, row);
            for ((slot, &n), &p) in out_row.iter_mut().zip(n_row).zip(p_row) {
                let n = n.round() as u64;
                *slot = match Binomial::new(n, p) {
                    Ok(dist) if n > 0 && p > 0.0 => dist.sample(&mut row_rng) as f64,
                    _ if p >= 1.0 => n as f64,
                    _ => 0.0,
                };
            }
        });
    Ok(out)
}

/// Draws `Poisson(lambda[i, j])` for every element; zero rates give zero.
///
/// In [`SamplingMode::Expected`] the result is `lambda` itself.
pub fn poisson_draw<R: Rng + ?Sized>(
    rates: ArrayView2<'_, f64>,
    mode: SamplingMode,
    rng: &mut R,
) -> Result<Array2<f64>, SamplingError> {
    for ((row, col), &lambda) in rates.indexed_iter() {
        if !(lambda.is_finite() && lambda >= 0.0) {
            return Err(SamplingError::Magnitude {
                what: "rate",
                row,
                col,
                value: lambda,
            });
        }
    }

    if mode == SamplingMode::Expected {
        return Ok(rates.to_owned());
    }

    let base_seed: u64 = rng.random();
    let mut out = Array2::zeros(rates.raw_dim());
    Zip::indexed(out.rows_mut())
        .and(rates.rows())
        .par_for_each(|row, mut out_row, rate_row| {
            let mut row_rng = derive_row_rng(base_seed, row);
            for (slot, &lambda) in out_row.iter_mut().zip(rate_row) {
                *slot = if lambda > 0.0 {
                    Poisson::new(lambda).map_or(lambda.round(), |dist| dist.sample(&mut row_rng))
                } else {
                    0.0
                };
            }
        });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn binomial_extremes_are_deterministic() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let n = array![[5.0, 3.0], [0.0, 7.0]];
        let p = array![[1.0, 0.0], [0.5, 1.0]];
        let draw = binomial_draw(n.view(), p.view(), SamplingMode::Stochastic, &mut rng).unwrap();
        assert_eq!(draw, array![[5.0, 0.0], [0.0, 7.0]]);
    }

    #[test]
    fn draws_are_reproducible_for_a_seed() {
        let rates = Array2::from_elem((50, 3), 4.0);
        let a = poisson_draw(rates.view(), SamplingMode::Stochastic, &mut ChaCha8Rng::seed_from_u64(9))
            .unwrap();
        let b = poisson_draw(rates.view(), SamplingMode::Stochastic, &mut ChaCha8Rng::seed_from_u64(9))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn expected_mode_returns_means() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let n = array![[4.0]];
        let p = array![[0.25]];
        let draw = binomial_draw(n.view(), p.view(), SamplingMode::Expected, &mut rng).unwrap();
        assert_eq!(draw, array![[1.0]]);
    }

    #[test]
    fn rejects_invalid_arguments() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let n = array![[1.0]];
        assert!(binomial_draw(n.view(), array![[1.5]].view(), SamplingMode::Stochastic, &mut rng).is_err());
        assert!(poisson_draw(array![[-1.0]].view(), SamplingMode::Stochastic, &mut rng).is_err());
        assert!(poisson_draw(array![[f64::NAN]].view(), SamplingMode::Expected, &mut rng).is_err());
    }
}
