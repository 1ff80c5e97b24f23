use std::iter::Sum;

use ndarray::{Array1, Array2, LinalgScalar};
use num_traits::Float;

use crate::{Error, Result};

/// Compute the outer product of two one-dimensional vectors of length (m x 1) and (n x 1)
///
/// The outer product is the (m x n) matrix whose elements are products of elements in the first
/// vector with those in the second.
///
/// # Examples
///
/// ```
/// use filter_efficiency::math::outer_product;
/// use ndarray::{arr1, arr2, Array1};
///
/// let u: Array1<f64> = arr1(&[1., 2., 3.]);
/// let v = arr1(&[4., 5., 6.]);
/// let outer_product = outer_product(&u, &v).unwrap();
///
/// let expected = arr2(&[[4., 5., 6.], [8., 10., 12.], [12., 15., 18.]]);
/// assert_eq!(outer_product, expected);
///```
///
/// # Errors
/// Returns an error if either vector cannot be viewed as a matrix.
pub fn outer_product<T: LinalgScalar>(u: &Array1<T>, v: &Array1<T>) -> Result<Array2<T>> {
    let u: Array2<T> = u
        .clone()
        .into_shape((u.len(), 1))
        .map_err(|e| Error::InvalidInput(e.to_string()))?;
    let v: Array2<T> = v
        .clone()
        .into_shape((1, v.len()))
        .map_err(|e| Error::InvalidInput(e.to_string()))?;

    Ok(ndarray::linalg::kron(&u, &v))
}

/// Linearly interpolated quantile of an ascending slice
///
/// `q` is clamped to `[0, 1]`. An empty slice has no quantiles and yields `NaN`.
///
/// # Examples
///
/// ```
/// use filter_efficiency::math::quantile;
///
/// let sorted = [1., 2., 3., 4.];
/// assert_eq!(quantile(&sorted, 0.5), 2.5);
/// assert_eq!(quantile(&sorted, 1.0), 4.);
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - position.floor();
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Goodness of fit of a model against observations
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FitMetrics<E> {
    /// Coefficient of determination, zero when the observations have no spread
    pub r_squared: E,
    pub rmse: E,
    pub mae: E,
}

impl<E: Float + Sum> FitMetrics<E> {
    /// Compare paired `observed` and `predicted` values
    ///
    /// # Panics
    /// If the slices differ in length.
    #[must_use]
    pub fn compute(observed: &[E], predicted: &[E]) -> Self {
        assert_eq!(observed.len(), predicted.len());
        if observed.is_empty() {
            return Self {
                r_squared: E::zero(),
                rmse: E::nan(),
                mae: E::nan(),
            };
        }
        let n = E::from(observed.len()).unwrap_or_else(E::nan);

        let residuals = observed
            .iter()
            .zip(predicted)
            .map(|(o, p)| *o - *p)
            .collect::<Vec<_>>();
        let ss_res: E = residuals.iter().map(|r| r.powi(2)).sum();
        let mean = observed.iter().copied().sum::<E>() / n;
        let ss_tot: E = observed.iter().map(|o| (*o - mean).powi(2)).sum();

        Self {
            r_squared: if ss_tot > E::zero() {
                E::one() - ss_res / ss_tot
            } else {
                E::zero()
            },
            rmse: (ss_res / n).sqrt(),
            mae: residuals.iter().map(|r| r.abs()).sum::<E>() / n,
        }
    }
}

/// Least-squares slope of `y` against `x`
///
/// Returns `None` when fewer than two points are given or `x` has no spread.
///
/// # Examples
///
/// ```
/// use filter_efficiency::math::slope;
///
/// let x = [0., 1., 2., 3.];
/// let y = [1., 3., 5., 7.];
/// assert_eq!(slope(&x, &y), Some(2.));
/// ```
#[must_use]
pub fn slope<E: Float + Sum>(x: &[E], y: &[E]) -> Option<E> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let n = E::from(x.len())?;
    let x_mean = x.iter().copied().sum::<E>() / n;
    let y_mean = y.iter().copied().sum::<E>() / n;

    let sxx: E = x.iter().map(|xi| (*xi - x_mean).powi(2)).sum();
    if sxx <= E::zero() {
        return None;
    }
    let sxy: E = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| (*xi - x_mean) * (*yi - y_mean))
        .sum();
    Some(sxy / sxx)
}

#[cfg(test)]
mod tests {
    use ndarray::Array;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::{rand::Rng, RandomExt};
    use rand_isaac::isaac64::Isaac64Rng;

    use super::{outer_product, quantile, slope, FitMetrics};

    #[test]
    fn outer_products_are_generated_correctly() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let m = rng.gen_range(1..20);
        let n = rng.gen_range(1..20);
        let u = Array::random_using(m, Uniform::new(0., 10.), &mut rng);
        let v = Array::random_using(n, Uniform::new(0., 10.), &mut rng);

        let outer = outer_product(&u, &v).unwrap();

        for ii in 0..m {
            for jj in 0..n {
                approx::assert_relative_eq!(outer[[ii, jj]], u[ii] * v[jj]);
            }
        }
    }

    #[test]
    fn perfect_predictions_have_unit_r_squared() {
        let observed = [1.0, 2.0, 4.0, 8.0];
        let metrics = FitMetrics::compute(&observed, &observed);
        approx::assert_relative_eq!(metrics.r_squared, 1.0);
        approx::assert_relative_eq!(metrics.rmse, 0.0);
        approx::assert_relative_eq!(metrics.mae, 0.0);
    }

    #[test]
    fn metrics_match_hand_computed_values() {
        let observed = [2.0, 4.0, 6.0];
        let predicted = [3.0, 4.0, 5.0];
        let metrics = FitMetrics::compute(&observed, &predicted);
        // ss_res = 2, ss_tot = 8
        approx::assert_relative_eq!(metrics.r_squared, 0.75);
        approx::assert_relative_eq!(metrics.rmse, (2.0f64 / 3.0).sqrt());
        approx::assert_relative_eq!(metrics.mae, 2.0 / 3.0);
    }

    #[test]
    fn observations_without_spread_have_zero_r_squared() {
        let metrics = FitMetrics::compute(&[3.0, 3.0], &[2.0, 4.0]);
        approx::assert_relative_eq!(metrics.r_squared, 0.0);
    }

    #[test]
    fn slope_recovers_a_noisy_line() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let x = (0..200).map(f64::from).collect::<Vec<_>>();
        let y = x
            .iter()
            .map(|x| -0.3 * x + 4.0 + rng.gen_range(-0.01..0.01))
            .collect::<Vec<_>>();
        approx::assert_relative_eq!(slope(&x, &y).unwrap(), -0.3, max_relative = 1e-3);
        assert_eq!(slope(&[1.0, 1.0], &[2.0, 3.0]), None);
    }

    #[test]
    fn quantiles_interpolate_between_neighbours() {
        let sorted = [0.0, 10.0, 20.0, 30.0, 40.0];
        approx::assert_relative_eq!(quantile(&sorted, 0.25), 10.0);
        approx::assert_relative_eq!(quantile(&sorted, 0.1), 4.0);
        assert!(quantile(&[], 0.5).is_nan());
    }
}
