use num_traits::Float;

use crate::config::KalmanConfig;
use crate::{Error, Result};

/// Interface trait for the prior distributions placed on the model parameters
///
/// Only ratios of densities matter to the estimators, so `ln_density` drops the normalising
/// constant. It returns negative infinity outside the support.
pub trait Prior<T: Float> {
    fn ln_density(&self, x: T) -> T;

    fn mean(&self) -> T;

    fn variance(&self) -> T;

    fn standard_deviation(&self) -> T {
        self.variance().sqrt()
    }
}

fn positive<T: Float>(name: &str, value: T) -> Result<T> {
    if value.is_finite() && value > T::zero() {
        Ok(value)
    } else {
        Err(Error::InvalidInput(format!(
            "{name} must be finite and positive, got {}",
            value.to_f64().unwrap_or(f64::NAN)
        )))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
/// A beta distribution on $\left[0, 1\right]$
///
/// Used for the filter efficiency, a fraction that is usually close to its rated value.
///
/// $$
///     f \left(x\right) \propto x^{\alpha - 1} \left(1 - x\right)^{\beta - 1}
/// $$
pub struct Beta<T> {
    alpha: T,
    beta: T,
}

impl<T: Float> Beta<T> {
    /// # Errors
    /// Returns an error unless both shape parameters are positive.
    pub fn new(alpha: T, beta: T) -> Result<Self> {
        Ok(Self {
            alpha: positive("beta alpha", alpha)?,
            beta: positive("beta beta", beta)?,
        })
    }
}

impl<T: Float> Prior<T> for Beta<T> {
    fn ln_density(&self, x: T) -> T {
        if !(T::zero()..=T::one()).contains(&x) {
            return T::neg_infinity();
        }
        (self.alpha - T::one()) * x.ln() + (self.beta - T::one()) * (T::one() - x).ln()
    }

    fn mean(&self) -> T {
        self.alpha / (self.alpha + self.beta)
    }

    fn variance(&self) -> T {
        let total = self.alpha + self.beta;
        self.alpha * self.beta / (total.powi(2) * (total + T::one()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
/// A gamma distribution with shape $k$ and scale $\theta$
///
/// Used for the strictly positive infiltration rate and measurement noise.
///
/// $$
///     f \left(x\right) \propto x^{k - 1} \exp\left[-\frac{x}{\theta}\right]
/// $$
pub struct Gamma<T> {
    shape: T,
    scale: T,
}

impl<T: Float> Gamma<T> {
    /// # Errors
    /// Returns an error unless shape and scale are positive.
    pub fn new(shape: T, scale: T) -> Result<Self> {
        Ok(Self {
            shape: positive("gamma shape", shape)?,
            scale: positive("gamma scale", scale)?,
        })
    }

    /// A gamma distribution with the given mean, its spread set by `shape`
    ///
    /// Larger shapes concentrate the distribution, the coefficient of variation is
    /// $1 / \sqrt{k}$.
    ///
    /// # Errors
    /// Returns an error unless mean and shape are positive.
    pub fn from_mean(mean: T, shape: T) -> Result<Self> {
        let mean = positive("gamma mean", mean)?;
        let shape = positive("gamma shape", shape)?;
        Self::new(shape, mean / shape)
    }
}

impl<T: Float> Prior<T> for Gamma<T> {
    fn ln_density(&self, x: T) -> T {
        if x <= T::zero() {
            return T::neg_infinity();
        }
        (self.shape - T::one()) * x.ln() - x / self.scale
    }

    fn mean(&self) -> T {
        self.shape * self.scale
    }

    fn variance(&self) -> T {
        self.shape * self.scale.powi(2)
    }
}

/// The priors on the two building parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParameterPriors {
    pub efficiency: Beta<f64>,
    pub infiltration: Gamma<f64>,
}

impl ParameterPriors {
    /// Priors centred on the configured efficiency shape and the building's expected infiltration
    ///
    /// # Errors
    /// Returns an error if any prior parameter is not positive.
    pub fn new(config: &KalmanConfig, infiltration_prior_ach: f64) -> Result<Self> {
        Ok(Self {
            efficiency: Beta::new(config.efficiency_prior_alpha, config.efficiency_prior_beta)?,
            infiltration: Gamma::from_mean(
                infiltration_prior_ach,
                config.infiltration_prior_shape,
            )?,
        })
    }

    #[must_use]
    pub fn ln_density(&self, efficiency: f64, infiltration_ach: f64) -> f64 {
        self.efficiency.ln_density(efficiency) + self.infiltration.ln_density(infiltration_ach)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{Beta, Gamma, ParameterPriors, Prior};
    use crate::config::KalmanConfig;

    #[test]
    fn beta_moments_match_closed_form() {
        let beta = Beta::new(8.0, 2.0).unwrap();
        approx::assert_relative_eq!(beta.mean(), 0.8);
        approx::assert_relative_eq!(beta.variance(), 16.0 / 1100.0);
    }

    #[test]
    fn gamma_from_mean_keeps_the_mean() {
        let gamma = Gamma::from_mean(0.6, 50.0).unwrap();
        approx::assert_relative_eq!(gamma.mean(), 0.6, max_relative = 1e-12);
        approx::assert_relative_eq!(gamma.variance(), 0.36 / 50.0, max_relative = 1e-12);
        approx::assert_relative_eq!(
            gamma.standard_deviation(),
            0.6 / 50f64.sqrt(),
            max_relative = 1e-12
        );
    }

    #[test]
    fn densities_vanish_outside_the_support() {
        let beta = Beta::new(8.0, 2.0).unwrap();
        assert_eq!(beta.ln_density(1.2), f64::NEG_INFINITY);
        assert_eq!(beta.ln_density(-0.1), f64::NEG_INFINITY);
        let gamma = Gamma::new(2.0, 2.0).unwrap();
        assert_eq!(gamma.ln_density(0.0), f64::NEG_INFINITY);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(Beta::new(0.0, 2.0).is_err());
        assert!(Gamma::new(2.0, f64::NAN).is_err());
        assert!(Gamma::from_mean(-1.0, 2.0).is_err());
    }

    #[test]
    fn parameter_priors_follow_the_configuration() {
        let priors = ParameterPriors::new(&KalmanConfig::default(), 0.5).unwrap();
        approx::assert_relative_eq!(priors.efficiency.mean(), 0.8);
        approx::assert_relative_eq!(priors.infiltration.mean(), 0.5, max_relative = 1e-12);
        assert!(priors.ln_density(0.8, 0.5) > priors.ln_density(0.4, 0.5));
        assert!(priors.ln_density(0.8, 0.5) > priors.ln_density(0.8, 1.5));
    }

    proptest! {
        #[test]
        fn beta_density_peaks_at_its_mode(
            alpha in 1.5f64..20.0,
            beta in 1.5f64..20.0,
            x in 0.001f64..0.999,
        ) {
            let distribution = Beta::new(alpha, beta).unwrap();
            let mode = (alpha - 1.0) / (alpha + beta - 2.0);
            prop_assert!(distribution.ln_density(mode) >= distribution.ln_density(x) - 1e-9);
        }

        #[test]
        fn gamma_density_peaks_at_its_mode(
            shape in 1.5f64..100.0,
            mean in 0.05f64..5.0,
            x in 0.001f64..10.0,
        ) {
            let distribution = Gamma::from_mean(mean, shape).unwrap();
            let mode = (shape - 1.0) * mean / shape;
            prop_assert!(distribution.ln_density(mode) >= distribution.ln_density(x) - 1e-9);
        }
    }
}
