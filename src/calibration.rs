//! Batch calibration of the mass balance over a window of night-time observations.
//!
//! This runs independently of the recursive estimator and serves as a cross-check on it. Ratio
//! outliers are removed before fitting, and windows that are too small to fit are reported as
//! [`FitQuality::Insufficient`] rather than failing.
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{AnalysisConfig, Config};
use crate::distributions::{ParameterPriors, Prior};
use crate::gate::ratio_outliers;
use crate::math::FitMetrics;
use crate::minimisation::{Parameters, Problem};
use crate::model::MassBalance;
use crate::regime::Regime;
use crate::sample::Observation;
use crate::Result;

/// R² at or above which a fit is considered to explain the data well
pub const HIGH_R_SQUARED: f64 = 0.7;
const MAX_ITERS: u64 = 2000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitQuality {
    /// Too few night observations to fit
    Insufficient,
    Low,
    Moderate,
    High,
}

/// Parameters and goodness of fit from a batch calibration
///
/// Parameters and metrics are `NaN` when the quality is [`FitQuality::Insufficient`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub efficiency: f64,
    pub infiltration_ach: f64,
    /// Fitted standard deviation of the indoor measurement noise in µg/m³
    pub noise_std: f64,
    pub r_squared: f64,
    pub rmse: f64,
    pub mae: f64,
    /// Observations used in the fit, after outlier removal
    pub n_points: usize,
    pub n_outliers: usize,
    pub quality_tier: FitQuality,
    pub converged: bool,
}

impl FitResult {
    fn insufficient(n_points: usize, n_outliers: usize) -> Self {
        Self {
            efficiency: f64::NAN,
            infiltration_ach: f64::NAN,
            noise_std: f64::NAN,
            r_squared: f64::NAN,
            rmse: f64::NAN,
            mae: f64::NAN,
            n_points,
            n_outliers,
            quality_tier: FitQuality::Insufficient,
            converged: false,
        }
    }

    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.quality_tier != FitQuality::Insufficient
    }
}

/// Fits `(efficiency, infiltration_ach)` by maximising the posterior under the configured priors
#[derive(Clone, Debug)]
pub struct BatchFit {
    model: MassBalance,
    priors: ParameterPriors,
    initial_noise_std: f64,
    analysis: AnalysisConfig,
}

impl BatchFit {
    /// # Errors
    /// Returns an error if the priors cannot be built from the configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let params = config.building_parameters();
        Ok(Self {
            model: MassBalance::from(&params),
            priors: ParameterPriors::new(&config.kalman_filter, params.infiltration_prior_ach)?,
            initial_noise_std: config.kalman_filter.measurement_noise_std,
            analysis: config.analysis.clone(),
        })
    }

    fn quality(&self, r_squared: f64) -> FitQuality {
        if r_squared < self.analysis.min_r_squared {
            FitQuality::Low
        } else if r_squared < HIGH_R_SQUARED {
            FitQuality::Moderate
        } else {
            FitQuality::High
        }
    }

    /// Fit the night-time members of `observations`
    ///
    /// Day-time observations are ignored.
    ///
    /// # Errors
    /// Returns an error if the optimiser fails to run.
    pub fn fit(&self, observations: &[Observation]) -> Result<FitResult> {
        let night = observations
            .iter()
            .filter(|observation| observation.regime == Regime::Night)
            .copied()
            .collect::<Vec<_>>();

        let outliers = ratio_outliers(&night, self.analysis.outlier_threshold);
        let retained = night
            .iter()
            .zip(&outliers)
            .filter_map(|(observation, outlier)| (!outlier).then_some(*observation))
            .collect::<Vec<_>>();
        let n_outliers = night.len() - retained.len();

        if retained.len() < self.analysis.min_data_points {
            warn!(
                "only {} night observations after removing {n_outliers} outliers, {} needed to fit",
                retained.len(),
                self.analysis.min_data_points
            );
            return Ok(FitResult::insufficient(retained.len(), n_outliers));
        }

        let problem = Problem::new(&retained, self.model, self.priors)?;
        let initial = Parameters {
            efficiency: self.priors.efficiency.mean(),
            infiltration_ach: self.priors.infiltration.mean(),
            noise_std: self.initial_noise_std,
        };
        let solution = problem.clone().solve(&initial, MAX_ITERS)?;
        if !solution.converged {
            warn!(
                "batch fit stopped after {} iterations without converging",
                solution.iterations
            );
        }

        let fitted = solution.parameters;
        let predicted = problem.predict(&fitted)?;
        let metrics = FitMetrics::compute(problem.indoor_pm25(), &predicted);

        info!(
            "batch fit over {} night observations: efficiency {:.3}, \
             infiltration {:.3} ACH, R² {:.3}",
            retained.len(),
            fitted.efficiency,
            fitted.infiltration_ach,
            metrics.r_squared
        );

        Ok(FitResult {
            efficiency: fitted.efficiency,
            infiltration_ach: fitted.infiltration_ach,
            noise_std: fitted.noise_std,
            r_squared: metrics.r_squared,
            rmse: metrics.rmse,
            mae: metrics.mae,
            n_points: retained.len(),
            n_outliers,
            quality_tier: self.quality(metrics.r_squared),
            converged: solution.converged,
        })
    }
}

/// Batch-fit the night-time observations in `observations` under `config`
///
/// # Errors
/// Returns an error if the priors are invalid or the optimiser fails to run.
pub fn fit_night_observations(observations: &[Observation], config: &Config) -> Result<FitResult> {
    BatchFit::new(config)?.fit(observations)
}
