use argmin::core::observers::{ObserverMode, SlogLogger};
use argmin::core::{CostFunction, Executor, State};
use argmin::solver::neldermead::NelderMead;
use log::{debug, log_enabled, Level};

use crate::distributions::{Gamma, ParameterPriors, Prior};
use crate::model::MassBalance;
use crate::sample::Observation;
use crate::{Error, Result};

/// Efficiencies are kept this far inside `[0, 1]` so the beta prior stays finite
const EFFICIENCY_MARGIN: f64 = 1e-12;
/// Edge length of the initial simplex in the unconstrained coordinates
const SIMPLEX_STEP: f64 = 0.5;
/// Floor on the fitted noise, in µg/m³, keeping the likelihood bounded on noiseless data
const MIN_NOISE_STD: f64 = 1e-3;

/// A point in parameter space
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Parameters {
    pub efficiency: f64,
    pub infiltration_ach: f64,
    /// Standard deviation of the indoor measurement noise in µg/m³
    pub noise_std: f64,
}

impl Parameters {
    /// Map to the unconstrained coordinates the optimiser works in
    ///
    /// The efficiency goes through the logit, the rates through the logarithm.
    fn pack(&self) -> Vec<f64> {
        let efficiency = self
            .efficiency
            .clamp(EFFICIENCY_MARGIN, 1.0 - EFFICIENCY_MARGIN);
        vec![
            (efficiency / (1.0 - efficiency)).ln(),
            self.infiltration_ach.ln(),
            self.noise_std.ln(),
        ]
    }

    fn unpack(p: &[f64]) -> Self {
        Self {
            efficiency: (1.0 / (1.0 + (-p[0]).exp()))
                .clamp(EFFICIENCY_MARGIN, 1.0 - EFFICIENCY_MARGIN),
            infiltration_ach: p[1].exp(),
            noise_std: p[2].exp().max(MIN_NOISE_STD),
        }
    }
}

/// Outcome of the optimiser
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Solution {
    pub parameters: Parameters,
    /// Negative log posterior at the solution, up to a constant
    pub cost: f64,
    pub iterations: u64,
    pub converged: bool,
}

/// Maximum a posteriori estimation of the mass balance parameters from steady-state observations
///
/// Residuals between observed and predicted indoor PM2.5 are taken to be Gaussian with an unknown
/// standard deviation, which is fitted alongside the two building parameters.
#[derive(Clone, Debug)]
pub struct Problem {
    outdoor_pm25: Vec<f64>,
    indoor_pm25: Vec<f64>,
    model: MassBalance,
    priors: ParameterPriors,
    noise_prior: Gamma<f64>,
}

impl Problem {
    /// # Errors
    /// Returns an error if no observations are given.
    pub fn new(
        observations: &[Observation],
        model: MassBalance,
        priors: ParameterPriors,
    ) -> Result<Self> {
        if observations.is_empty() {
            return Err(Error::InvalidInput(
                "cannot fit the mass balance without observations".into(),
            ));
        }
        Ok(Self {
            outdoor_pm25: observations.iter().map(|o| o.outdoor_pm25).collect(),
            indoor_pm25: observations.iter().map(|o| o.indoor_pm25).collect(),
            model,
            priors,
            noise_prior: Gamma::new(2.0, 2.0)?,
        })
    }

    /// Predicted indoor PM2.5 for every observation
    ///
    /// # Errors
    /// Returns [`Error::DegenerateModel`] if the balance cannot be evaluated at `parameters`.
    pub fn predict(&self, parameters: &Parameters) -> Result<Vec<f64>> {
        self.outdoor_pm25
            .iter()
            .map(|outdoor| {
                self.model.predict_indoor(
                    parameters.efficiency,
                    parameters.infiltration_ach,
                    *outdoor,
                )
            })
            .collect()
    }

    #[must_use]
    pub fn indoor_pm25(&self) -> &[f64] {
        &self.indoor_pm25
    }

    /// Negative log posterior, without normalising constants
    ///
    /// # Errors
    /// Returns [`Error::DegenerateModel`] if the balance cannot be evaluated at `parameters`.
    pub fn neg_log_posterior(&self, parameters: &Parameters) -> Result<f64> {
        let predicted = self.predict(parameters)?;
        let sum_of_squares: f64 = self
            .indoor_pm25
            .iter()
            .zip(&predicted)
            .map(|(observed, predicted)| (observed - predicted).powi(2))
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let n = self.indoor_pm25.len() as f64;
        let variance = parameters.noise_std.powi(2);

        let neg_log_likelihood = sum_of_squares / (2.0 * variance) + n * parameters.noise_std.ln();
        let log_prior = self
            .priors
            .ln_density(parameters.efficiency, parameters.infiltration_ach)
            + self.noise_prior.ln_density(parameters.noise_std);
        Ok(neg_log_likelihood - log_prior)
    }

    /// Run the optimisation from `initial`
    ///
    /// # Errors
    /// Returns an error if the solver fails to run.
    pub fn solve(self, initial: &Parameters, max_iters: u64) -> Result<Solution> {
        let start = initial.pack();
        let mut simplex = vec![start.clone()];
        for ii in 0..start.len() {
            let mut vertex = start.clone();
            vertex[ii] += SIMPLEX_STEP;
            simplex.push(vertex);
        }
        let solver = NelderMead::new(simplex).with_sd_tolerance(1e-10)?;

        let mut executor =
            Executor::new(self, solver).configure(|state| state.max_iters(max_iters));
        if log_enabled!(Level::Debug) {
            executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
        }
        let res = executor.run()?;

        let mut state = res.state().clone();
        let iterations = state.get_iter();
        let cost = state.get_best_cost();
        let best = state
            .take_best_param()
            .ok_or_else(|| Error::Solver("Nelder-Mead returned no parameters".into()))?;
        debug!("Nelder-Mead finished after {iterations} iterations at cost {cost}");

        Ok(Solution {
            parameters: Parameters::unpack(&best),
            cost,
            iterations,
            converged: iterations < max_iters,
        })
    }
}

impl CostFunction for Problem {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> ::std::result::Result<Self::Output, argmin::core::Error> {
        Ok(self.neg_log_posterior(&Parameters::unpack(p))?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use ndarray_rand::rand::{Rng, SeedableRng};
    use rand_isaac::Isaac64Rng;

    use super::{Parameters, Problem};
    use crate::config::KalmanConfig;
    use crate::distributions::ParameterPriors;
    use crate::model::MassBalance;
    use crate::regime::Regime;
    use crate::sample::Observation;

    fn model() -> MassBalance {
        MassBalance {
            filtration_ach: 10.0 / 3.0,
            deposition_ach: 0.1,
            erv_ach: 0.0,
        }
    }

    fn observations(efficiency: f64, infiltration_ach: f64, noise: f64) -> Vec<Observation> {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let timestamp = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let model = model();
        (0..200)
            .map(|_| {
                let outdoor_pm25 = rng.gen_range(5.0..150.0);
                let indoor_pm25 = model
                    .predict_indoor(efficiency, infiltration_ach, outdoor_pm25)
                    .unwrap()
                    * (1.0 + rng.gen_range(-noise..=noise));
                Observation {
                    timestamp,
                    indoor_pm25,
                    outdoor_pm25,
                    regime: Regime::Night,
                }
            })
            .collect()
    }

    fn problem(observations: &[Observation]) -> Problem {
        let priors = ParameterPriors::new(&KalmanConfig::default(), 0.6).unwrap();
        Problem::new(observations, model(), priors).unwrap()
    }

    #[test]
    fn parameters_survive_the_change_of_coordinates() {
        let parameters = Parameters {
            efficiency: 0.83,
            infiltration_ach: 0.42,
            noise_std: 1.7,
        };
        let unpacked = Parameters::unpack(&parameters.pack());
        approx::assert_relative_eq!(unpacked.efficiency, 0.83, max_relative = 1e-12);
        approx::assert_relative_eq!(unpacked.infiltration_ach, 0.42, max_relative = 1e-12);
        approx::assert_relative_eq!(unpacked.noise_std, 1.7, max_relative = 1e-12);
    }

    #[test]
    fn extreme_coordinates_stay_inside_the_support() {
        let unpacked = Parameters::unpack(&[800.0, -3.0, 0.0]);
        assert!(unpacked.efficiency < 1.0);
        let problem = problem(&observations(0.9, 0.6, 0.0));
        assert!(problem.neg_log_posterior(&unpacked).unwrap().is_finite());
    }

    #[test]
    fn the_truth_is_cheaper_than_a_wrong_ratio() {
        let problem = problem(&observations(0.9, 0.6, 0.02));
        let truth = Parameters {
            efficiency: 0.9,
            infiltration_ach: 0.6,
            noise_std: 0.2,
        };
        let wrong = Parameters {
            efficiency: 0.5,
            ..truth
        };
        assert!(
            problem.neg_log_posterior(&truth).unwrap() < problem.neg_log_posterior(&wrong).unwrap()
        );
    }

    #[test]
    fn solving_recovers_the_indoor_outdoor_ratio() {
        let problem = problem(&observations(0.9, 0.6, 0.02));
        let initial = Parameters {
            efficiency: 0.8,
            infiltration_ach: 0.6,
            noise_std: 1.0,
        };
        let solution = problem.solve(&initial, 2000).unwrap();
        let fitted = solution.parameters;

        let ratio = model()
            .io_ratio(fitted.efficiency, fitted.infiltration_ach)
            .unwrap();
        let expected = model().io_ratio(0.9, 0.6).unwrap();
        approx::assert_relative_eq!(ratio, expected, max_relative = 0.01);
        assert!((0.0..=1.0).contains(&fitted.efficiency));
        assert!(fitted.noise_std > 0.0 && fitted.noise_std < 1.0);
    }
}
