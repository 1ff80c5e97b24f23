//! Recursive estimation of filter efficiency and infiltration.
//!
//! The state `[efficiency, infiltration_ach]` is tracked with an extended Kalman filter over the
//! steady-state mass balance. Between samples the efficiency decays exponentially and both
//! parameters random-walk, so the covariance grows with elapsed time. Each accepted sample is a
//! scalar measurement of indoor PM2.5 whose noise variance is divided by a confidence that depends
//! on the regime: night samples, taken while the building is sealed, are trusted more.
//!
//! Steady-state data only pins down the indoor/outdoor ratio, a one-dimensional function of the
//! two parameters. The Beta and Gamma priors the filter starts from decide how a change in the
//! observed ratio is split between the filter and the building envelope.
use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use log::{debug, info};
use ndarray::{arr1, Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::{Config, KalmanConfig};
use crate::distributions::{ParameterPriors, Prior};
use crate::gate::{Gate, GateStats, Rejection};
use crate::math::outer_product;
use crate::model::MassBalance;
use crate::regime::{NightWindow, Regime};
use crate::sample::{Observation, Sample};
use crate::{Error, Result};

/// Lower bound on the infiltration estimate, per hour
pub const MIN_INFILTRATION_ACH: f64 = 1e-4;
/// Floor on the diagonal of the covariance
const MIN_VARIANCE: f64 = 1e-12;
const MILLISECONDS_PER_HOUR: f64 = 3.6e6;

/// A snapshot of the estimate
///
/// The covariance is ordered `[efficiency, infiltration_ach]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EstimatorState {
    pub efficiency: f64,
    pub infiltration_ach: f64,
    pub last_update_time: NaiveDateTime,
    pub sample_count: usize,
    pub covariance: Array2<f64>,
}

impl EstimatorState {
    /// The state before any sample has been seen, drawn from the prior moments
    #[must_use]
    pub fn from_priors(priors: &ParameterPriors, timestamp: NaiveDateTime) -> Self {
        Self {
            efficiency: priors.efficiency.mean(),
            infiltration_ach: priors.infiltration.mean(),
            last_update_time: timestamp,
            sample_count: 0,
            covariance: Array2::from_diag(&arr1(&[
                priors.efficiency.variance(),
                priors.infiltration.variance(),
            ])),
        }
    }

    #[must_use]
    pub fn mean(&self) -> Array1<f64> {
        arr1(&[self.efficiency, self.infiltration_ach])
    }

    #[must_use]
    pub fn efficiency_std(&self) -> f64 {
        self.covariance[[0, 0]].max(0.0).sqrt()
    }

    #[must_use]
    pub fn infiltration_std(&self) -> f64 {
        self.covariance[[1, 1]].max(0.0).sqrt()
    }

    /// Symmetric normal interval on the efficiency, `z` standard deviations either side
    ///
    /// Clamped to `[0, 1]`.
    #[must_use]
    pub fn efficiency_interval(&self, z: f64) -> (f64, f64) {
        let half_width = z.abs() * self.efficiency_std();
        (
            (self.efficiency - half_width).clamp(0.0, 1.0),
            (self.efficiency + half_width).clamp(0.0, 1.0),
        )
    }

    /// Write the state to a TOML file
    ///
    /// # Errors
    /// Returns an error if the state cannot be serialised or the file written.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string(self)?)?;
        info!("checkpointed estimator state to {}", path.display());
        Ok(())
    }

    /// Read a state previously written by [`EstimatorState::save`]
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or does not hold a valid state.
    pub fn load(path: &Path) -> Result<Self> {
        let state: Self = toml::from_str(&fs::read_to_string(path)?)?;
        if state.covariance.shape() != [2, 2] {
            return Err(Error::InvalidInput(format!(
                "covariance in {} has shape {:?}, expected [2, 2]",
                path.display(),
                state.covariance.shape()
            )));
        }
        Ok(state)
    }
}

/// Why an accepted sample did not change the estimate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The prediction does not depend on the parameters at this state
    DegenerateSensitivity,
    /// The regime is configured to carry no weight
    ZeroConfidence,
}

/// Diagnostics of an applied correction
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Innovation {
    pub observation: Observation,
    /// Indoor PM2.5 the model expected before the correction
    pub predicted_indoor_pm25: f64,
    /// Observed minus predicted indoor PM2.5
    pub residual: f64,
    /// Efficiency this sample alone implies at the infiltration estimate before the correction
    pub implied_efficiency: f64,
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Correction {
    Applied(EstimatorState, Innovation),
    Skipped(SkipReason),
}

/// The result of offering a sample to the estimator
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Outcome {
    Updated(Innovation),
    Rejected(Rejection),
    Skipped(SkipReason),
}

/// Weight given to a sample from the given regime
#[must_use]
pub fn confidence(config: &KalmanConfig, regime: Regime) -> f64 {
    let multiplier = match regime {
        Regime::Night => config.night_confidence_multiplier,
        Regime::Day => config.day_confidence_multiplier,
    };
    config.base_gain * multiplier
}

fn elapsed_hours(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let milliseconds = (to - from).num_milliseconds() as f64;
    milliseconds / MILLISECONDS_PER_HOUR
}

/// Advance the state to `timestamp`
///
/// The efficiency decays at `degradation_rate` per hour, its variance shrinking with it, and each
/// parameter gains its process noise per hour elapsed.
///
/// # Errors
/// Returns [`Error::OutOfOrder`] if `timestamp` precedes the last update.
pub fn predict(
    state: &EstimatorState,
    timestamp: NaiveDateTime,
    config: &KalmanConfig,
) -> Result<EstimatorState> {
    if timestamp < state.last_update_time {
        return Err(Error::OutOfOrder {
            previous: state.last_update_time,
            received: timestamp,
        });
    }
    let dt = elapsed_hours(state.last_update_time, timestamp);
    let decay = (-config.degradation_rate * dt).exp();

    let mut covariance = state.covariance.clone();
    covariance[[0, 0]] *= decay.powi(2);
    covariance[[0, 1]] *= decay;
    covariance[[1, 0]] *= decay;
    covariance[[0, 0]] += config.efficiency_process_noise * dt;
    covariance[[1, 1]] += config.infiltration_process_noise * dt;

    Ok(EstimatorState {
        efficiency: state.efficiency * decay,
        infiltration_ach: state.infiltration_ach,
        last_update_time: timestamp,
        sample_count: state.sample_count,
        covariance,
    })
}

/// Correct the state with one observation
///
/// The covariance is updated in Joseph form and re-symmetrised so it stays positive definite over
/// long runs. The corrected mean is clipped to the physical bounds.
///
/// # Errors
/// Returns [`Error::DegenerateModel`] if the mass balance cannot be evaluated at the state.
pub fn update(
    state: &EstimatorState,
    observation: &Observation,
    model: &MassBalance,
    config: &KalmanConfig,
) -> Result<Correction> {
    let confidence = confidence(config, observation.regime);
    if confidence <= 0.0 {
        return Ok(Correction::Skipped(SkipReason::ZeroConfidence));
    }

    let (efficiency, infiltration_ach) = (state.efficiency, state.infiltration_ach);
    let h = model.sensitivity(efficiency, infiltration_ach, observation.outdoor_pm25)?;
    if h.dot(&h).sqrt() < config.min_sensitivity {
        return Ok(Correction::Skipped(SkipReason::DegenerateSensitivity));
    }

    let predicted_indoor_pm25 =
        model.predict_indoor(efficiency, infiltration_ach, observation.outdoor_pm25)?;
    let residual = observation.indoor_pm25 - predicted_indoor_pm25;
    let measurement_variance = config.measurement_noise_std.powi(2) / confidence;

    let ph = state.covariance.dot(&h);
    let innovation_variance = h.dot(&ph) + measurement_variance;
    let gain = ph / innovation_variance;

    let mean = state.mean() + &gain * residual;

    let joseph = Array2::<f64>::eye(2) - outer_product(&gain, &h)?;
    let mut covariance = joseph.dot(&state.covariance).dot(&joseph.t())
        + outer_product(&gain, &gain)? * measurement_variance;
    covariance = (&covariance + &covariance.t()) / 2.0;
    for ii in 0..2 {
        covariance[[ii, ii]] = covariance[[ii, ii]].max(MIN_VARIANCE);
    }

    Ok(Correction::Applied(
        EstimatorState {
            efficiency: mean[0].clamp(0.0, 1.0),
            infiltration_ach: mean[1].max(MIN_INFILTRATION_ACH),
            last_update_time: observation.timestamp,
            sample_count: state.sample_count + 1,
            covariance,
        },
        Innovation {
            observation: *observation,
            predicted_indoor_pm25,
            residual,
            implied_efficiency: model.efficiency_from_ratio(
                observation.indoor_pm25 / observation.outdoor_pm25,
                infiltration_ach,
            ),
            confidence,
        },
    ))
}

/// Gate, predict and update over a stream of samples
///
/// The estimator is uninitialised until the first sample passes the gate, at which point it
/// starts from the priors and is corrected by that sample. A sample that is rejected or skipped
/// leaves the state untouched.
#[derive(Clone, Debug)]
pub struct RecursiveEstimator {
    config: KalmanConfig,
    model: MassBalance,
    priors: ParameterPriors,
    gate: Gate,
    window_hours: f64,
    state: Option<EstimatorState>,
    stats: GateStats,
    first_seen: Option<NaiveDateTime>,
    last_seen: Option<NaiveDateTime>,
}

impl RecursiveEstimator {
    /// # Errors
    /// Returns an error if the priors cannot be built from the configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let params = config.building_parameters();
        Ok(Self {
            config: config.kalman_filter.clone(),
            model: MassBalance::from(&params),
            priors: ParameterPriors::new(&config.kalman_filter, params.infiltration_prior_ach)?,
            gate: Gate::new(&config.kalman_filter, NightWindow::from(&config.analysis)),
            window_hours: config.analysis.observation_window_hours,
            state: None,
            stats: GateStats::default(),
            first_seen: None,
            last_seen: None,
        })
    }

    /// Resume from a checkpointed state
    ///
    /// # Errors
    /// Returns an error if the priors cannot be built from the configuration.
    pub fn restore(config: &Config, state: EstimatorState) -> Result<Self> {
        let mut estimator = Self::new(config)?;
        estimator.first_seen = Some(state.last_update_time);
        estimator.last_seen = Some(state.last_update_time);
        estimator.state = Some(state);
        Ok(estimator)
    }

    /// The current estimate, `None` until a sample has been accepted
    #[must_use]
    pub const fn estimate(&self) -> Option<&EstimatorState> {
        self.state.as_ref()
    }

    #[must_use]
    pub const fn stats(&self) -> &GateStats {
        &self.stats
    }

    #[must_use]
    pub const fn model(&self) -> &MassBalance {
        &self.model
    }

    #[must_use]
    pub const fn gate(&self) -> &Gate {
        &self.gate
    }

    #[must_use]
    pub fn into_state(self) -> Option<EstimatorState> {
        self.state
    }

    /// Offer the next sample
    ///
    /// # Errors
    /// Returns [`Error::OutOfOrder`] if the sample is older than one already seen, and
    /// [`Error::InsufficientData`] once the observation window has passed without any sample being
    /// accepted. Neither changes the state.
    pub fn observe(&mut self, sample: &Sample) -> Result<Outcome> {
        if let Some(previous) = self.last_seen {
            if sample.timestamp < previous {
                return Err(Error::OutOfOrder {
                    previous,
                    received: sample.timestamp,
                });
            }
        }
        self.last_seen = Some(sample.timestamp);
        let first_seen = *self.first_seen.get_or_insert(sample.timestamp);
        self.stats.seen += 1;

        let outcome = match self.gate.check(sample) {
            Err(rejection) => {
                debug!("sample at {} rejected: {rejection}", sample.timestamp);
                self.stats.record(rejection);
                Outcome::Rejected(rejection)
            }
            Ok(observation) => self.correct(&observation)?,
        };

        if self.state.is_none()
            && elapsed_hours(first_seen, sample.timestamp) >= self.window_hours
        {
            return Err(Error::InsufficientData {
                window_hours: self.window_hours,
                stats: self.stats.clone(),
            });
        }
        Ok(outcome)
    }

    fn correct(&mut self, observation: &Observation) -> Result<Outcome> {
        let prior = match &self.state {
            Some(state) => predict(state, observation.timestamp, &self.config)?,
            None => EstimatorState::from_priors(&self.priors, observation.timestamp),
        };

        match update(&prior, observation, &self.model, &self.config)? {
            Correction::Applied(state, innovation) => {
                if self.state.is_none() {
                    info!(
                        "estimator initialised at {} from efficiency {:.3}, infiltration {:.3} ACH",
                        observation.timestamp, prior.efficiency, prior.infiltration_ach
                    );
                }
                debug!(
                    "sample at {}: residual {:.3}, implied efficiency {:.3}",
                    observation.timestamp, innovation.residual, innovation.implied_efficiency
                );
                self.state = Some(state);
                self.stats.accepted += 1;
                Ok(Outcome::Updated(innovation))
            }
            Correction::Skipped(reason) => {
                debug!("sample at {} skipped: {reason:?}", observation.timestamp);
                self.stats.skipped += 1;
                Ok(Outcome::Skipped(reason))
            }
        }
    }
}
