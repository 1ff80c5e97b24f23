//! Validity gate in front of the estimator.
//!
//! The mass balance only explains indoor particulate that came in from outdoors. The gate keeps
//! out samples where that cannot be trusted: malformed readings, too little outdoor signal to learn
//! from, and indoor concentrations high enough relative to outdoors that an indoor source must be
//! running. Rejections are counted, never fatal.
use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::KalmanConfig;
use crate::math::quantile;
use crate::regime::NightWindow;
use crate::sample::{Observation, Sample};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rejection {
    /// A reading is missing, negative, non-finite or outside the AQI scale
    InvalidInput,
    WeakOutdoorSignal,
    WeakIndoorSignal,
    /// The indoor/outdoor ratio is too high to be explained by infiltration alone
    IndoorSource,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::InvalidInput => "invalid reading",
            Self::WeakOutdoorSignal => "outdoor concentration too low to learn from",
            Self::WeakIndoorSignal => "indoor concentration too low to learn from",
            Self::IndoorSource => "indoor source suspected",
        };
        f.write_str(reason)
    }
}

/// Running tally of what happened to each sample offered to the estimator
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStats {
    pub seen: usize,
    pub accepted: usize,
    pub invalid_input: usize,
    pub weak_outdoor_signal: usize,
    pub weak_indoor_signal: usize,
    pub indoor_source: usize,
    /// Accepted by the gate but carrying no information about the parameters
    pub skipped: usize,
}

impl GateStats {
    pub(crate) fn record(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::InvalidInput => self.invalid_input += 1,
            Rejection::WeakOutdoorSignal => self.weak_outdoor_signal += 1,
            Rejection::WeakIndoorSignal => self.weak_indoor_signal += 1,
            Rejection::IndoorSource => self.indoor_source += 1,
        }
    }

    #[must_use]
    pub const fn rejected(&self) -> usize {
        self.invalid_input + self.weak_outdoor_signal + self.weak_indoor_signal + self.indoor_source
    }
}

/// Thresholds below or above which a sample is not used for learning
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gate {
    pub min_indoor_pm25: f64,
    pub min_outdoor_pm25: f64,
    pub max_ratio: f64,
    pub night: NightWindow,
}

impl Gate {
    #[must_use]
    pub fn new(config: &KalmanConfig, night: NightWindow) -> Self {
        Self {
            min_indoor_pm25: config.min_indoor_pm25_for_learning,
            min_outdoor_pm25: config.min_outdoor_pm25_for_learning,
            max_ratio: config.max_ratio_for_learning,
            night,
        }
    }

    /// Convert and check a sample
    ///
    /// # Errors
    /// Returns the reason the sample cannot be learned from.
    pub fn check(&self, sample: &Sample) -> Result<Observation, Rejection> {
        let (indoor_pm25, outdoor_pm25) = sample.to_pm25().map_err(|e| {
            debug!("rejecting sample: {e}");
            Rejection::InvalidInput
        })?;

        if outdoor_pm25 < self.min_outdoor_pm25 || outdoor_pm25 <= 0.0 {
            return Err(Rejection::WeakOutdoorSignal);
        }
        if indoor_pm25 < self.min_indoor_pm25 {
            return Err(Rejection::WeakIndoorSignal);
        }
        let ratio = indoor_pm25 / outdoor_pm25;
        if ratio >= self.max_ratio {
            warn!(
                "indoor/outdoor ratio {ratio:.2} at {} exceeds {:.2}, indoor source suspected",
                sample.timestamp, self.max_ratio
            );
            return Err(Rejection::IndoorSource);
        }

        Ok(Observation {
            timestamp: sample.timestamp,
            indoor_pm25,
            outdoor_pm25,
            regime: self.night.classify(&sample.timestamp),
        })
    }
}

/// Flag observations whose indoor/outdoor ratio lies outside the interquartile fences
///
/// The fences sit `threshold` interquartile ranges beyond the first and third quartiles. Fewer than
/// four observations are never flagged.
#[must_use]
pub fn ratio_outliers(observations: &[Observation], threshold: f64) -> Vec<bool> {
    if observations.len() < 4 {
        return vec![false; observations.len()];
    }
    let mut ratios = observations.iter().map(Observation::ratio).collect::<Vec<_>>();
    ratios.sort_by(f64::total_cmp);

    let q1 = quantile(&ratios, 0.25);
    let q3 = quantile(&ratios, 0.75);
    let iqr = q3 - q1;
    let (lower, upper) = (q1 - threshold * iqr, q3 + threshold * iqr);

    observations
        .iter()
        .map(|observation| {
            let ratio = observation.ratio();
            ratio < lower || ratio > upper
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{ratio_outliers, Gate, GateStats, Rejection};
    use crate::aqi::pm25_to_aqi;
    use crate::config::KalmanConfig;
    use crate::regime::{NightWindow, Regime};
    use crate::sample::{Observation, Sample};

    fn sample(hour: u32, indoor_pm25: f64, outdoor_pm25: f64) -> Sample {
        Sample::new(
            NaiveDate::from_ymd_opt(2024, 2, 1)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
            pm25_to_aqi(indoor_pm25).unwrap(),
            pm25_to_aqi(outdoor_pm25).unwrap(),
        )
    }

    fn gate() -> Gate {
        Gate::new(&KalmanConfig::default(), NightWindow::default())
    }

    #[test]
    fn strong_clean_samples_pass_with_their_regime() {
        let observation = gate().check(&sample(23, 15.0, 60.0)).unwrap();
        assert_eq!(observation.regime, Regime::Night);
        approx::assert_relative_eq!(observation.indoor_pm25, 15.0, max_relative = 1e-9);
        approx::assert_relative_eq!(observation.outdoor_pm25, 60.0, max_relative = 1e-9);

        let observation = gate().check(&sample(14, 15.0, 60.0)).unwrap();
        assert_eq!(observation.regime, Regime::Day);
    }

    #[test]
    fn each_failure_is_attributed() {
        let gate = gate();
        assert_eq!(gate.check(&sample(1, 15.0, 20.0)), Err(Rejection::WeakOutdoorSignal));
        assert_eq!(gate.check(&sample(1, 5.0, 60.0)), Err(Rejection::WeakIndoorSignal));
        assert_eq!(gate.check(&sample(1, 70.0, 60.0)), Err(Rejection::IndoorSource));

        let mut broken = sample(1, 15.0, 60.0);
        broken.indoor_aqi = f64::NAN;
        assert_eq!(gate.check(&broken), Err(Rejection::InvalidInput));
        broken.indoor_aqi = -3.0;
        assert_eq!(gate.check(&broken), Err(Rejection::InvalidInput));
    }

    #[test]
    fn stats_count_rejections_by_reason() {
        let mut stats = GateStats::default();
        stats.record(Rejection::IndoorSource);
        stats.record(Rejection::IndoorSource);
        stats.record(Rejection::WeakIndoorSignal);
        assert_eq!(stats.indoor_source, 2);
        assert_eq!(stats.rejected(), 3);
    }

    #[test]
    fn isolated_ratio_spikes_are_flagged() {
        let timestamp = NaiveDate::from_ymd_opt(2024, 2, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let observations = (0..20)
            .map(|ii| {
                let indoor_pm25 = if ii == 7 { 55.0 } else { 10.0 + f64::from(ii % 3) };
                Observation {
                    timestamp,
                    indoor_pm25,
                    outdoor_pm25: 60.0,
                    regime: Regime::Night,
                }
            })
            .collect::<Vec<_>>();

        let flags = ratio_outliers(&observations, 2.0);
        assert_eq!(flags.iter().filter(|flag| **flag).count(), 1);
        assert!(flags[7]);
    }
}
