use log::{info, warn};
use serde::Serialize;

use crate::calibration::{BatchFit, FitResult};
use crate::classify::{recommend, should_alert, FilterTier, Recommendation};
use crate::config::Config;
use crate::estimator::{EstimatorState, Outcome, RecursiveEstimator};
use crate::gate::GateStats;
use crate::history::{efficiency_trend_per_month, DailyHistory, DailySummary};
use crate::regime::Regime;
use crate::sample::{prepare, Sample};
use crate::{Error, Result};

/// Width of the reported efficiency interval in standard deviations
const INTERVAL_Z: f64 = 1.96;

/// Everything a session produces, for hand-off to reporting
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub estimate: EstimatorState,
    pub efficiency_interval: (f64, f64),
    pub tier: FilterTier,
    /// Whether the efficiency is below the configured alert threshold
    pub alert: bool,
    pub fit: FitResult,
    pub stats: GateStats,
    pub daily: Vec<DailySummary>,
    pub trend_per_month: Option<f64>,
    pub recommendation: Recommendation,
}

/// A single analysis session over a batch of samples
#[derive(Clone, Debug)]
pub struct Analysis {
    config: Config,
}

impl Analysis {
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Run the estimator and the batch fit over `samples`
    ///
    /// Samples are sorted and de-duplicated first.
    ///
    /// # Errors
    /// Returns [`Error::InsufficientData`] if no sample in the whole batch could be learned from,
    /// and propagates failures of the batch fit.
    pub fn run(&self, samples: Vec<Sample>) -> Result<AnalysisReport> {
        let samples = prepare(samples);
        let params = self.config.building_parameters();
        info!(
            "building: {:.0} ft³, filtration {:.2} ACH, infiltration prior {:.2} ACH, \
             time constant {:.2} h",
            params.volume_cf,
            params.filtration_ach,
            params.infiltration_prior_ach,
            params.time_constant_hours()
        );
        let mut estimator = RecursiveEstimator::new(&self.config)?;
        let mut history = DailyHistory::new();
        let mut night = vec![];

        let mut window_exhausted = false;
        for sample in &samples {
            let outcome = match estimator.observe(sample) {
                Ok(outcome) => outcome,
                // later samples may still initialise the estimator
                Err(Error::InsufficientData { window_hours, .. }) => {
                    if !window_exhausted {
                        warn!(
                            "no usable samples in the first {window_hours} h, continuing at {}",
                            sample.timestamp
                        );
                        window_exhausted = true;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Outcome::Updated(innovation) = outcome {
                if let Some(state) = estimator.estimate() {
                    history.record(state, &innovation);
                }
                if innovation.observation.regime == Regime::Night {
                    night.push(innovation.observation);
                }
            }
        }

        let stats = estimator.stats().clone();
        let estimate = estimator
            .into_state()
            .ok_or_else(|| Error::InsufficientData {
                window_hours: self.config.analysis.observation_window_hours,
                stats: stats.clone(),
            })?;

        let fit = BatchFit::new(&self.config)?.fit(&night)?;
        let daily = history.days();
        let trend_per_month = efficiency_trend_per_month(&daily);

        let tier = self
            .config
            .alerts
            .efficiency_thresholds
            .classify(estimate.efficiency);
        let alert = should_alert(
            estimate.efficiency,
            self.config.analysis.efficiency_alert_threshold,
        );
        let recommendation = recommend(
            estimate.efficiency,
            fit.is_reliable().then_some(fit.r_squared),
            trend_per_month,
            &self.config.alerts,
        );

        info!(
            "analysed {} samples ({} accepted, {} rejected): efficiency {:.3} ({tier}), \
             infiltration {:.3} ACH",
            stats.seen,
            stats.accepted,
            stats.rejected(),
            estimate.efficiency,
            estimate.infiltration_ach
        );

        Ok(AnalysisReport {
            efficiency_interval: estimate.efficiency_interval(INTERVAL_Z),
            estimate,
            tier,
            alert,
            fit,
            stats,
            daily,
            trend_per_month,
            recommendation,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::Analysis;
    use crate::config::Config;
    use crate::model::MassBalance;
    use crate::sample::Sample;
    use crate::synthetic::{Noise, SyntheticGenerator};
    use crate::Error;

    #[test]
    fn sessions_without_usable_samples_report_insufficient_data() {
        let timestamp = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(23, 0, 0)
            .unwrap();
        let samples = vec![
            Sample::new(timestamp, 5.0, 6.0),
            Sample::new(timestamp, f64::NAN, 60.0),
        ];

        let analysis = Analysis::new(Config::default()).unwrap();
        match analysis.run(samples) {
            Err(Error::InsufficientData { stats, .. }) => {
                // the duplicate timestamp is dropped, keeping the last
                assert_eq!(stats.seen, 1);
                assert_eq!(stats.invalid_input, 1);
            }
            other => panic!("expected insufficient data, got {other:?}"),
        }
    }

    #[test]
    fn usable_data_after_a_long_clean_air_stretch_is_still_learned_from() {
        let mut config = Config::default();
        config.kalman_filter.min_indoor_pm25_for_learning = 1.0;
        config.kalman_filter.min_outdoor_pm25_for_learning = 5.0;
        let window_hours = config.analysis.observation_window_hours;

        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        // hourly readings too clean to learn from, for a day longer than the window
        let clean_hours = 360;
        assert!(window_hours < f64::from(clean_hours));
        let mut samples = (0..clean_hours)
            .map(|hour| Sample::new(start + Duration::hours(i64::from(hour)), 2.0, 3.0))
            .collect::<Vec<_>>();

        let model = MassBalance::from(&config.building_parameters());
        samples.extend(
            SyntheticGenerator::new(model, 0.85, 0.5, 40)
                .with_noise(Noise::Uniform(0.02))
                .with_outdoor_range(20.0, 150.0)
                .generate(start + Duration::hours(i64::from(clean_hours)), 100, None)
                .unwrap(),
        );

        let report = Analysis::new(config).unwrap().run(samples).unwrap();
        assert_eq!(report.stats.seen, 460);
        assert_eq!(report.stats.weak_outdoor_signal, 360);
        assert!(report.stats.accepted > 90);
        assert!(report.estimate.sample_count > 90);
    }

    #[test]
    fn empty_sessions_report_insufficient_data() {
        let analysis = Analysis::new(Config::default()).unwrap();
        assert!(matches!(
            analysis.run(vec![]),
            Err(Error::InsufficientData { .. })
        ));
    }

    #[test]
    fn invalid_configurations_are_refused() {
        let mut config = Config::default();
        config.building.area_sq_ft = -1.0;
        assert!(Analysis::new(config).is_err());
    }
}
