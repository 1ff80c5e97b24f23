//! Seeded generation of sample streams from known building parameters.
//!
//! Outdoor PM2.5 is drawn uniformly, indoor PM2.5 follows from the mass balance with
//! multiplicative noise, and both are reported on the AQI scale as a sensor would.
use chrono::{Duration, NaiveDateTime};
use ndarray_rand::rand::{Rng, SeedableRng};
use ndarray_rand::rand_distr::{Distribution, Normal};
use rand_isaac::Isaac64Rng;

use crate::aqi::{pm25_to_aqi, MAX_PM25};
use crate::model::MassBalance;
use crate::regime::{NightWindow, Regime};
use crate::sample::Sample;
use crate::{Error, Result};

/// Multiplicative noise applied to the indoor concentration
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Noise {
    None,
    /// Uniform on `±fraction` of the true value
    Uniform(f64),
    /// Gaussian with standard deviation `fraction` of the true value
    Gaussian(f64),
}

#[derive(Clone, Debug)]
pub struct SyntheticGenerator {
    model: MassBalance,
    efficiency: f64,
    infiltration_ach: f64,
    /// Fractional efficiency loss per hour
    degradation_rate: f64,
    outdoor_pm25: (f64, f64),
    noise: Noise,
    interval: Duration,
    night: NightWindow,
    rng: Isaac64Rng,
}

impl SyntheticGenerator {
    #[must_use]
    pub fn new(model: MassBalance, efficiency: f64, infiltration_ach: f64, seed: u64) -> Self {
        Self {
            model,
            efficiency,
            infiltration_ach,
            degradation_rate: 0.0,
            outdoor_pm25: (5.0, 150.0),
            noise: Noise::Uniform(0.05),
            interval: Duration::minutes(5),
            night: NightWindow::default(),
            rng: Isaac64Rng::seed_from_u64(seed),
        }
    }

    #[must_use]
    pub fn with_outdoor_range(mut self, low: f64, high: f64) -> Self {
        self.outdoor_pm25 = (low, high);
        self
    }

    #[must_use]
    pub fn with_noise(mut self, noise: Noise) -> Self {
        self.noise = noise;
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_night_window(mut self, night: NightWindow) -> Self {
        self.night = night;
        self
    }

    #[must_use]
    pub fn with_degradation(mut self, rate_per_hour: f64) -> Self {
        self.degradation_rate = rate_per_hour;
        self
    }

    /// Produce `count` samples at the configured cadence from `start`
    ///
    /// When `regime` is given, time steps falling in the other regime are passed over, so the
    /// samples keep their wall-clock spacing but cluster in the requested hours.
    ///
    /// # Errors
    /// Returns an error if the outdoor range or noise level is invalid, or the interval is not
    /// positive.
    pub fn generate(
        &mut self,
        start: NaiveDateTime,
        count: usize,
        regime: Option<Regime>,
    ) -> Result<Vec<Sample>> {
        let (low, high) = self.outdoor_pm25;
        if !(0.0 <= low && low < high && high <= MAX_PM25) {
            return Err(Error::InvalidInput(format!(
                "outdoor range [{low}, {high}) must lie within [0, {MAX_PM25}]"
            )));
        }
        if self.interval <= Duration::zero() {
            return Err(Error::InvalidInput("sample interval must be positive".into()));
        }
        let gaussian = match self.noise {
            Noise::Gaussian(fraction) => Some(
                Normal::new(0.0, fraction).map_err(|e| Error::InvalidInput(e.to_string()))?,
            ),
            _ => None,
        };

        let mut samples = Vec::with_capacity(count);
        let mut timestamp = start;
        while samples.len() < count {
            if regime.map_or(true, |regime| self.night.classify(&timestamp) == regime) {
                #[allow(clippy::cast_precision_loss)]
                let hours = (timestamp - start).num_seconds() as f64 / 3600.0;
                let efficiency = self.efficiency * (-self.degradation_rate * hours).exp();

                let outdoor_pm25 = self.rng.gen_range(low..high);
                let clean =
                    self.model
                        .predict_indoor(efficiency, self.infiltration_ach, outdoor_pm25)?;
                let factor = match (self.noise, &gaussian) {
                    (Noise::Uniform(fraction), _) if fraction > 0.0 => {
                        1.0 + self.rng.gen_range(-fraction..fraction)
                    }
                    (Noise::Gaussian(_), Some(normal)) => 1.0 + normal.sample(&mut self.rng),
                    _ => 1.0,
                };
                let indoor_pm25 = (clean * factor).clamp(0.0, MAX_PM25);

                samples.push(Sample::new(
                    timestamp,
                    pm25_to_aqi(indoor_pm25)?,
                    pm25_to_aqi(outdoor_pm25)?,
                ));
            }
            timestamp += self.interval;
        }
        Ok(samples)
    }
}
