use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const CUBIC_FEET_TO_CUBIC_METRES: f64 = 0.028_316_8;
const MINUTES_PER_HOUR: f64 = 60.0;

/// Session configuration
///
/// The section layout follows the on-disk configuration file. Every section falls back to its
/// defaults, so a file only needs to name the values that differ from them.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub building: BuildingConfig,
    pub hvac: HvacConfig,
    pub kalman_filter: KalmanConfig,
    pub analysis: AnalysisConfig,
    pub alerts: AlertConfig,
}

impl Config {
    /// Read and validate a configuration file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid TOML or fails
    /// [`Config::validate`].
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        info!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Write the configuration as TOML
    ///
    /// # Errors
    /// Returns an error if serialisation or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string(self)?)?;
        Ok(())
    }

    /// Check the values the physical model cannot work without
    ///
    /// # Errors
    /// Returns [`Error::Config`] naming the first offending value.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("building.area_sq_ft", self.building.area_sq_ft),
            ("building.ceiling_height_ft", self.building.ceiling_height_ft),
            ("hvac.flow_rate_cfm", self.hvac.flow_rate_cfm),
            (
                "kalman_filter.measurement_noise_std",
                self.kalman_filter.measurement_noise_std,
            ),
            (
                "kalman_filter.efficiency_prior_alpha",
                self.kalman_filter.efficiency_prior_alpha,
            ),
            (
                "kalman_filter.efficiency_prior_beta",
                self.kalman_filter.efficiency_prior_beta,
            ),
            (
                "kalman_filter.infiltration_prior_shape",
                self.kalman_filter.infiltration_prior_shape,
            ),
            (
                "analysis.observation_window_hours",
                self.analysis.observation_window_hours,
            ),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!("{name} must be positive, got {value}")));
            }
        }

        let non_negative = [
            ("hvac.deposition_rate_percent", self.hvac.deposition_rate_percent),
            ("hvac.erv_flow_rate_cfm", self.hvac.erv_flow_rate_cfm),
            ("kalman_filter.degradation_rate", self.kalman_filter.degradation_rate),
            (
                "kalman_filter.efficiency_process_noise",
                self.kalman_filter.efficiency_process_noise,
            ),
            (
                "kalman_filter.infiltration_process_noise",
                self.kalman_filter.infiltration_process_noise,
            ),
            (
                "kalman_filter.day_confidence_multiplier",
                self.kalman_filter.day_confidence_multiplier,
            ),
            (
                "kalman_filter.night_confidence_multiplier",
                self.kalman_filter.night_confidence_multiplier,
            ),
            ("kalman_filter.base_gain", self.kalman_filter.base_gain),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::Config(format!(
                    "{name} must not be negative, got {value}"
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.hvac.erv_runtime_fraction) {
            return Err(Error::Config(format!(
                "hvac.erv_runtime_fraction must lie in [0, 1], got {}",
                self.hvac.erv_runtime_fraction
            )));
        }
        if let Some(ach) = self.building.infiltration_ach {
            if !(ach.is_finite() && ach > 0.0) {
                return Err(Error::Config(format!(
                    "building.infiltration_ach must be positive, got {ach}"
                )));
            }
        }
        if self.analysis.night_start_hour > 23 || self.analysis.night_end_hour > 23 {
            return Err(Error::Config("night hours must lie in 0..=23".into()));
        }

        let t = &self.alerts.efficiency_thresholds;
        if !(t.excellent >= t.good && t.good >= t.declining && t.declining >= t.poor) {
            return Err(Error::Config(
                "alerts.efficiency_thresholds must be ordered excellent >= good >= declining >= poor"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Derived parameters of the building envelope and air handler
    #[must_use]
    pub fn building_parameters(&self) -> BuildingParameters {
        BuildingParameters::new(&self.building, &self.hvac)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConstructionType {
    Tight,
    #[default]
    Average,
    Leaky,
}

impl ConstructionType {
    /// Typical natural infiltration for a 20 year old building, in ACH
    #[must_use]
    pub const fn base_infiltration_ach(self) -> f64 {
        match self {
            Self::Tight => 0.3,
            Self::Average => 0.5,
            Self::Leaky => 0.8,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BuildingConfig {
    pub area_sq_ft: f64,
    pub ceiling_height_ft: f64,
    pub construction_type: ConstructionType,
    pub age_years: f64,
    /// Measured infiltration (eg: from a blower door test), overrides the construction estimate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infiltration_ach: Option<f64>,
}

impl Default for BuildingConfig {
    fn default() -> Self {
        Self {
            area_sq_ft: 3000.0,
            ceiling_height_ft: 9.0,
            construction_type: ConstructionType::Average,
            age_years: 20.0,
            infiltration_ach: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HvacConfig {
    pub flow_rate_cfm: f64,
    pub erv_enabled: bool,
    pub erv_flow_rate_cfm: f64,
    pub erv_runtime_fraction: f64,
    /// Deposition onto indoor surfaces, as a percentage of the volume per hour
    pub deposition_rate_percent: f64,
}

impl Default for HvacConfig {
    fn default() -> Self {
        Self {
            flow_rate_cfm: 1500.0,
            erv_enabled: false,
            erv_flow_rate_cfm: 170.0,
            erv_runtime_fraction: 0.9,
            deposition_rate_percent: 2.0,
        }
    }
}

/// Tuning of the recursive estimator and its learning gate
///
/// Rates are per hour, the time unit of the estimator.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct KalmanConfig {
    pub day_confidence_multiplier: f64,
    pub night_confidence_multiplier: f64,
    pub base_gain: f64,
    pub min_indoor_pm25_for_learning: f64,
    pub min_outdoor_pm25_for_learning: f64,
    pub max_ratio_for_learning: f64,
    /// Fractional efficiency loss per hour
    pub degradation_rate: f64,
    /// Variance added to the efficiency per hour
    pub efficiency_process_noise: f64,
    /// Variance added to the infiltration (ACH²) per hour
    pub infiltration_process_noise: f64,
    /// Indoor PM2.5 sensor noise, µg/m³
    pub measurement_noise_std: f64,
    pub efficiency_prior_alpha: f64,
    pub efficiency_prior_beta: f64,
    /// Gamma shape of the infiltration prior, whose mean is the building estimate
    pub infiltration_prior_shape: f64,
    /// Samples whose sensitivity norm falls below this carry no information
    pub min_sensitivity: f64,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            day_confidence_multiplier: 0.5,
            night_confidence_multiplier: 2.0,
            base_gain: 1.0,
            min_indoor_pm25_for_learning: 10.0,
            min_outdoor_pm25_for_learning: 30.0,
            max_ratio_for_learning: 1.0,
            degradation_rate: 5e-5,
            efficiency_process_noise: 1e-6,
            infiltration_process_noise: 1e-6,
            measurement_noise_std: 5.0,
            efficiency_prior_alpha: 8.0,
            efficiency_prior_beta: 2.0,
            infiltration_prior_shape: 50.0,
            min_sensitivity: 1e-9,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub night_start_hour: u32,
    pub night_end_hour: u32,
    pub min_data_points: usize,
    /// Interquartile fence multiplier for I/O ratio outliers in the batch fit
    pub outlier_threshold: f64,
    pub min_r_squared: f64,
    pub efficiency_alert_threshold: f64,
    /// How long the estimator may go without a usable sample before it reports failure
    pub observation_window_hours: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            night_start_hour: 22,
            night_end_hour: 8,
            min_data_points: 10,
            outlier_threshold: 2.0,
            min_r_squared: 0.5,
            efficiency_alert_threshold: 0.7,
            observation_window_hours: 14.0 * 24.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    pub min_confidence: f64,
    pub efficiency_thresholds: EfficiencyThresholds,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            efficiency_thresholds: EfficiencyThresholds::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EfficiencyThresholds {
    pub excellent: f64,
    pub good: f64,
    pub declining: f64,
    pub poor: f64,
}

impl Default for EfficiencyThresholds {
    fn default() -> Self {
        Self {
            excellent: 0.85,
            good: 0.70,
            declining: 0.50,
            poor: 0.30,
        }
    }
}

/// Rates derived from the building and HVAC configuration, all in air changes per hour
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BuildingParameters {
    pub volume_cf: f64,
    pub volume_m3: f64,
    pub filtration_ach: f64,
    pub deposition_ach: f64,
    /// Outdoor air brought in by the ERV, which bypasses the filter
    pub erv_ach: f64,
    /// Natural infiltration expected from the construction, the estimator's prior
    pub infiltration_prior_ach: f64,
}

impl BuildingParameters {
    #[must_use]
    pub fn new(building: &BuildingConfig, hvac: &HvacConfig) -> Self {
        let volume_cf = building.area_sq_ft * building.ceiling_height_ft;
        let per_volume = |cfm: f64| cfm * MINUTES_PER_HOUR / volume_cf;

        let erv_ach = if hvac.erv_enabled {
            per_volume(hvac.erv_flow_rate_cfm * hvac.erv_runtime_fraction)
        } else {
            0.0
        };

        let infiltration_prior_ach = building.infiltration_ach.unwrap_or_else(|| {
            let age_factor = (1.0 + (building.age_years - 20.0) * 0.01).clamp(0.5, 2.0);
            building.construction_type.base_infiltration_ach() * age_factor
        });

        Self {
            volume_cf,
            volume_m3: volume_cf * CUBIC_FEET_TO_CUBIC_METRES,
            filtration_ach: per_volume(hvac.flow_rate_cfm),
            deposition_ach: hvac.deposition_rate_percent / 100.0,
            erv_ach,
            infiltration_prior_ach,
        }
    }

    /// Time constant of the building at the prior infiltration and a perfect filter, in hours
    #[must_use]
    pub fn time_constant_hours(&self) -> f64 {
        1.0 / (self.infiltration_prior_ach
            + self.erv_ach
            + self.filtration_ach
            + self.deposition_ach)
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::{BuildingParameters, Config, ConstructionType};

    #[test]
    fn defaults_derive_the_expected_rates() {
        let params = Config::default().building_parameters();
        // 1500 CFM through 27 000 ft³
        approx::assert_relative_eq!(params.filtration_ach, 10.0 / 3.0, max_relative = 1e-12);
        approx::assert_relative_eq!(params.deposition_ach, 0.02);
        approx::assert_relative_eq!(params.infiltration_prior_ach, 0.5);
        approx::assert_relative_eq!(params.erv_ach, 0.0);
        approx::assert_relative_eq!(params.volume_m3, 27_000.0 * 0.028_316_8, max_relative = 1e-12);
    }

    #[test]
    fn the_time_constant_counts_every_removal_path() {
        let params = Config::default().building_parameters();
        approx::assert_relative_eq!(
            params.time_constant_hours(),
            1.0 / (0.5 + 10.0 / 3.0 + 0.02),
            max_relative = 1e-12
        );
    }

    #[test]
    fn erv_contributes_in_proportion_to_runtime() {
        let mut config = Config::default();
        config.hvac.erv_enabled = true;
        config.hvac.erv_flow_rate_cfm = 170.0;
        config.hvac.erv_runtime_fraction = 0.9;
        let params = config.building_parameters();
        approx::assert_relative_eq!(
            params.erv_ach,
            170.0 * 0.9 * 60.0 / 27_000.0,
            max_relative = 1e-12
        );

        config.hvac.erv_runtime_fraction = 0.0;
        approx::assert_relative_eq!(config.building_parameters().erv_ach, 0.0);
    }

    #[test]
    fn infiltration_prior_follows_construction_and_age() {
        let mut config = Config::default();
        config.building.construction_type = ConstructionType::Leaky;
        config.building.age_years = 40.0;
        let params = BuildingParameters::new(&config.building, &config.hvac);
        approx::assert_relative_eq!(params.infiltration_prior_ach, 0.96, max_relative = 1e-12);

        // age factor is clamped
        config.building.age_years = 500.0;
        approx::assert_relative_eq!(
            config.building_parameters().infiltration_prior_ach,
            1.6,
            max_relative = 1e-12
        );

        config.building.infiltration_ach = Some(0.35);
        approx::assert_relative_eq!(config.building_parameters().infiltration_prior_ach, 0.35);
    }

    #[test]
    fn partial_files_merge_with_defaults() {
        let text = r#"
            [building]
            construction_type = "tight"

            [hvac]
            flow_rate_cfm = 1200.0

            [kalman_filter]
            night_confidence_multiplier = 3.0
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.building.construction_type, ConstructionType::Tight);
        approx::assert_relative_eq!(config.building.area_sq_ft, 3000.0);
        approx::assert_relative_eq!(config.hvac.flow_rate_cfm, 1200.0);
        approx::assert_relative_eq!(config.kalman_filter.night_confidence_multiplier, 3.0);
        approx::assert_relative_eq!(config.kalman_filter.day_confidence_multiplier, 0.5);
        assert_eq!(config.analysis.night_start_hour, 22);
    }

    #[test]
    fn invalid_values_are_reported() {
        let mut config = Config::default();
        config.building.area_sq_ft = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.hvac.erv_runtime_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.alerts.efficiency_thresholds.good = 0.9;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.analysis.night_end_hour = 24;
        assert!(config.validate().is_err());
    }

    #[test]
    fn configuration_survives_a_trip_to_disk() {
        let tmp_dir = TempDir::new("configuration_survives_a_trip_to_disk").unwrap();
        let path = tmp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.building.infiltration_ach = Some(0.42);
        config.hvac.erv_enabled = true;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_files_are_a_configuration_error() {
        let tmp_dir = TempDir::new("missing_files_are_a_configuration_error").unwrap();
        assert!(Config::from_file(&tmp_dir.path().join("absent.toml")).is_err());
    }
}
