//! Steady-state particulate mass balance for a single well-mixed zone.
//!
//! Outdoor air enters by infiltration (and through the ERV when one runs) and is removed by
//! exfiltration, the HVAC filter and deposition onto surfaces. At steady state
//!
//! $$
//!     C_{in} = \frac{\lambda C_{out}}{\lambda + \eta F + d}
//! $$
//!
//! where $\lambda$ is the outdoor air exchange rate, $\eta$ the filter efficiency, $F$ the
//! recirculation rate through the filter and $d$ the deposition rate, all in air changes per hour.
use ndarray::{arr1, Array1};

use crate::config::BuildingParameters;
use crate::{Error, Result};

/// Smallest total removal rate the balance is evaluated at, per hour
pub const MIN_REMOVAL_RATE: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MassBalance {
    pub filtration_ach: f64,
    pub deposition_ach: f64,
    /// Outdoor air that bypasses the filter in addition to natural infiltration
    pub erv_ach: f64,
}

impl From<&BuildingParameters> for MassBalance {
    fn from(params: &BuildingParameters) -> Self {
        Self {
            filtration_ach: params.filtration_ach,
            deposition_ach: params.deposition_ach,
            erv_ach: params.erv_ach,
        }
    }
}

impl MassBalance {
    fn outdoor_air(&self, infiltration_ach: f64) -> f64 {
        infiltration_ach + self.erv_ach
    }

    fn removal_rate(&self, efficiency: f64, infiltration_ach: f64) -> Result<f64> {
        let total = self.outdoor_air(infiltration_ach)
            + efficiency * self.filtration_ach
            + self.deposition_ach;
        if total > MIN_REMOVAL_RATE {
            Ok(total)
        } else {
            Err(Error::DegenerateModel(total))
        }
    }

    /// Steady-state indoor/outdoor concentration ratio
    ///
    /// # Errors
    /// Returns [`Error::DegenerateModel`] when the total removal rate is not positive.
    pub fn io_ratio(&self, efficiency: f64, infiltration_ach: f64) -> Result<f64> {
        Ok(self.outdoor_air(infiltration_ach) / self.removal_rate(efficiency, infiltration_ach)?)
    }

    /// Expected indoor PM2.5 for the given outdoor concentration
    ///
    /// # Errors
    /// Returns [`Error::DegenerateModel`] when the total removal rate is not positive.
    pub fn predict_indoor(
        &self,
        efficiency: f64,
        infiltration_ach: f64,
        outdoor_pm25: f64,
    ) -> Result<f64> {
        Ok(self.io_ratio(efficiency, infiltration_ach)? * outdoor_pm25)
    }

    /// Partial derivatives of the predicted indoor concentration with respect to
    /// `[efficiency, infiltration_ach]`
    ///
    /// # Errors
    /// Returns [`Error::DegenerateModel`] when the total removal rate is not positive.
    pub fn sensitivity(
        &self,
        efficiency: f64,
        infiltration_ach: f64,
        outdoor_pm25: f64,
    ) -> Result<Array1<f64>> {
        let denominator = self.removal_rate(efficiency, infiltration_ach)?.powi(2);
        let d_efficiency =
            -self.outdoor_air(infiltration_ach) * self.filtration_ach * outdoor_pm25 / denominator;
        let d_infiltration = outdoor_pm25
            * (efficiency * self.filtration_ach + self.deposition_ach)
            / denominator;
        Ok(arr1(&[d_efficiency, d_infiltration]))
    }

    /// Filter efficiency implied by an observed indoor/outdoor ratio at a given infiltration rate
    ///
    /// Clamped to `[0, 1]`. Returns zero when the ratio or the filtration rate is not positive, as
    /// the balance cannot be inverted there.
    #[must_use]
    pub fn efficiency_from_ratio(&self, ratio: f64, infiltration_ach: f64) -> f64 {
        if ratio <= 0.0 || self.filtration_ach <= 0.0 || !ratio.is_finite() {
            return 0.0;
        }
        let outdoor_air = self.outdoor_air(infiltration_ach);
        let efficiency = (outdoor_air * (1.0 - ratio) / ratio - self.deposition_ach)
            / self.filtration_ach;
        efficiency.clamp(0.0, 1.0)
    }
}
