use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{AlertConfig, EfficiencyThresholds};

/// Replacement warnings are raised when the filter is expected to cross the declining threshold
/// within this many days
const REPLACEMENT_NOTICE_DAYS: f64 = 30.0;
const DAYS_PER_MONTH: f64 = 30.0;

/// Qualitative condition of the filter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterTier {
    Excellent,
    Good,
    Declining,
    Poor,
}

impl fmt::Display for FilterTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tier = match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Declining => "declining",
            Self::Poor => "poor",
        };
        f.write_str(tier)
    }
}

impl EfficiencyThresholds {
    /// The highest tier whose threshold `efficiency` reaches
    #[must_use]
    pub fn classify(&self, efficiency: f64) -> FilterTier {
        if efficiency >= self.excellent {
            FilterTier::Excellent
        } else if efficiency >= self.good {
            FilterTier::Good
        } else if efficiency >= self.declining {
            FilterTier::Declining
        } else {
            FilterTier::Poor
        }
    }
}

/// Classify against the default thresholds
#[must_use]
pub fn classify(efficiency: f64) -> FilterTier {
    EfficiencyThresholds::default().classify(efficiency)
}

#[must_use]
pub fn should_alert(efficiency: f64, threshold: f64) -> bool {
    efficiency < threshold
}

/// What to tell the occupant
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub tier: FilterTier,
    pub alerts: Vec<String>,
    pub actions: Vec<String>,
    /// Days until the efficiency falls to the declining threshold at the current trend
    pub days_to_replacement: Option<f64>,
}

/// Turn an efficiency estimate into alerts and actions
///
/// `r_squared` is the goodness of fit of the batch calibration, if one was possible, and
/// `trend_per_month` the change in efficiency per 30 days, if enough history exists.
#[must_use]
pub fn recommend(
    efficiency: f64,
    r_squared: Option<f64>,
    trend_per_month: Option<f64>,
    config: &AlertConfig,
) -> Recommendation {
    let thresholds = &config.efficiency_thresholds;
    let tier = thresholds.classify(efficiency);
    let mut alerts = vec![];
    let mut actions = vec![];

    if let Some(r_squared) = r_squared.filter(|r_squared| *r_squared < config.min_confidence) {
        alerts.push(format!(
            "Analysis confidence is low (R² = {r_squared:.2}). Results may be unreliable, check \
             for data quality issues."
        ));
    }

    match tier {
        FilterTier::Excellent => {
            actions.push("Filter performing excellently. Continue regular monitoring.".into());
        }
        FilterTier::Good => {
            actions.push("Filter performance is good. Monitor for degradation trends.".into());
        }
        FilterTier::Declining => {
            alerts.push(format!(
                "Filter efficiency declining to {:.1}%. Consider replacement soon.",
                efficiency * 100.0
            ));
            actions.push("Schedule filter replacement within 2-4 weeks.".into());
        }
        FilterTier::Poor => {
            let severity = if efficiency < thresholds.poor {
                "very low"
            } else {
                "low"
            };
            alerts.push(format!(
                "Filter efficiency {severity} at {:.1}%. Replace immediately.",
                efficiency * 100.0
            ));
            actions.push("Replace filter as soon as possible.".into());
        }
    }

    let degradation_per_day = trend_per_month
        .map(|trend| -trend / DAYS_PER_MONTH)
        .filter(|rate| *rate > 0.0);
    let days_to_replacement = degradation_per_day
        .filter(|_| efficiency > thresholds.declining)
        .map(|rate| (efficiency - thresholds.declining) / rate);

    if let Some(days) = days_to_replacement {
        if days < REPLACEMENT_NOTICE_DAYS {
            alerts.push(format!(
                "Filter estimated to reach replacement threshold in {days:.0} days."
            ));
            actions.push("Order replacement filter now.".into());
        } else {
            actions.push(format!(
                "Filter replacement recommended in approximately {days:.0} days."
            ));
        }
    }

    Recommendation {
        tier,
        alerts,
        actions,
        days_to_replacement,
    }
}
