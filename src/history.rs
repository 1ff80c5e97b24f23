use chrono::{NaiveDate, NaiveDateTime};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::estimator::{EstimatorState, Innovation};
use crate::math::slope;

/// Days with fewer updates than this are left out of the summary
pub const MIN_UPDATES_PER_DAY: usize = 3;
const DAYS_PER_MONTH: f64 = 30.0;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Entry {
    timestamp: NaiveDateTime,
    efficiency: f64,
    infiltration_ach: f64,
    predicted_indoor_pm25: f64,
    actual_indoor_pm25: f64,
}

/// Averages over one calendar day of estimator updates
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub efficiency: f64,
    pub infiltration_ach: f64,
    pub predicted_indoor_pm25: f64,
    pub actual_indoor_pm25: f64,
    /// Mean absolute one-step prediction error in µg/m³
    pub mean_absolute_error: f64,
    pub updates: usize,
}

/// Record of every applied update, summarised by day
#[derive(Clone, Debug, Default)]
pub struct DailyHistory {
    entries: Vec<Entry>,
}

impl DailyHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the state reached by an update and the prediction it corrected
    pub fn record(&mut self, state: &EstimatorState, innovation: &Innovation) {
        self.entries.push(Entry {
            timestamp: innovation.observation.timestamp,
            efficiency: state.efficiency,
            infiltration_ach: state.infiltration_ach,
            predicted_indoor_pm25: innovation.predicted_indoor_pm25,
            actual_indoor_pm25: innovation.observation.indoor_pm25,
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One summary per calendar day with at least [`MIN_UPDATES_PER_DAY`] updates, in date order
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn days(&self) -> Vec<DailySummary> {
        let groups = self
            .entries
            .iter()
            .group_by(|entry| entry.timestamp.date());
        groups
            .into_iter()
            .filter_map(|(date, group)| {
                let entries = group.collect::<Vec<_>>();
                let updates = entries.len();
                if updates < MIN_UPDATES_PER_DAY {
                    return None;
                }
                let mean = |value: fn(&Entry) -> f64| {
                    entries.iter().map(|entry| value(entry)).sum::<f64>() / updates as f64
                };
                Some(DailySummary {
                    date,
                    efficiency: mean(|entry| entry.efficiency),
                    infiltration_ach: mean(|entry| entry.infiltration_ach),
                    predicted_indoor_pm25: mean(|entry| entry.predicted_indoor_pm25),
                    actual_indoor_pm25: mean(|entry| entry.actual_indoor_pm25),
                    mean_absolute_error: mean(|entry| {
                        (entry.actual_indoor_pm25 - entry.predicted_indoor_pm25).abs()
                    }),
                    updates,
                })
            })
            .collect()
    }
}

/// Change in daily mean efficiency per 30 days, from a least-squares line
///
/// Needs at least three days.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn efficiency_trend_per_month(days: &[DailySummary]) -> Option<f64> {
    if days.len() < 3 {
        return None;
    }
    let first = days[0].date;
    let x = days
        .iter()
        .map(|day| (day.date - first).num_days() as f64)
        .collect::<Vec<_>>();
    let y = days.iter().map(|day| day.efficiency).collect::<Vec<_>>();
    slope(&x, &y).map(|per_day| per_day * DAYS_PER_MONTH)
}
