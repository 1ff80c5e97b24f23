use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;

/// Whether a sample was taken while the building is sealed and quiet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    Night,
    Day,
}

/// Hours of the local day treated as night
///
/// `start_hour` is inclusive and `end_hour` exclusive. A window whose start is later than its end
/// wraps past midnight. Equal hours describe an empty window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NightWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for NightWindow {
    fn default() -> Self {
        Self {
            start_hour: 22,
            end_hour: 8,
        }
    }
}

impl From<&AnalysisConfig> for NightWindow {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            start_hour: config.night_start_hour,
            end_hour: config.night_end_hour,
        }
    }
}

impl NightWindow {
    #[must_use]
    pub const fn contains_hour(&self, hour: u32) -> bool {
        if self.start_hour > self.end_hour {
            hour >= self.start_hour || hour < self.end_hour
        } else {
            self.start_hour <= hour && hour < self.end_hour
        }
    }

    #[must_use]
    pub fn classify(&self, timestamp: &NaiveDateTime) -> Regime {
        if self.contains_hour(timestamp.hour()) {
            Regime::Night
        } else {
            Regime::Day
        }
    }
}
