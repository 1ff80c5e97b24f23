use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use itertools::Itertools;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::aqi::{aqi_to_pm25, MAX_AQI};
use crate::regime::Regime;
use crate::{Error, Result};

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// A paired indoor/outdoor air quality reading
///
/// Timestamps are local wall-clock time, which is what the day/night regime is judged on. Missing
/// readings are carried as `NaN` and rejected by the gate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: NaiveDateTime,
    pub indoor_aqi: f64,
    pub outdoor_aqi: f64,
}

impl Sample {
    #[must_use]
    pub const fn new(timestamp: NaiveDateTime, indoor_aqi: f64, outdoor_aqi: f64) -> Self {
        Self {
            timestamp,
            indoor_aqi,
            outdoor_aqi,
        }
    }

    /// Both readings as PM2.5 concentrations
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] unless both readings are finite AQI values in `[0, 500]`.
    pub fn to_pm25(&self) -> Result<(f64, f64)> {
        for (name, aqi) in [("indoor", self.indoor_aqi), ("outdoor", self.outdoor_aqi)] {
            if !(0.0..=MAX_AQI).contains(&aqi) {
                return Err(Error::InvalidInput(format!(
                    "{name} AQI {aqi} at {} is outside [0, {MAX_AQI}]",
                    self.timestamp
                )));
            }
        }
        Ok((aqi_to_pm25(self.indoor_aqi)?, aqi_to_pm25(self.outdoor_aqi)?))
    }
}

/// A sample that passed the gate, in concentration units
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub indoor_pm25: f64,
    pub outdoor_pm25: f64,
    pub regime: Regime,
}

impl Observation {
    #[must_use]
    pub fn ratio(&self) -> f64 {
        self.indoor_pm25 / self.outdoor_pm25
    }
}

#[derive(Deserialize)]
struct Row {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "IndoorAirQuality", deserialize_with = "csv::invalid_option")]
    indoor: Option<f64>,
    #[serde(rename = "OutdoorAirQuality", deserialize_with = "csv::invalid_option")]
    outdoor: Option<f64>,
}

/// Read samples from a sheet export
///
/// The file must carry the headers `Timestamp`, `IndoorAirQuality` and `OutdoorAirQuality`. Other
/// columns are ignored. Blank or non-numeric readings become `NaN`, rows with an unparseable
/// timestamp are dropped with a warning.
///
/// # Errors
/// Returns an error if the file cannot be read or is not valid CSV.
pub fn read_csv(path: &Path) -> Result<Vec<Sample>> {
    let file = fs::read(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(&file[..]);

    let mut samples = vec![];
    let mut dropped = 0usize;
    for result in rdr.deserialize() {
        let row: Row = result?;
        match parse_timestamp(&row.timestamp) {
            Ok(timestamp) => samples.push(Sample {
                timestamp,
                indoor_aqi: row.indoor.unwrap_or(f64::NAN),
                outdoor_aqi: row.outdoor.unwrap_or(f64::NAN),
            }),
            Err(_) => dropped += 1,
        }
    }

    if dropped > 0 {
        warn!("dropped {dropped} rows with invalid timestamps from {}", path.display());
    }
    info!("read {} samples from {}", samples.len(), path.display());
    Ok(samples)
}

/// Parse the timestamp formats produced by sensor loggers and sheet exports
///
/// Offset-carrying timestamps are reduced to the wall-clock time at the recorded offset.
///
/// # Errors
/// Returns [`Error::Timestamp`] when no known format matches.
pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime> {
    let text = text.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(text) {
        return Ok(timestamp.naive_local());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .ok_or_else(|| Error::Timestamp(text.to_owned()))
}

/// Order samples by time and drop repeated timestamps, keeping the last reading of each
#[must_use]
pub fn prepare(mut samples: Vec<Sample>) -> Vec<Sample> {
    samples.sort_by_key(|sample| sample.timestamp);
    let groups = samples.into_iter().group_by(|sample| sample.timestamp);
    groups
        .into_iter()
        .filter_map(|(_, group)| group.last())
        .collect()
}
