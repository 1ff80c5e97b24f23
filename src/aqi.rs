//! Conversion between the US EPA Air Quality Index and PM2.5 mass concentration.
//!
//! Both directions are piecewise-linear interpolations over the same breakpoint table, so each
//! is the exact inverse of the other inside the table. Inputs past the last breakpoint are
//! trimmed to the boundary output rather than extrapolated.
use num_traits::Float;

use crate::{Error, Result};

/// `(AQI, PM2.5 µg/m³)` breakpoints
pub const BREAKPOINTS: [(f64, f64); 8] = [
    (0.0, 0.0),
    (50.0, 12.0),
    (100.0, 35.4),
    (150.0, 55.4),
    (200.0, 150.4),
    (300.0, 250.4),
    (400.0, 350.4),
    (500.0, 500.4),
];

pub const MAX_AQI: f64 = 500.0;
pub const MAX_PM25: f64 = 500.4;

/// Convert an AQI value to PM2.5 concentration in µg/m³
///
/// # Errors
/// Returns [`Error::InvalidInput`] if `aqi` is negative or not finite.
pub fn aqi_to_pm25<E: Float>(aqi: E) -> Result<E> {
    interpolate(aqi, |(a, p)| (a, p))
}

/// Convert a PM2.5 concentration in µg/m³ to an AQI value
///
/// The result is continuous, it is not rounded to the integer index published by agencies.
///
/// # Errors
/// Returns [`Error::InvalidInput`] if `pm25` is negative or not finite.
pub fn pm25_to_aqi<E: Float>(pm25: E) -> Result<E> {
    interpolate(pm25, |(a, p)| (p, a))
}

fn interpolate<E: Float>(value: E, orient: impl Fn((f64, f64)) -> (f64, f64)) -> Result<E> {
    let x = value
        .to_f64()
        .filter(|x| x.is_finite())
        .ok_or_else(|| Error::InvalidInput("value is not a finite number".into()))?;
    if x < 0.0 {
        return Err(Error::InvalidInput(format!("value cannot be negative: {x}")));
    }

    let table = BREAKPOINTS.map(orient);
    let (x_last, y_last) = table[table.len() - 1];
    if x >= x_last {
        return Ok(cast(y_last));
    }

    let y = table
        .windows(2)
        .find(|pair| x <= pair[1].0)
        .map_or(y_last, |pair| {
            let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
            if x == x1 {
                y1
            } else {
                y0 + (x - x0) * (y1 - y0) / (x1 - x0)
            }
        });
    Ok(cast(y))
}

fn cast<E: Float>(x: f64) -> E {
    // every `Float` can represent the table values, at worst with rounding
    E::from(x).unwrap_or_else(E::nan)
}
