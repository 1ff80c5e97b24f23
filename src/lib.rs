#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

pub mod analysis;
pub mod aqi;
pub mod calibration;
pub mod classify;
pub mod config;
pub mod distributions;
pub mod error;
pub mod estimator;
pub mod gate;
pub mod history;
pub mod math;
pub mod minimisation;
pub mod model;
pub mod regime;
pub mod sample;
pub mod synthetic;

pub use error::Error;

pub type Result<T> = ::std::result::Result<T, Error>;
