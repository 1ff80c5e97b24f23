use chrono::NaiveDateTime;
use thiserror::Error;

use crate::gate::GateStats;

/// Failures surfaced to the caller.
///
/// Per-sample problems (weak signal, indoor sources, a sample that carries no information about the
/// parameters) are not errors. They are reported through [`crate::gate::Rejection`] and
/// [`crate::estimator::Outcome`] and only ever counted. The variants here are the conditions a
/// caller has to act on.
#[derive(Debug, Error)]
pub enum Error {
    /// A single value is malformed or outside its physical range
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No sample passed the gate over the whole observation window
    #[error(
        "no usable samples within {window_hours} h ({} seen, {} rejected)",
        stats.seen,
        stats.rejected()
    )]
    InsufficientData { window_hours: f64, stats: GateStats },

    /// Samples must arrive in non-decreasing timestamp order
    #[error("sample at {received} arrived after state was advanced to {previous}")]
    OutOfOrder {
        previous: NaiveDateTime,
        received: NaiveDateTime,
    },

    /// The mass balance has a vanishing removal rate
    #[error("degenerate mass balance: total removal rate {0} is not positive")]
    DegenerateModel(f64),

    #[error("configuration: {0}")]
    Config(String),

    #[error("unrecognised timestamp `{0}`")]
    Timestamp(String),

    /// The batch optimiser failed to run
    #[error("solver: {0}")]
    Solver(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

impl From<argmin::core::Error> for Error {
    fn from(value: argmin::core::Error) -> Self {
        Self::Solver(value.to_string())
    }
}
