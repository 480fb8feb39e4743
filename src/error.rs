//! Error taxonomy of a calibration run.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which closed-form division (or range check) broke down for a bead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degeneracy {
    /// The constant term `d22` of the projection denominator vanished.
    ConicScale,
    /// `dp20² + dp21²` vanished: the trajectory has no first-order denominator term.
    EllipseAxis,
    /// `cp01` vanished, so the skew direction is undefined.
    SkewDirection,
    /// A pairwise tilt denominator vanished.
    TiltDenominator,
    /// The averaged tilt sine fell outside `[-1, 1]`.
    TiltOutOfRange,
    /// A slant denominator vanished.
    SlantDenominator,
    /// A derived parameter came out NaN or infinite.
    NonFinite,
}

impl fmt::Display for Degeneracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Degeneracy::ConicScale => "conic scale d22 is zero",
            Degeneracy::EllipseAxis => "dp20^2 + dp21^2 is zero",
            Degeneracy::SkewDirection => "cp01 is zero",
            Degeneracy::TiltDenominator => "tilt denominator is zero",
            Degeneracy::TiltOutOfRange => "tilt sine outside [-1, 1]",
            Degeneracy::SlantDenominator => "slant denominator is zero",
            Degeneracy::NonFinite => "non-finite parameter",
        };
        f.write_str(s)
    }
}

/// Coarse category of a [`CalibrationError`], as reported in failure events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ImageRead,
    NumericalDegeneracy,
    Precondition,
}

/// Errors that abort (or, for degeneracy, degrade) a calibration run.
#[derive(Error, Debug)]
pub enum CalibrationError {
    /// The number of beads found in a projection does not match the configured count.
    #[error("projection {projection}: detected {detected} beads, expected {expected}")]
    Configuration {
        projection: String,
        detected: usize,
        expected: usize,
        /// Raw pixel dump written for inspection, if diagnostics are enabled.
        snapshot: Option<PathBuf>,
    },

    /// The image source could not provide a projection.
    #[error("cannot read image: {projection}")]
    ImageRead {
        projection: String,
        #[source]
        source: anyhow::Error,
    },

    /// A closed-form division is singular for one bead.
    #[error("bead {bead}: {reason}")]
    NumericalDegeneracy { bead: usize, reason: Degeneracy },

    /// The run cannot start (or continue) with the given inputs.
    #[error("precondition failed: {0}")]
    Precondition(String),
}

impl CalibrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CalibrationError::Configuration { .. } => ErrorKind::Configuration,
            CalibrationError::ImageRead { .. } => ErrorKind::ImageRead,
            CalibrationError::NumericalDegeneracy { .. } => ErrorKind::NumericalDegeneracy,
            CalibrationError::Precondition(_) => ErrorKind::Precondition,
        }
    }
}

pub type Result<T> = std::result::Result<T, CalibrationError>;
