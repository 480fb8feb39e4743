//! # ctgeocal
//!
//! **Geometric calibration of cone-beam CT scanners** from a sequence of
//! projections of a bead phantom.
//!
//! Given radiographs of a few radio-opaque beads taken at uniform angular steps
//! over one full turn, `ctgeocal` recovers the detector skew, tilt and slant, the
//! source-to-detector distance and the detector centre offsets, each as a mean
//! and standard deviation across beads. No initial geometry estimate is needed.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ctgeocal::{calibrate, CalibrationConfig, CalibrationRequest};
//! use ctgeocal::source::DirectorySource;
//!
//! let result = calibrate(
//!     Arc::new(DirectorySource::default()),
//!     CalibrationConfig::default(),
//!     CalibrationRequest {
//!         path: "scans/phantom".into(),
//!         pixel_size: 0.273,
//!         bead_count: 2,
//!         projection_stride: 1,
//!     },
//! )
//! .unwrap();
//!
//! let p = result.parameters;
//! println!("skew  {:.5} ± {:.5} rad", p.skew.mean, p.skew.std_dev);
//! println!("SDD   {:.2} ± {:.2} mm", p.sdd.mean, p.sdd.std_dev);
//! ```
//!
//! ## Algorithm overview
//!
//! 1. **Beam estimate**: average two corner windows of the middle projection
//!    to get the unattenuated beam level
//! 2. **Bead detection**: threshold at a fraction of the beam level and take
//!    the centroid of every dark blob larger than a minimum size
//! 3. **Harmonic analysis**: the first four Fourier harmonics of each bead's
//!    detector trajectory
//! 4. **Closed-form solve**: invert the cone-beam projection of each bead's
//!    circular orbit for the scanner geometry
//! 5. **Aggregation**: mean and population standard deviation across beads
//!
//! Runs are driven by [`Calibrator`], which executes on a Tokio blocking task,
//! reports progress as [`CalibrationEvent`]s and can be cancelled.
//!
//! ## Credits
//!
//! The closed-form solve follows L. M. Smekal, M. Kachelrieß, E. Stepina and
//! W. A. Kalender, "Geometric misalignment and calibration in cone-beam
//! tomography," Med. Phys. 31(12), 2004.
//!

pub mod bead_detection;
pub mod beam;
pub mod calibration;
pub mod diagnostics;
mod error;
pub mod harmonic;
pub mod phantom;
mod projection;
pub mod solver;
#[cfg(feature = "image")]
pub mod source;
pub mod statistics;
pub mod trajectory;

pub use calibration::{
    calibrate, CalibrationConfig, CalibrationEvent, CalibrationOutcome, CalibrationRequest,
    CalibrationResult, CalibrationRun, Calibrator, CancelHandle, Phase, RunState,
};
pub use error::*;
pub use projection::*;
pub use solver::{BeadEstimate, BeadExclusion, GeometrySolution, SolverConfig};
pub use statistics::{GeometryParameters, MeanStd};
