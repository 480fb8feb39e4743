//! Closed-form recovery of cone-beam scanner geometry from bead trajectories.
//!
//! Each bead of the phantom traces an ellipse on the detector as the object
//! rotates. The shape and placement of these ellipses encode the detector's
//! misalignment. The solver:
//!
//! 1. **Per bead** ([`conic`]): derives the projection denominator from the
//!    harmonic coefficients, the ellipse terms, and the skew angle.
//! 2. **Across beads** ([`cross_bead`]): combines beads at different heights to
//!    estimate tilt and slant, then SDD and the detector offsets.
//!
//! Any singular division removes only the affected bead. The cross-bead stage
//! needs at least two beads, so losing too many beads fails the solve.

pub mod conic;
pub mod cross_bead;

use tracing::{debug, warn};

use crate::error::{CalibrationError, Degeneracy, Result};
use crate::harmonic::BeadHarmonics;

use conic::{bead_conic, BeadConic};
use cross_bead::bead_estimate;

/// Fewest beads for which tilt and slant are defined.
pub const MIN_BEADS: usize = 2;

/// Configuration for the geometry solver.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Denominators with a smaller magnitude are treated as singular and the
    /// affected bead is excluded.
    /// Default: 1e-12
    pub min_denominator: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            min_denominator: 1e-12,
        }
    }
}

/// Geometry seen from one bead.
///
/// Angles are in radians and `sdd` is in detector units (those of the pixel
/// size). `dx` and `dz` are the horizontal and vertical detector offsets in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeadEstimate {
    /// Bead index in raster discovery order.
    pub bead: usize,
    pub skew: f64,
    pub tilt: f64,
    pub slant: f64,
    pub sdd: f64,
    pub dx: f64,
    pub dz: f64,
}

impl BeadEstimate {
    pub fn is_finite(&self) -> bool {
        [self.skew, self.tilt, self.slant, self.sdd, self.dx, self.dz]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// A bead left out of the solution, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeadExclusion {
    pub bead: usize,
    pub reason: Degeneracy,
}

impl From<BeadExclusion> for CalibrationError {
    fn from(e: BeadExclusion) -> Self {
        CalibrationError::NumericalDegeneracy {
            bead: e.bead,
            reason: e.reason,
        }
    }
}

/// Per-bead estimates plus the beads that had to be dropped.
#[derive(Debug, Clone, Default)]
pub struct GeometrySolution {
    pub estimates: Vec<BeadEstimate>,
    pub excluded: Vec<BeadExclusion>,
}

/// Solve for the scanner geometry from every bead's harmonic coefficients.
///
/// # Errors
///
/// - [`CalibrationError::Precondition`] if fewer than [`MIN_BEADS`] beads are given.
/// - [`CalibrationError::NumericalDegeneracy`] if exclusions leave fewer than
///   [`MIN_BEADS`] usable beads; the error names the last excluded bead.
pub fn solve_geometry(
    coefficients: &[BeadHarmonics],
    pixel_size: f64,
    config: &SolverConfig,
) -> Result<GeometrySolution> {
    if coefficients.len() < MIN_BEADS {
        return Err(CalibrationError::Precondition(format!(
            "tilt and slant need at least {} beads, got {}",
            MIN_BEADS,
            coefficients.len()
        )));
    }
    if pixel_size.is_nan() || pixel_size <= 0.0 {
        return Err(CalibrationError::Precondition(format!(
            "pixel size must be positive, got {pixel_size}"
        )));
    }

    let mut excluded: Vec<BeadExclusion> = Vec::new();
    let exclude = |excluded: &mut Vec<BeadExclusion>, bead: usize, reason: Degeneracy| {
        warn!("Excluding bead {}: {}", bead, reason);
        excluded.push(BeadExclusion { bead, reason });
    };

    // ── Stage 1: per-bead conic terms ──
    let mut conics: Vec<BeadConic> = Vec::with_capacity(coefficients.len());
    for (bead, h) in coefficients.iter().enumerate() {
        match bead_conic(bead, h, config.min_denominator) {
            Ok(c) => {
                debug!(
                    "bead {}: skew={:.6} A={:.4} B={:.4} C={:.4} E={:.4} F={:.4}",
                    bead, c.skew, c.a, c.b, c.c, c.e, c.f
                );
                conics.push(c);
            }
            Err(reason) => exclude(&mut excluded, bead, reason),
        }
    }
    ensure_enough(conics.len(), &excluded)?;

    // ── Stage 2: cross-bead terms ──
    let mut estimates: Vec<BeadEstimate> = Vec::with_capacity(conics.len());
    for k in 0..conics.len() {
        match bead_estimate(k, &conics, pixel_size, config.min_denominator) {
            Ok(est) => estimates.push(est),
            Err(reason) => exclude(&mut excluded, conics[k].bead, reason),
        }
    }
    ensure_enough(estimates.len(), &excluded)?;

    Ok(GeometrySolution {
        estimates,
        excluded,
    })
}

fn ensure_enough(usable: usize, excluded: &[BeadExclusion]) -> Result<()> {
    if usable >= MIN_BEADS {
        return Ok(());
    }
    match excluded.last() {
        Some(&last) => Err(last.into()),
        None => Err(CalibrationError::Precondition(format!(
            "only {usable} usable beads"
        ))),
    }
}
