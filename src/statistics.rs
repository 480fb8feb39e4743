//! Reduce per-bead estimates to the final geometry parameters.

use crate::solver::BeadEstimate;

/// Mean and population standard deviation of one quantity across beads.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeanStd {
    pub mean: f64,
    pub std_dev: f64,
}

impl MeanStd {
    /// Mean and standard deviation (divided by `n`, not `n - 1`) of `values`.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let values: Vec<f64> = values.into_iter().collect();
        if values.is_empty() {
            return Self::default();
        }
        if values.iter().all(|&v| v == values[0]) {
            return Self {
                mean: values[0],
                std_dev: 0.0,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std_dev: var.sqrt(),
        }
    }
}

/// Calibrated scanner geometry: every quantity as mean ± std across beads.
///
/// Angles are in radians, SDD in detector units, centres in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryParameters {
    /// In-plane detector rotation.
    pub skew: MeanStd,
    /// Detector rotation around the horizontal axis.
    pub tilt: MeanStd,
    /// Detector rotation around the vertical axis.
    pub slant: MeanStd,
    /// Column of the projected rotation axis, from the left image edge.
    pub width_center: MeanStd,
    /// Vertical detector offset.
    pub height_center: MeanStd,
    /// Source to detector distance.
    pub sdd: MeanStd,
    /// Number of beads the statistics were computed from.
    pub bead_count: usize,
}

/// Aggregate per-bead estimates into [`GeometryParameters`].
///
/// `image_width` moves the horizontal offset from the detector centre to the
/// left image edge.
pub fn aggregate(estimates: &[BeadEstimate], image_width: u32) -> GeometryParameters {
    let stat = |f: fn(&BeadEstimate) -> f64| MeanStd::from_values(estimates.iter().map(f));

    let mut width_center = stat(|e| e.dx);
    width_center.mean += image_width as f64 / 2.0;

    GeometryParameters {
        skew: stat(|e| e.skew),
        tilt: stat(|e| e.tilt),
        slant: stat(|e| e.slant),
        width_center,
        height_center: stat(|e| e.dz),
        sdd: stat(|e| e.sdd),
        bead_count: estimates.len(),
    }
}
