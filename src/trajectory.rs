//! Bead trajectory table: detector positions of every bead in every projection.

/// Two parallel arrays of detector coordinates, indexed `[bead * N + projection]`.
///
/// Every slot is written exactly once during detection, and the table is read
/// only after it is complete.
#[derive(Debug, Clone)]
pub struct TrajectoryTable {
    bead_count: usize,
    projection_count: usize,
    u: Vec<f64>,
    v: Vec<f64>,
    written: Vec<bool>,
}

impl TrajectoryTable {
    pub fn new(bead_count: usize, projection_count: usize) -> Self {
        let n = bead_count * projection_count;
        Self {
            bead_count,
            projection_count,
            u: vec![0.0; n],
            v: vec![0.0; n],
            written: vec![false; n],
        }
    }

    pub fn bead_count(&self) -> usize {
        self.bead_count
    }

    /// Number of projections (samples per bead).
    pub fn projection_count(&self) -> usize {
        self.projection_count
    }

    /// Record the position of `bead` in projection `index`.
    pub fn set(&mut self, bead: usize, index: usize, uv: (f64, f64)) {
        let slot = bead * self.projection_count + index;
        debug_assert!(!self.written[slot], "slot [{bead}, {index}] written twice");
        self.u[slot] = uv.0;
        self.v[slot] = uv.1;
        self.written[slot] = true;
    }

    /// True once every slot has been written.
    pub fn is_complete(&self) -> bool {
        self.written.iter().all(|&w| w)
    }

    /// Horizontal trajectory of one bead across all projections.
    pub fn bead_u(&self, bead: usize) -> &[f64] {
        let n = self.projection_count;
        &self.u[bead * n..(bead + 1) * n]
    }

    /// Vertical trajectory of one bead across all projections.
    pub fn bead_v(&self, bead: usize) -> &[f64] {
        let n = self.projection_count;
        &self.v[bead * n..(bead + 1) * n]
    }

    /// Whole u-axis array in table order.
    pub fn u(&self) -> &[f64] {
        &self.u
    }

    /// Whole v-axis array in table order.
    pub fn v(&self) -> &[f64] {
        &self.v
    }
}
