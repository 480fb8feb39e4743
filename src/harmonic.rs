//! Truncated discrete Fourier analysis of bead trajectories.
//!
//! A bead orbiting the rotation axis projects to a closed curve that is a ratio
//! of first-order trigonometric polynomials in the rotation angle. The solver
//! only needs the first four harmonics of each coordinate to invert it.
//!
//! Samples are assumed uniformly spaced over one full turn:
//!
//! ```text
//! Cr[m] = (2/N) Σ x[n] cos(m n 2π/N)
//! Ci[m] = (2/N) Σ x[n] sin(m n 2π/N)
//! ```
//!
//! Note the order-0 term is `2 × mean`, not the mean. The solver formulas are
//! written against this normalisation.

use std::f64::consts::PI;

use crate::trajectory::TrajectoryTable;

/// Highest harmonic order computed.
pub const MAX_ORDER: usize = 3;

/// Smallest sample count for which orders up to [`MAX_ORDER`] are not aliased.
pub const MIN_SAMPLES: usize = 2 * MAX_ORDER + 1;

/// Real (cosine) and imaginary (sine) coefficients for orders 0..=3 of one signal.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Harmonics {
    pub real: [f64; MAX_ORDER + 1],
    pub imag: [f64; MAX_ORDER + 1],
}

impl Harmonics {
    /// Compute the coefficients of `samples`.
    pub fn from_samples(samples: &[f64]) -> Self {
        let n = samples.len();
        let mut h = Harmonics::default();
        if n == 0 {
            return h;
        }
        let scale = 2.0 / n as f64;
        for order in 0..=MAX_ORDER {
            let mut re = 0.0;
            let mut im = 0.0;
            for (i, &x) in samples.iter().enumerate() {
                let angle = (order * i) as f64 * 2.0 * PI / n as f64;
                re += x * angle.cos();
                im += x * angle.sin();
            }
            h.real[order] = re * scale;
            h.imag[order] = im * scale;
        }
        h
    }
}

/// The 16 harmonic scalars of one bead: both detector axes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BeadHarmonics {
    pub u: Harmonics,
    pub v: Harmonics,
}

/// Coefficients of every bead in the table, in bead order.
pub fn analyze(table: &TrajectoryTable) -> Vec<BeadHarmonics> {
    (0..table.bead_count())
        .map(|bead| BeadHarmonics {
            u: Harmonics::from_samples(table.bead_u(bead)),
            v: Harmonics::from_samples(table.bead_v(bead)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_signal() {
        let c = 7.25;
        let h = Harmonics::from_samples(&vec![c; 90]);
        assert!((h.real[0] - 2.0 * c).abs() < 1e-12);
        assert_eq!(h.imag[0], 0.0);
        for order in 1..=MAX_ORDER {
            assert!(h.real[order].abs() < 1e-12, "real[{order}] = {}", h.real[order]);
            assert!(h.imag[order].abs() < 1e-12, "imag[{order}] = {}", h.imag[order]);
        }
    }

    #[test]
    fn test_pure_sinusoids() {
        let amplitude = 3.5;
        let phase = 0.7;
        for &n in &[7usize, 8, 12, 90, 360] {
            for m in 0..=MAX_ORDER {
                let samples: Vec<f64> = (0..n)
                    .map(|i| {
                        let t = i as f64 * 2.0 * PI / n as f64;
                        amplitude * (m as f64 * t - phase).cos()
                    })
                    .collect();
                let h = Harmonics::from_samples(&samples);
                // a cos(mt - p) = a cos p cos(mt) + a sin p sin(mt)
                let (exp_re, exp_im) = if m == 0 {
                    (2.0 * amplitude * phase.cos(), 0.0)
                } else {
                    (amplitude * phase.cos(), amplitude * phase.sin())
                };
                for order in 0..=MAX_ORDER {
                    let (re, im) = if order == m { (exp_re, exp_im) } else { (0.0, 0.0) };
                    assert!(
                        (h.real[order] - re).abs() < 1e-9 && (h.imag[order] - im).abs() < 1e-9,
                        "N={n} m={m} order={order}: got ({}, {}), expected ({re}, {im})",
                        h.real[order],
                        h.imag[order]
                    );
                }
            }
        }
    }

    #[test]
    fn test_analyze_splits_beads() {
        let mut table = TrajectoryTable::new(2, 8);
        for i in 0..8 {
            table.set(0, i, (1.0, -2.0));
            table.set(1, i, (4.0, 0.5));
        }
        let coeffs = analyze(&table);
        assert_eq!(coeffs.len(), 2);
        assert!((coeffs[0].u.real[0] - 2.0).abs() < 1e-12);
        assert!((coeffs[0].v.real[0] + 4.0).abs() < 1e-12);
        assert!((coeffs[1].u.real[0] - 8.0).abs() < 1e-12);
        assert!((coeffs[1].v.real[0] - 1.0).abs() < 1e-12);
    }
}
