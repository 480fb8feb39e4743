//! Per-bead stage of the closed-form inversion.
//!
//! The projection of a bead orbit is `u = N_u / D`, `v = N_v / D` with `N_u`,
//! `N_v` and `D` first-order trigonometric polynomials in the rotation angle.
//! Because `u·D` has no harmonics above order one, the order 1..3 coefficients
//! of `u` determine `D` up to a common factor:
//!
//! ```text
//! D ∝ d22 + d20 cos ω + d21 sin ω
//! ```
//!
//! From `D` the ellipse terms `cp00, cp01, cp10, cp11` follow, and with them the
//! detector skew and the skew-corrected quantities `A, B, C, E, F`:
//!
//! - `(C, A)`: skew-corrected detector position of the principal point,
//! - `B`: scale of the orbit's horizontal axis on the detector,
//! - `(F, E)`: skew-corrected projection of the rotation axis at the bead's height.
//!
//! Reference: Smekal, Kachelrieß, Stepina, Kalender, "Geometric misalignment and
//! calibration in cone-beam tomography", Med. Phys. 31(12), 2004.

use crate::error::Degeneracy;
use crate::harmonic::BeadHarmonics;

/// Skew angle and skew-corrected conic terms of one bead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeadConic {
    /// Bead index in raster discovery order, before any exclusion.
    pub bead: usize,
    /// In-plane detector rotation estimated from this bead alone (radians).
    pub skew: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub e: f64,
    pub f: f64,
}

/// Derive the conic terms of one bead from its harmonic coefficients.
///
/// Fails when `d22`, `dp20² + dp21²` or `cp01` is smaller in magnitude than
/// `min_denominator`.
pub fn bead_conic(
    bead: usize,
    h: &BeadHarmonics,
    min_denominator: f64,
) -> Result<BeadConic, Degeneracy> {
    let (ur, ui) = (&h.u.real, &h.u.imag);
    let (vr, vi) = (&h.v.real, &h.v.imag);

    // ── Denominator polynomial (common factor dropped) ──
    let d20 = (ur[1] - ur[3]) * ur[2] - (ui[3] - ui[1]) * ui[2];
    let d21 = (ur[1] + ur[3]) * ui[2] - (ui[3] + ui[1]) * ur[2];
    let d22 = (ur[3] * ur[3] - ur[1] * ur[1] + ui[3] * ui[3] - ui[1] * ui[1]) / 2.0;
    if d22.abs() < min_denominator {
        return Err(Degeneracy::ConicScale);
    }
    // Constant terms of N_u and N_v
    let d02 = (d20 * ur[1] + d21 * ui[1] + d22 * ur[0]) / 2.0;
    let d12 = (d20 * vr[1] + d21 * vi[1] + d22 * vr[0]) / 2.0;

    // ── Ellipse terms ──
    let dp20 = d20 / d22;
    let dp21 = d21 / d22;
    let q = dp20 * dp20 + dp21 * dp21;
    if q < min_denominator {
        return Err(Degeneracy::EllipseAxis);
    }

    let first_order = |xr: &[f64; 4], xi: &[f64; 4]| {
        (
            0.5 * (dp20 * xr[2] + dp21 * xi[2]) + xr[1],
            0.5 * (dp20 * xi[2] - dp21 * xr[2]) + xi[1],
        )
    };
    let (au, bu) = first_order(ur, ui);
    let (av, bv) = first_order(vr, vi);

    let cp01 = (dp21 * au - dp20 * bu) / q;
    let cp11 = (dp21 * av - dp20 * bv) / q;
    let cp00 = (dp20 * au + dp21 * bu) / q + ur[0] / 2.0;
    let cp10 = (dp20 * av + dp21 * bv) / q + vr[0] / 2.0;

    if cp01.abs() < min_denominator {
        return Err(Degeneracy::SkewDirection);
    }
    let skew = (-cp11 / cp01).atan();

    // ── Undo the skew ──
    let (sin_mu, cos_mu) = skew.sin_cos();
    let (u_axis, v_axis) = (d02 / d22, d12 / d22);

    Ok(BeadConic {
        bead,
        skew,
        a: sin_mu * cp00 + cos_mu * cp10,
        b: cos_mu * cp01 - sin_mu * cp11,
        c: cos_mu * cp00 - sin_mu * cp10,
        e: sin_mu * u_axis + cos_mu * v_axis,
        f: cos_mu * u_axis - sin_mu * v_axis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmonic::Harmonics;

    fn sampled(n: usize, f: impl Fn(f64) -> (f64, f64)) -> BeadHarmonics {
        let (u, v): (Vec<f64>, Vec<f64>) = (0..n)
            .map(|i| f(i as f64 * 2.0 * std::f64::consts::PI / n as f64))
            .unzip();
        BeadHarmonics {
            u: Harmonics::from_samples(&u),
            v: Harmonics::from_samples(&v),
        }
    }

    #[test]
    fn test_ideal_orbit() {
        // Aligned detector, principal point at (3, -2), source 700 from the axis,
        // SDD 1000: u = 1000 x / (700 + y) + 3, v = 1000 z / (700 + y) - 2
        let (r, z, rs, sdd) = (30.0, 40.0, 700.0, 1000.0);
        let h = sampled(360, |w| {
            let (x, y) = (r * (w + 0.3).cos(), r * (w + 0.3).sin());
            (sdd * x / (rs + y) + 3.0, sdd * z / (rs + y) - 2.0)
        });
        let conic = bead_conic(0, &h, 1e-12).unwrap();
        assert!(conic.skew.abs() < 1e-9, "skew {}", conic.skew);
        assert!((conic.c - 3.0).abs() < 1e-6, "C {}", conic.c);
        assert!((conic.a + 2.0).abs() < 1e-6, "A {}", conic.a);
        assert!((conic.b - sdd).abs() < 1e-6, "B {}", conic.b);
        // Rotation axis projects onto the principal point column
        assert!((conic.f - 3.0).abs() < 1e-6, "F {}", conic.f);
        assert!((conic.e - (sdd * z / rs - 2.0)).abs() < 1e-6, "E {}", conic.e);
    }

    #[test]
    fn test_stationary_bead_is_degenerate() {
        let h = sampled(90, |_| (12.0, -30.0));
        assert_eq!(bead_conic(0, &h, 1e-12), Err(Degeneracy::ConicScale));
    }
}
