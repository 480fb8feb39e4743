//! Cross-bead stage: tilt, slant, SDD and detector offsets.
//!
//! Tilt and slant are only observable through the spread of the rotation-axis
//! projections of beads at different heights, so every estimate here combines
//! one bead's conic terms with those of all the others.

use crate::error::Degeneracy;

use super::conic::BeadConic;
use super::BeadEstimate;

/// Tilt angle seen from bead `k`, averaged over every other bead.
fn tilt_angle(k: usize, conics: &[BeadConic], min_denominator: f64) -> Result<f64, Degeneracy> {
    let ck = &conics[k];
    let mut sum = 0.0;
    for (j, cj) in conics.iter().enumerate() {
        if j == k {
            continue;
        }
        let denom = (ck.e - cj.e) * (ck.c - cj.f) - (ck.f - cj.f) * (ck.a - cj.e);
        if denom.abs() < min_denominator {
            return Err(Degeneracy::TiltDenominator);
        }
        sum += ck.b * (ck.f - cj.f) / denom;
    }
    let sin_tilt = sum / (conics.len() - 1) as f64;
    if !(-1.0..=1.0).contains(&sin_tilt) {
        return Err(Degeneracy::TiltOutOfRange);
    }
    Ok(sin_tilt.asin())
}

/// Slant angle seen from bead `k`, averaged over all beads including `k`.
fn slant_angle(
    k: usize,
    tilt: f64,
    conics: &[BeadConic],
    min_denominator: f64,
) -> Result<f64, Degeneracy> {
    let ck = &conics[k];
    let sin_tilt = tilt.sin();
    let mut sum = 0.0;
    for cj in conics {
        let denom = sin_tilt * (ck.a - cj.e) + ck.b;
        if denom.abs() < min_denominator {
            return Err(Degeneracy::SlantDenominator);
        }
        sum += (ck.c - cj.f) / denom;
    }
    Ok((sum / conics.len() as f64).atan())
}

/// Full geometry estimate for bead `k`.
///
/// `conics` must hold at least two beads; `pixel_size` converts the offsets
/// `dx`, `dz` from detector units to pixels.
pub fn bead_estimate(
    k: usize,
    conics: &[BeadConic],
    pixel_size: f64,
    min_denominator: f64,
) -> Result<BeadEstimate, Degeneracy> {
    let ck = &conics[k];
    let tilt = tilt_angle(k, conics, min_denominator)?;
    let slant = slant_angle(k, tilt, conics, min_denominator)?;
    let (sin_tilt, cos_tilt) = tilt.sin_cos();
    let (sin_slant, cos_slant) = slant.sin_cos();

    let sdd_sq = ck.a * ck.a + ck.b * ck.b + ck.c * ck.c + 2.0 * sin_tilt * ck.a * ck.b;
    if sdd_sq < 0.0 {
        return Err(Degeneracy::NonFinite);
    }

    let dx_sum: f64 = conics
        .iter()
        .map(|cj| sin_slant * sin_tilt * cj.e - cos_slant * cj.f)
        .sum();

    let estimate = BeadEstimate {
        bead: ck.bead,
        skew: ck.skew,
        tilt,
        slant,
        sdd: sdd_sq.sqrt(),
        dx: dx_sum / conics.len() as f64 / pixel_size,
        dz: -cos_tilt * ck.a / pixel_size,
    };
    if !estimate.is_finite() {
        return Err(Degeneracy::NonFinite);
    }
    Ok(estimate)
}
