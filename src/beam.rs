//! Estimate the unattenuated beam intensity from a reference projection.
//!
//! Two small windows near the top-left and top-right detector corners are
//! averaged. The phantom is centred on the detector, so these corners see the
//! raw beam. Bead detection thresholds are derived from this baseline.

use crate::error::{CalibrationError, Result};
use crate::projection::ProjectionImage;

/// Placement of the beam sampling windows.
#[derive(Debug, Clone)]
pub struct BeamConfig {
    /// Distance of both windows from the top and side edges, in pixels.
    /// Must be at least 1.
    /// Default: 6
    pub edge_margin: usize,
    /// Window width in pixels.
    /// Default: 16
    pub window_width: usize,
    /// Window height in pixels.
    /// Default: 16
    pub window_height: usize,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            edge_margin: 6,
            window_width: 16,
            window_height: 16,
        }
    }
}

/// Average raw-beam value over the two corner windows of `image`.
///
/// The left window covers columns `[m, m + w)`, the right window columns
/// `(W - m - w, W - m]`; both cover rows `[m, m + h)`. The mean is truncated
/// to an integer count like the detector data itself.
pub fn estimate_raw_beam(image: &ProjectionImage, config: &BeamConfig) -> Result<u16> {
    let w = image.width as usize;
    let h = image.height as usize;
    let m = config.edge_margin;
    let (ww, wh) = (config.window_width, config.window_height);

    if ww == 0 || wh == 0 {
        return Err(CalibrationError::Precondition(
            "beam sampling window must be non-empty".into(),
        ));
    }
    // The right window's last column is W - m.
    if m == 0 {
        return Err(CalibrationError::Precondition(
            "beam edge margin must be at least one pixel".into(),
        ));
    }
    if 2 * (m + ww) + 1 > w || m + wh > h {
        return Err(CalibrationError::Precondition(format!(
            "image {}x{} too small for beam windows ({}x{} at margin {})",
            w, h, ww, wh, m
        )));
    }

    let mut sum: u64 = 0;
    for y in m..m + wh {
        for x in m..m + ww {
            sum += image.get(x, y) as u64;
        }
        for x in (w - m - ww + 1)..=(w - m) {
            sum += image.get(x, y) as u64;
        }
    }

    Ok((sum / (2 * ww * wh) as u64) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_beam() {
        let img = ProjectionImage::filled(128, 64, 12000);
        assert_eq!(estimate_raw_beam(&img, &BeamConfig::default()).unwrap(), 12000);
    }

    #[test]
    fn test_ignores_center_of_detector() {
        let mut img = ProjectionImage::filled(128, 128, 10000);
        // Darken everything except the two corner windows
        for y in 30..128 {
            for x in 0..128 {
                img.pixels[y * 128 + x] = 100;
            }
        }
        for x in 30..90 {
            img.pixels[10 * 128 + x] = 100;
        }
        assert_eq!(estimate_raw_beam(&img, &BeamConfig::default()).unwrap(), 10000);
    }

    #[test]
    fn test_left_and_right_windows_are_averaged() {
        let mut img = ProjectionImage::filled(100, 40, 0);
        for y in 0..40 {
            for x in 0..50 {
                img.pixels[y * 100 + x] = 1000;
            }
            for x in 50..100 {
                img.pixels[y * 100 + x] = 3000;
            }
        }
        assert_eq!(estimate_raw_beam(&img, &BeamConfig::default()).unwrap(), 2000);
    }

    #[test]
    fn test_rejects_zero_margin() {
        let config = BeamConfig {
            edge_margin: 0,
            ..Default::default()
        };
        for height in [16, 40] {
            let img = ProjectionImage::filled(100, height, 5000);
            let err = estimate_raw_beam(&img, &config).unwrap_err();
            assert!(matches!(err, CalibrationError::Precondition(_)), "{err}");
        }
        let one = BeamConfig {
            edge_margin: 1,
            ..Default::default()
        };
        let img = ProjectionImage::filled(100, 17, 5000);
        assert_eq!(estimate_raw_beam(&img, &one).unwrap(), 5000);
    }

    #[test]
    fn test_rejects_tiny_image() {
        let img = ProjectionImage::filled(40, 40, 5000);
        let err = estimate_raw_beam(&img, &BeamConfig::default()).unwrap_err();
        assert!(matches!(err, CalibrationError::Precondition(_)));
    }
}
