//! Locate phantom beads in a projection radiograph.
//!
//! Beads are radio-opaque, so they show up as compact blobs well below the raw
//! beam level. Detection works by:
//! 1. Deriving a threshold from the raw beam baseline (see [`crate::beam`])
//! 2. Raster-scanning the image inside a border margin for a below-threshold pixel
//! 3. Opening a fixed square window anchored just above-left of that pixel
//! 4. Accumulating every unvisited below-threshold pixel in the window
//! 5. Accepting the blob as a bead when it is larger than a minimum size
//!
//! Bead identity is the discovery order of the raster scan: the first accepted
//! blob is bead 0 in every projection. There is no cross-projection matching.
//!
//! # Example
//!
//! ```
//! use ctgeocal::bead_detection::{detect_beads, BeadDetectionConfig};
//! use ctgeocal::ProjectionImage;
//!
//! let mut img = ProjectionImage::filled(128, 128, 10_000);
//! for y in 60..70 {
//!     for x in 40..50 {
//!         img.pixels[y * 128 + x] = 500;
//!     }
//! }
//! let beads = detect_beads("p0", &img, 10_000, 2, &BeadDetectionConfig::default()).unwrap();
//! assert_eq!(beads.len(), 1);
//! assert!((beads[0].x_px - 44.5).abs() < 1e-9);
//! ```

use tracing::debug;

use crate::error::{CalibrationError, Result};
use crate::projection::ProjectionImage;

/// Configuration for bead blob detection.
#[derive(Debug, Clone)]
pub struct BeadDetectionConfig {
    /// Border excluded from the raster scan, in pixels.
    /// Default: 16
    pub edge_margin: usize,

    /// Side length of the square accumulation window, in pixels.
    /// Must exceed the bead diameter plus `anchor_offset`.
    /// Default: 64
    pub window_size: usize,

    /// How far above and left of the trigger pixel the window starts.
    /// The first pixel found is on the top row of a blob, so the window must
    /// reach back to cover the rest of that blob.
    /// Default: 10
    pub anchor_offset: usize,

    /// Fraction of the raw beam value below which a pixel belongs to a bead.
    /// Default: 0.8
    pub threshold_factor: f64,

    /// A blob is accepted only if it has strictly more pixels than this.
    /// Smaller blobs are treated as noise.
    /// Default: 36
    pub min_blob_pixels: usize,
}

impl Default for BeadDetectionConfig {
    fn default() -> Self {
        Self {
            edge_margin: 16,
            window_size: 64,
            anchor_offset: 10,
            threshold_factor: 0.8,
            min_blob_pixels: 36,
        }
    }
}

/// Bead centroid in pixel coordinates (origin at the top-left pixel).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedBead {
    /// Mean column of the blob pixels.
    pub x_px: f64,
    /// Mean row of the blob pixels.
    pub y_px: f64,
    /// Number of pixels accumulated into the blob.
    pub pixel_count: usize,
}

impl DetectedBead {
    /// Convert to physical detector coordinates `(u, v)` in the units of `pixel_size`.
    ///
    /// `u` is measured from the horizontal detector centre (`width / 2`, integer
    /// division), `v` from the far (bottom) edge with the row axis flipped, so
    /// every bead has `v <= 0`.
    pub fn detector_coords(&self, width: u32, height: u32, pixel_size: f64) -> (f64, f64) {
        let uo = (width / 2) as f64;
        let vo = height as f64;
        let u = (self.x_px - uo) * pixel_size;
        let v = (height as f64 - self.y_px - vo) * pixel_size;
        (u, v)
    }
}

/// Pixel value below which a pixel counts as bead material.
pub fn bead_threshold(raw_beam: u16, config: &BeadDetectionConfig) -> u16 {
    (raw_beam as f64 * config.threshold_factor) as u16
}

/// Detect up to `bead_count` beads in `image`, in raster discovery order.
///
/// `raw_beam` is the unattenuated beam value from [`crate::beam::estimate_raw_beam`].
/// Finding more than `bead_count` beads is a configuration mismatch and fails with
/// [`CalibrationError::Configuration`] naming `projection`. Finding fewer is not an
/// error here; the caller decides whether a short projection is acceptable.
pub fn detect_beads(
    projection: &str,
    image: &ProjectionImage,
    raw_beam: u16,
    bead_count: usize,
    config: &BeadDetectionConfig,
) -> Result<Vec<DetectedBead>> {
    let w = image.width as usize;
    let h = image.height as usize;
    let threshold = bead_threshold(raw_beam, config);
    let edge = config.edge_margin;

    // Pixels already folded into a blob; replaces overwriting the pixel data
    let mut visited = vec![false; w * h];
    let mut beads: Vec<DetectedBead> = Vec::with_capacity(bead_count);
    let mut num_blobs_raw = 0usize;

    for y in edge..h.saturating_sub(edge) {
        for x in edge..w.saturating_sub(edge) {
            let idx = y * w + x;
            if visited[idx] || image.pixels[idx] >= threshold {
                continue;
            }
            num_blobs_raw += 1;

            let x0 = x.saturating_sub(config.anchor_offset);
            let y0 = y.saturating_sub(config.anchor_offset);
            let x1 = (x + config.window_size)
                .saturating_sub(config.anchor_offset)
                .min(w);
            let y1 = (y + config.window_size)
                .saturating_sub(config.anchor_offset)
                .min(h);

            let mut sum_x = 0.0_f64;
            let mut sum_y = 0.0_f64;
            let mut count = 0usize;
            for yy in y0..y1 {
                let row_off = yy * w;
                for xx in x0..x1 {
                    let i = row_off + xx;
                    if !visited[i] && image.pixels[i] < threshold {
                        visited[i] = true;
                        sum_x += xx as f64;
                        sum_y += yy as f64;
                        count += 1;
                    }
                }
            }

            if count <= config.min_blob_pixels {
                continue;
            }
            if beads.len() >= bead_count {
                return Err(CalibrationError::Configuration {
                    projection: projection.to_string(),
                    detected: beads.len() + 1,
                    expected: bead_count,
                    snapshot: None,
                });
            }
            beads.push(DetectedBead {
                x_px: sum_x / count as f64,
                y_px: sum_y / count as f64,
                pixel_count: count,
            });
        }
    }

    debug!(
        "{}: {} blobs, {} beads (threshold {})",
        projection,
        num_blobs_raw,
        beads.len(),
        threshold
    );

    Ok(beads)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BEAM: u16 = 10_000;

    /// Draw a dark disc; returns the number of pixels drawn.
    fn draw_disc(img: &mut ProjectionImage, cx: f64, cy: f64, radius: f64) -> usize {
        let w = img.width as usize;
        let mut n = 0;
        for row in 0..img.height as usize {
            for col in 0..w {
                let dx = col as f64 - cx;
                let dy = row as f64 - cy;
                if dx * dx + dy * dy <= radius * radius {
                    img.pixels[row * w + col] = 800;
                    n += 1;
                }
            }
        }
        n
    }

    #[test]
    fn test_single_bead_centroid() {
        let mut img = ProjectionImage::filled(200, 200, BEAM);
        let (true_x, true_y) = (83.3_f64, 121.6_f64);
        let area = draw_disc(&mut img, true_x, true_y, 5.0);
        assert!(area > 36);

        let beads = detect_beads("p", &img, BEAM, 2, &BeadDetectionConfig::default()).unwrap();
        assert_eq!(beads.len(), 1);
        let b = beads[0];
        assert_eq!(b.pixel_count, area);
        assert!(
            (b.x_px - true_x).abs() < 1.0 && (b.y_px - true_y).abs() < 1.0,
            "centroid ({:.3}, {:.3}) too far from ({true_x}, {true_y})",
            b.x_px,
            b.y_px
        );
    }

    #[test]
    fn test_small_blob_is_noise() {
        let mut img = ProjectionImage::filled(200, 200, BEAM);
        // 6x6 = 36 pixels: not strictly above the minimum
        for y in 50..56 {
            for x in 70..76 {
                img.pixels[y * 200 + x] = 100;
            }
        }
        let area = draw_disc(&mut img, 140.0, 140.0, 3.0);
        assert!(area <= 36);

        let beads = detect_beads("p", &img, BEAM, 2, &BeadDetectionConfig::default()).unwrap();
        assert!(beads.is_empty());
    }

    #[test]
    fn test_overflow_is_configuration_error() {
        let mut img = ProjectionImage::filled(300, 300, BEAM);
        draw_disc(&mut img, 60.0, 60.0, 5.0);
        draw_disc(&mut img, 150.0, 150.0, 5.0);
        draw_disc(&mut img, 240.0, 240.0, 5.0);

        let err = detect_beads("proj_007", &img, BEAM, 2, &BeadDetectionConfig::default())
            .unwrap_err();
        match err {
            CalibrationError::Configuration {
                projection,
                detected,
                expected,
                ..
            } => {
                assert_eq!(projection, "proj_007");
                assert_eq!(detected, 3);
                assert_eq!(expected, 2);
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_raster_order_defines_identity() {
        let mut img = ProjectionImage::filled(300, 300, BEAM);
        // Lower-left bead drawn first, upper-right second
        draw_disc(&mut img, 60.0, 220.0, 5.0);
        draw_disc(&mut img, 230.0, 70.0, 5.0);

        let beads = detect_beads("p", &img, BEAM, 2, &BeadDetectionConfig::default()).unwrap();
        assert_eq!(beads.len(), 2);
        // The upper bead is reached first by the raster scan
        assert!((beads[0].y_px - 70.0).abs() < 1.0);
        assert!((beads[1].y_px - 220.0).abs() < 1.0);
    }

    #[test]
    fn test_border_is_not_scanned() {
        let mut img = ProjectionImage::filled(200, 200, BEAM);
        draw_disc(&mut img, 6.0, 100.0, 5.0);
        let beads = detect_beads("p", &img, BEAM, 2, &BeadDetectionConfig::default()).unwrap();
        assert!(beads.is_empty());
    }

    #[test]
    fn test_detector_coordinates() {
        let bead = DetectedBead {
            x_px: 300.0,
            y_px: 100.0,
            pixel_count: 50,
        };
        let (u, v) = bead.detector_coords(512, 400, 0.5);
        assert!((u - 22.0).abs() < 1e-12);
        assert!((v + 50.0).abs() < 1e-12);

        // Odd width: the horizontal origin uses integer division
        let (u, _) = bead.detector_coords(511, 400, 1.0);
        assert!((u - 45.0).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_factor() {
        let config = BeadDetectionConfig::default();
        assert_eq!(bead_threshold(10_000, &config), 8000);
        assert_eq!(bead_threshold(9_999, &config), 7999);
    }
}
