//! Synthetic bead phantom and cone-beam forward projector.
//!
//! Used to generate test sequences with a known geometry. The frame is fixed to
//! the scanner: the rotation axis is `z`, the source sits at `(0, -R, 0)` and the
//! detector origin at `(dx, sqrt(SDD² - dx² - dz²) - R, dz)`, so `SDD` is the
//! distance from the source to the detector origin. The detector axes are the
//! images of `x̂` (columns) and `ẑ` (rows, upwards) under
//!
//! ```text
//! R = Rz(-slant) · Rx(tilt) · Ry(-skew)
//! ```
//!
//! A calibration of a rendered sequence should report `skew`, `tilt`, `slant`,
//! `sdd`, a width centre of `dx / pixel + width / 2` and a height centre of
//! `dz / pixel`.
//!
//! # Example
//!
//! ```
//! use ctgeocal::phantom::{PhantomBead, ScannerGeometry};
//!
//! let geometry = ScannerGeometry::default();
//! let bead = PhantomBead { radius: 20.0, phase: 0.0, height: 10.0 };
//! let (u, v) = geometry.trajectory(&bead, 90);
//! assert_eq!(u.len(), 90);
//! assert!(v.iter().all(|&v| v > 0.0));
//! ```

use std::f64::consts::PI;

use nalgebra::{Rotation3, Vector3};

use crate::projection::ProjectionImage;

/// Misaligned cone-beam scanner. Angles in radians, lengths in mm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScannerGeometry {
    pub skew: f64,
    pub tilt: f64,
    pub slant: f64,
    /// Source to detector-origin distance.
    pub sdd: f64,
    /// Horizontal offset of the detector origin from the central ray.
    pub dx: f64,
    /// Vertical offset of the detector origin from the central ray.
    pub dz: f64,
    /// Source to rotation-axis distance.
    pub source_to_axis: f64,
}

impl Default for ScannerGeometry {
    fn default() -> Self {
        Self {
            skew: 0.0,
            tilt: 0.0,
            slant: 0.0,
            sdd: 1000.0,
            dx: 0.0,
            dz: 0.0,
            source_to_axis: 700.0,
        }
    }
}

/// One bead of the phantom, described in cylindrical coordinates at rotation angle 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhantomBead {
    /// Distance from the rotation axis (mm).
    pub radius: f64,
    /// Azimuth at rotation angle 0 (radians).
    pub phase: f64,
    /// Height along the rotation axis (mm).
    pub height: f64,
}

impl PhantomBead {
    /// World position after rotating the phantom by `angle`.
    pub fn position(&self, angle: f64) -> Vector3<f64> {
        let (s, c) = (angle + self.phase).sin_cos();
        Vector3::new(self.radius * c, self.radius * s, self.height)
    }
}

impl ScannerGeometry {
    fn source(&self) -> Vector3<f64> {
        Vector3::new(0.0, -self.source_to_axis, 0.0)
    }

    fn detector_origin(&self) -> Vector3<f64> {
        let depth = (self.sdd * self.sdd - self.dx * self.dx - self.dz * self.dz).sqrt();
        Vector3::new(self.dx, depth - self.source_to_axis, self.dz)
    }

    fn detector_axes(&self) -> (Vector3<f64>, Vector3<f64>) {
        let r = Rotation3::from_axis_angle(&Vector3::z_axis(), -self.slant)
            * Rotation3::from_axis_angle(&Vector3::x_axis(), self.tilt)
            * Rotation3::from_axis_angle(&Vector3::y_axis(), -self.skew);
        (r * Vector3::x(), r * Vector3::z())
    }

    /// Detector coordinates `(u, v)` in mm of a world point, relative to the
    /// detector origin.
    pub fn project(&self, point: &Vector3<f64>) -> (f64, f64) {
        let s = self.source();
        let o = self.detector_origin();
        let (e_u, e_v) = self.detector_axes();
        let normal = e_u.cross(&e_v);

        let ray = point - s;
        let t = normal.dot(&(o - s)) / normal.dot(&ray);
        let hit = s + ray * t - o;
        (e_u.dot(&hit), e_v.dot(&hit))
    }

    /// `(u, v)` samples of one bead over `n` uniformly spaced rotation angles.
    pub fn trajectory(&self, bead: &PhantomBead, n: usize) -> (Vec<f64>, Vec<f64>) {
        (0..n)
            .map(|i| self.project(&bead.position(rotation_angle(i, n))))
            .unzip()
    }
}

/// Angle of projection `index` out of `n` covering one full turn.
pub fn rotation_angle(index: usize, n: usize) -> f64 {
    2.0 * PI * index as f64 / n as f64
}

/// Detector raster used when rendering projections.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Default: 512
    pub width: u32,
    /// Default: 512
    pub height: u32,
    /// Pixel pitch in mm.
    /// Default: 0.25
    pub pixel_size: f64,
    /// Projected bead radius in pixels.
    /// Default: 4.5
    pub bead_radius: f64,
    /// Unattenuated beam level.
    /// Default: 10000
    pub background: u16,
    /// Level inside a bead shadow.
    /// Default: 1000
    pub bead_value: u16,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            pixel_size: 0.25,
            bead_radius: 4.5,
            background: 10_000,
            bead_value: 1_000,
        }
    }
}

/// Render projection `index` of `n` as flat beam with a dark disc per bead.
///
/// Uses the pixel convention of [`crate::bead_detection::DetectedBead::detector_coords`]:
/// column `u / pixel + width / 2`, row `-v / pixel`.
pub fn render_projection(
    geometry: &ScannerGeometry,
    beads: &[PhantomBead],
    index: usize,
    n: usize,
    config: &RenderConfig,
) -> ProjectionImage {
    let mut image = ProjectionImage::filled(config.width, config.height, config.background);
    let (w, h) = (config.width as i64, config.height as i64);
    let r = config.bead_radius;
    let angle = rotation_angle(index, n);

    for bead in beads {
        let (u, v) = geometry.project(&bead.position(angle));
        let cx = u / config.pixel_size + (config.width / 2) as f64;
        let cy = -v / config.pixel_size;

        let y0 = ((cy - r).floor() as i64).max(0);
        let y1 = ((cy + r).ceil() as i64).min(h - 1);
        let x0 = ((cx - r).floor() as i64).max(0);
        let x1 = ((cx + r).ceil() as i64).min(w - 1);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let (ddx, ddy) = (x as f64 - cx, y as f64 - cy);
                if ddx * ddx + ddy * ddy <= r * r {
                    image.pixels[(y * w + x) as usize] = config.bead_value;
                }
            }
        }
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_scanner_is_pinhole() {
        let g = ScannerGeometry::default();
        let p = Vector3::new(10.0, 0.0, -5.0);
        let (u, v) = g.project(&p);
        let mag = g.sdd / g.source_to_axis;
        assert!((u - 10.0 * mag).abs() < 1e-9, "u {u}");
        assert!((v + 5.0 * mag).abs() < 1e-9, "v {v}");
    }

    #[test]
    fn test_detector_offset_shifts_projection() {
        let g = ScannerGeometry {
            dx: 2.0,
            dz: -1.0,
            ..Default::default()
        };
        // A point on the central ray lands at minus the offset
        let (u, v) = g.project(&Vector3::new(0.0, 0.0, 0.0));
        assert!((u + 2.0).abs() < 1e-9, "u {u}");
        assert!((v - 1.0).abs() < 1e-9, "v {v}");
    }

    #[test]
    fn test_render_disc_centroid() {
        let g = ScannerGeometry {
            dz: 64.0,
            ..Default::default()
        };
        let bead = PhantomBead {
            radius: 0.0,
            phase: 0.0,
            height: 0.0,
        };
        let config = RenderConfig::default();
        let img = render_projection(&g, &[bead], 0, 1, &config);

        let (mut sx, mut sy, mut count) = (0.0, 0.0, 0usize);
        for y in 0..img.height as usize {
            for x in 0..img.width as usize {
                if img.get(x, y) == config.bead_value {
                    sx += x as f64;
                    sy += y as f64;
                    count += 1;
                }
            }
        }
        assert!(count > 36, "disc has {count} pixels");
        // Axis point projects to v = -dz, i.e. row dz / pixel
        assert!((sx / count as f64 - 256.0).abs() < 1e-9);
        assert!((sy / count as f64 - 256.0).abs() < 1e-9);
    }
}
