//! A single projection radiograph and the collaborator that supplies them.
//!
//! Projections are the input of the bead detection process. The calibration
//! pipeline only ever sees them through the [`ImageSource`] trait, so the image
//! format and its metadata handling live outside the core.

use std::path::Path;

/// One 2D radiograph captured at a known rotation angle.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionImage {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Row-major raw detector counts (length `width * height`).
    /// Beads attenuate the beam, so they appear as low-intensity blobs.
    pub pixels: Vec<u16>,
}

impl ProjectionImage {
    /// Create a projection, checking that the buffer matches the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u16>) -> anyhow::Result<Self> {
        let image = Self {
            width,
            height,
            pixels,
        };
        image.check_dimensions()?;
        Ok(image)
    }

    /// Check that the buffer length matches `width * height`.
    ///
    /// The fields are public, so images built without [`new`](Self::new) are
    /// only checked here.
    pub fn check_dimensions(&self) -> anyhow::Result<()> {
        let expected = self.width as usize * self.height as usize;
        anyhow::ensure!(
            self.pixels.len() == expected,
            "Pixel data length ({}) does not match width*height ({}x{}={})",
            self.pixels.len(),
            self.width,
            self.height,
            expected
        );
        Ok(())
    }

    /// A flat image where every pixel has the same value.
    pub fn filled(width: u32, height: u32, value: u16) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width as usize * height as usize],
        }
    }

    /// Pixel value at column `x`, row `y`.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u16 {
        self.pixels[y * self.width as usize + x]
    }
}

/// Supplier of projection images for one acquisition.
///
/// Implementations must be shareable across threads: detection loads
/// projections concurrently, each call owning the buffer it returns.
pub trait ImageSource: Send + Sync {
    /// Ordered identifiers of every projection in the acquisition at `path`.
    ///
    /// The order must follow the true acquisition angle sequence; this is not
    /// checked by the pipeline.
    fn list_projections(&self, path: &Path) -> anyhow::Result<Vec<String>>;

    /// Load the projection named by `id` (one of the identifiers returned by
    /// [`list_projections`](Self::list_projections)).
    fn load_projection(&self, id: &str) -> anyhow::Result<ProjectionImage>;
}
