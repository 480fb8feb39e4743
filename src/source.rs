//! Image source backed by a directory of image files.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::projection::{ImageSource, ProjectionImage};

/// Lists the image files of one directory and decodes them to 16-bit luma.
///
/// Projections are ordered by file name, so acquisitions must be named so that
/// lexicographic order matches the rotation order (`proj_0000.png`, ...).
/// Identifiers are the full file paths.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    /// Lower-case file extensions (without the dot) considered projections.
    pub extensions: Vec<String>,
}

impl Default for DirectorySource {
    fn default() -> Self {
        Self::with_extensions(["png", "tif", "tiff"])
    }
}

impl DirectorySource {
    pub fn with_extensions<S: AsRef<str>>(extensions: impl IntoIterator<Item = S>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

impl ImageSource for DirectorySource {
    fn list_projections(&self, path: &Path) -> anyhow::Result<Vec<String>> {
        let entries = std::fs::read_dir(path)
            .with_context(|| format!("Failed to list projections in {}", path.display()))?;

        let mut files: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let p = entry?.path();
            if p.is_file() && self.accepts(&p) {
                files.push(p);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        Ok(files
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect())
    }

    fn load_projection(&self, id: &str) -> anyhow::Result<ProjectionImage> {
        let img = image::open(id).with_context(|| format!("Failed to open image: {id}"))?;
        let luma = img.into_luma16();
        let (width, height) = luma.dimensions();
        ProjectionImage::new(width, height, luma.into_raw())
    }
}

/// Write a projection as a 16-bit grayscale image; the format follows the extension.
pub fn save_projection(path: &Path, image: &ProjectionImage) -> anyhow::Result<()> {
    let buf: image::ImageBuffer<image::Luma<u16>, Vec<u16>> =
        image::ImageBuffer::from_raw(image.width, image.height, image.pixels.clone())
            .context("Pixel buffer does not match image dimensions")?;
    buf.save(path)
        .with_context(|| format!("Failed to write image: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_sorted_and_filtered() {
        let dir = std::env::temp_dir().join(format!("ctgeocal-source-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut img = ProjectionImage::filled(8, 4, 1000);
        img.pixels[9] = 65_000;
        for name in ["b.png", "a.png", "c.PNG"] {
            save_projection(&dir.join(name), &img).unwrap();
        }
        std::fs::write(dir.join("notes.txt"), "not an image").unwrap();

        let source = DirectorySource::default();
        let ids = source.list_projections(&dir).unwrap();
        let names: Vec<String> = ids
            .iter()
            .map(|id| Path::new(id).file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.PNG"]);

        let loaded = source.load_projection(&ids[0]).unwrap();
        assert_eq!(loaded, img);

        assert!(source.load_projection(&dir.join("notes.txt").to_string_lossy()).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
