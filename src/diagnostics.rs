//! Raw binary dumps for inspecting a run after the fact.
//!
//! Files are flat, headerless and native-endian: a pixel snapshot is the
//! row-major `u16` buffer of one projection, a scalar snapshot is a sequence of
//! `f64`. Load them with any tool that reads raw arrays.

use std::fs;
use std::path::Path;

use anyhow::Context;

/// Write a projection's pixel buffer to `path`, creating parent directories.
pub fn write_pixel_snapshot(path: &Path, pixels: &[u16]) -> anyhow::Result<()> {
    write_raw(path, bytemuck::cast_slice(pixels))
}

/// Write a sequence of scalars to `path`, creating parent directories.
pub fn write_scalar_snapshot(path: &Path, values: &[f64]) -> anyhow::Result<()> {
    write_raw(path, bytemuck::cast_slice(values))
}

fn write_raw(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}
