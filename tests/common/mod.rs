//! Shared synthetic image sources for the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use ctgeocal::phantom::{render_projection, PhantomBead, RenderConfig, ScannerGeometry};
use ctgeocal::{ImageSource, ProjectionImage};

/// Misaligned scanner used throughout the tests (mm, radians).
pub fn test_geometry() -> ScannerGeometry {
    ScannerGeometry {
        skew: 0.01,
        tilt: 0.02,
        slant: 0.015,
        sdd: 1000.0,
        dx: 0.5,
        dz: 64.0,
        source_to_axis: 700.0,
    }
}

/// Two beads well apart in height, so their raster order never swaps.
pub fn two_beads() -> Vec<PhantomBead> {
    vec![
        PhantomBead {
            radius: 20.0,
            phase: 0.3,
            height: 25.0,
        },
        PhantomBead {
            radius: 18.0,
            phase: 1.7,
            height: -22.0,
        },
    ]
}

/// Renders phantom projections on demand; identifiers are `proj_NNNN`.
pub struct PhantomSource {
    pub geometry: ScannerGeometry,
    pub beads: Vec<PhantomBead>,
    pub projections: usize,
    pub render: RenderConfig,
}

impl PhantomSource {
    pub fn new(beads: Vec<PhantomBead>, projections: usize) -> Self {
        Self {
            geometry: test_geometry(),
            beads,
            projections,
            render: RenderConfig::default(),
        }
    }
}

impl ImageSource for PhantomSource {
    fn list_projections(&self, _path: &Path) -> anyhow::Result<Vec<String>> {
        Ok((0..self.projections).map(|i| format!("proj_{i:04}")).collect())
    }

    fn load_projection(&self, id: &str) -> anyhow::Result<ProjectionImage> {
        let index: usize = id
            .strip_prefix("proj_")
            .ok_or_else(|| anyhow::anyhow!("unknown projection {id}"))?
            .parse()?;
        anyhow::ensure!(index < self.projections, "projection {id} out of range");
        Ok(render_projection(
            &self.geometry,
            &self.beads,
            index,
            self.projections,
            &self.render,
        ))
    }
}

/// Lets the first load through, then blocks every load until [`GatedSource::open`].
pub struct GatedSource {
    inner: PhantomSource,
    loads: AtomicUsize,
    gate: Mutex<bool>,
    opened: Condvar,
}

impl GatedSource {
    pub fn new(inner: PhantomSource) -> Self {
        Self {
            inner,
            loads: AtomicUsize::new(0),
            gate: Mutex::new(false),
            opened: Condvar::new(),
        }
    }

    pub fn open(&self) {
        *self.gate.lock().unwrap() = true;
        self.opened.notify_all();
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ImageSource for GatedSource {
    fn list_projections(&self, path: &Path) -> anyhow::Result<Vec<String>> {
        self.inner.list_projections(path)
    }

    fn load_projection(&self, id: &str) -> anyhow::Result<ProjectionImage> {
        if self.loads.fetch_add(1, Ordering::SeqCst) > 0 {
            let mut open = self.gate.lock().unwrap();
            while !*open {
                open = self.opened.wait(open).unwrap();
            }
        }
        self.inner.load_projection(id)
    }
}

/// Fails to load one specific projection.
pub struct FaultySource {
    pub inner: PhantomSource,
    pub broken: String,
}

impl ImageSource for FaultySource {
    fn list_projections(&self, path: &Path) -> anyhow::Result<Vec<String>> {
        self.inner.list_projections(path)
    }

    fn load_projection(&self, id: &str) -> anyhow::Result<ProjectionImage> {
        anyhow::ensure!(id != self.broken, "sensor readout timed out");
        self.inner.load_projection(id)
    }
}

/// Hands out images whose buffer is one pixel short for one projection.
pub struct TruncatingSource {
    pub inner: PhantomSource,
    pub truncated: String,
}

impl ImageSource for TruncatingSource {
    fn list_projections(&self, path: &Path) -> anyhow::Result<Vec<String>> {
        self.inner.list_projections(path)
    }

    fn load_projection(&self, id: &str) -> anyhow::Result<ProjectionImage> {
        let mut image = self.inner.load_projection(id)?;
        if id == self.truncated {
            image.pixels.pop();
        }
        Ok(image)
    }
}

/// Panics while loading one specific projection.
pub struct PanickingSource {
    pub inner: PhantomSource,
    pub broken: String,
}

impl ImageSource for PanickingSource {
    fn list_projections(&self, path: &Path) -> anyhow::Result<Vec<String>> {
        self.inner.list_projections(path)
    }

    fn load_projection(&self, id: &str) -> anyhow::Result<ProjectionImage> {
        if id == self.broken {
            panic!("decoder crashed on {id}");
        }
        self.inner.load_projection(id)
    }
}
