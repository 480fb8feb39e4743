//! Calibration run orchestration: phases, cancellation and progress.
//!
//! A run goes through
//!
//! ```text
//! Idle → Preparing → Detecting → Analyzing → Aggregating → Completed
//! ```
//!
//! and can end in `Cancelled` or `Failed` from any running state.
//!
//! 1. **Preparing**: list the projections, apply the stride, and estimate the
//!    raw beam from the middle projection.
//! 2. **Detecting**: load every sampled projection and detect its beads, in
//!    parallel. Positions are gathered first and written into the trajectory
//!    table only once every projection is done.
//! 3. **Analyzing**: harmonic analysis and the closed-form geometry solve.
//! 4. **Aggregating**: mean and standard deviation across beads.
//!
//! [`Calibrator::start`] runs this on a Tokio blocking task and hands back a
//! [`CalibrationRun`] for events, state and cancellation. Cancellation is
//! cooperative: it is checked before and after loading each projection and
//! between phases, and a cancelled run discards everything it computed.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ctgeocal::{CalibrationConfig, CalibrationOutcome, CalibrationRequest, Calibrator};
//! use ctgeocal::source::DirectorySource;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let calibrator = Calibrator::new(Arc::new(DirectorySource::default()), CalibrationConfig::default());
//! let run = calibrator.start(CalibrationRequest {
//!     path: "scans/phantom".into(),
//!     pixel_size: 0.273,
//!     bead_count: 2,
//!     projection_stride: 1,
//! })?;
//! match run.outcome().await {
//!     CalibrationOutcome::Completed(result) => println!("SDD {:.2}", result.parameters.sdd.mean),
//!     CalibrationOutcome::Cancelled => println!("cancelled"),
//!     CalibrationOutcome::Failed { phase, error } => println!("{phase:?}: {error}"),
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::prelude::*;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bead_detection::{detect_beads, BeadDetectionConfig};
use crate::beam::{estimate_raw_beam, BeamConfig};
use crate::diagnostics;
use crate::error::{CalibrationError, ErrorKind, Result};
use crate::harmonic::{self, MIN_SAMPLES};
use crate::projection::{ImageSource, ProjectionImage};
use crate::solver::{solve_geometry, BeadExclusion, SolverConfig, MIN_BEADS};
use crate::statistics::{aggregate, GeometryParameters};
use crate::trajectory::TrajectoryTable;

// ── Configuration ──

/// Settings shared by every run of a [`Calibrator`].
#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    pub beam: BeamConfig,
    pub detection: BeadDetectionConfig,
    pub solver: SolverConfig,
    /// Detect beads in several projections at once on the rayon pool.
    /// Default: true
    pub parallel: bool,
    /// Directory for raw diagnostic dumps. Nothing is written when `None`.
    /// Default: None
    pub diagnostics_dir: Option<PathBuf>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            beam: BeamConfig::default(),
            detection: BeadDetectionConfig::default(),
            solver: SolverConfig::default(),
            parallel: true,
            diagnostics_dir: None,
        }
    }
}

/// What to calibrate.
#[derive(Debug, Clone)]
pub struct CalibrationRequest {
    /// Acquisition location, interpreted by the [`ImageSource`].
    pub path: PathBuf,
    /// Detector pixel pitch (mm).
    /// Default: 0.273
    pub pixel_size: f64,
    /// Number of beads in the phantom.
    /// Default: 2
    pub bead_count: usize,
    /// Use every `projection_stride`-th projection.
    /// Default: 1
    pub projection_stride: usize,
}

impl Default for CalibrationRequest {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            pixel_size: 0.273,
            bead_count: 2,
            projection_stride: 1,
        }
    }
}

impl CalibrationRequest {
    /// Check the inputs that do not depend on the acquisition itself.
    pub fn validate(&self) -> Result<()> {
        if self.bead_count < MIN_BEADS {
            return Err(CalibrationError::Precondition(format!(
                "at least {} beads are required, got {}",
                MIN_BEADS, self.bead_count
            )));
        }
        if self.pixel_size.is_nan() || self.pixel_size <= 0.0 {
            return Err(CalibrationError::Precondition(format!(
                "pixel size must be positive, got {}",
                self.pixel_size
            )));
        }
        if self.projection_stride == 0 {
            return Err(CalibrationError::Precondition(
                "projection stride must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ── Run state and events ──

/// A working phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Preparing,
    Detecting,
    Analyzing,
    Aggregating,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Observable state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Started but not yet picked up by a worker.
    Idle,
    Preparing,
    Detecting,
    Analyzing,
    Aggregating,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    /// True until the run reaches a terminal state.
    pub fn is_active(self) -> bool {
        !matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed
        )
    }

    pub fn phase(self) -> Option<Phase> {
        match self {
            RunState::Preparing => Some(Phase::Preparing),
            RunState::Detecting => Some(Phase::Detecting),
            RunState::Analyzing => Some(Phase::Analyzing),
            RunState::Aggregating => Some(Phase::Aggregating),
            _ => None,
        }
    }
}

impl From<Phase> for RunState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Preparing => RunState::Preparing,
            Phase::Detecting => RunState::Detecting,
            Phase::Analyzing => RunState::Analyzing,
            Phase::Aggregating => RunState::Aggregating,
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct CalibrationResult {
    pub parameters: GeometryParameters,
    /// Beads dropped by the solver.
    pub excluded: Vec<BeadExclusion>,
    /// Number of projections that were analysed (after the stride).
    pub projection_count: usize,
    /// Raw beam baseline used for thresholding.
    pub raw_beam: u16,
}

/// Notifications sent while a run progresses.
///
/// Every run emits `Started` first and exactly one of `Completed`,
/// `Cancelled` or `Failed` last.
#[derive(Debug, Clone)]
pub enum CalibrationEvent {
    Started,
    Progress { phase: Phase, percent: f64 },
    BeadExcluded(BeadExclusion),
    Completed(CalibrationResult),
    Cancelled,
    Failed {
        phase: Phase,
        kind: ErrorKind,
        detail: String,
    },
}

/// How a run ended.
#[derive(Debug)]
pub enum CalibrationOutcome {
    Completed(CalibrationResult),
    Cancelled,
    Failed {
        phase: Phase,
        error: CalibrationError,
    },
}

// ── Calibrator ──

/// Entry point for calibration runs.
///
/// Each run builds its own pipeline, so a calibrator can be reused and runs
/// never share state.
#[derive(Clone)]
pub struct Calibrator {
    source: Arc<dyn ImageSource>,
    config: CalibrationConfig,
}

impl Calibrator {
    pub fn new(source: Arc<dyn ImageSource>, config: CalibrationConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Start a run on a Tokio blocking task.
    ///
    /// Must be called from within a Tokio runtime. Request preconditions are
    /// checked here and returned immediately; everything else is reported
    /// through the run.
    pub fn start(&self, request: CalibrationRequest) -> Result<CalibrationRun> {
        request.validate()?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(RunState::Idle);
        let cancel = Arc::new(AtomicBool::new(false));

        let pipeline = Pipeline {
            source: self.source.clone(),
            config: self.config.clone(),
            request,
            cancel: cancel.clone(),
            events: event_tx,
            state: state_tx,
        };
        let handle = tokio::task::spawn_blocking(move || pipeline.run());

        Ok(CalibrationRun {
            cancel: CancelHandle {
                flag: cancel,
                state: state_rx,
            },
            events: event_rx,
            handle,
        })
    }

    /// Run a calibration to completion on the calling thread.
    ///
    /// For callers without an async runtime. Events are discarded and the run
    /// cannot be cancelled.
    pub fn calibrate(&self, request: CalibrationRequest) -> Result<CalibrationResult> {
        request.validate()?;
        let (events, _) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(RunState::Idle);
        let pipeline = Pipeline {
            source: self.source.clone(),
            config: self.config.clone(),
            request,
            cancel: Arc::new(AtomicBool::new(false)),
            events,
            state,
        };
        match pipeline.run() {
            CalibrationOutcome::Completed(result) => Ok(result),
            CalibrationOutcome::Failed { error, .. } => Err(error),
            CalibrationOutcome::Cancelled => Err(CalibrationError::Precondition(
                "run was cancelled".into(),
            )),
        }
    }
}

/// Blocking calibration with an explicit source and configuration.
pub fn calibrate(
    source: Arc<dyn ImageSource>,
    config: CalibrationConfig,
    request: CalibrationRequest,
) -> Result<CalibrationResult> {
    Calibrator::new(source, config).calibrate(request)
}

/// Handle to one running calibration.
pub struct CalibrationRun {
    cancel: CancelHandle,
    events: mpsc::UnboundedReceiver<CalibrationEvent>,
    handle: JoinHandle<CalibrationOutcome>,
}

/// Cloneable handle that can cancel a run from another task.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    state: watch::Receiver<RunState>,
}

impl CancelHandle {
    /// Request cooperative cancellation.
    ///
    /// Returns `false` (and does nothing) if the run is no longer active.
    pub fn cancel(&self) -> bool {
        let state = *self.state.borrow();
        if !state.is_active() {
            warn!("Cancel requested but the run is not active ({:?})", state);
            return false;
        }
        self.flag.store(true, Ordering::SeqCst);
        info!("Cancellation requested");
        true
    }
}

impl CalibrationRun {
    /// Current state of the run.
    pub fn state(&self) -> RunState {
        *self.cancel.state.borrow()
    }

    /// A receiver that can be awaited for state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.cancel.state.clone()
    }

    /// Next event, or `None` once the run has ended and all events were read.
    pub async fn next_event(&mut self) -> Option<CalibrationEvent> {
        self.events.recv().await
    }

    /// See [`CancelHandle::cancel`].
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the run to end.
    ///
    /// A panic inside the run (for example in an [`ImageSource`]) is resumed
    /// on the awaiting task.
    pub async fn outcome(self) -> CalibrationOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                // Only a runtime shutdown aborts a blocking task.
                warn!("Calibration task aborted: {}", e);
                CalibrationOutcome::Cancelled
            }
        }
    }
}

// ── Pipeline ──

enum Interrupt {
    Cancelled,
    Failed(Phase, CalibrationError),
}

fn failed(phase: Phase) -> impl Fn(CalibrationError) -> Interrupt {
    move |e| Interrupt::Failed(phase, e)
}

struct Prepared {
    /// Sampled projection identifiers, in acquisition order.
    ids: Vec<String>,
    raw_beam: u16,
    width: u32,
}

struct Pipeline {
    source: Arc<dyn ImageSource>,
    config: CalibrationConfig,
    request: CalibrationRequest,
    cancel: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<CalibrationEvent>,
    state: watch::Sender<RunState>,
}

impl Pipeline {
    fn run(self) -> CalibrationOutcome {
        self.emit(CalibrationEvent::Started);
        info!(
            "Calibrating {} ({} beads, pixel {} mm, stride {})",
            self.request.path.display(),
            self.request.bead_count,
            self.request.pixel_size,
            self.request.projection_stride
        );

        match self.run_phases() {
            Ok(result) => {
                self.state.send_replace(RunState::Completed);
                self.emit(CalibrationEvent::Completed(result.clone()));
                CalibrationOutcome::Completed(result)
            }
            Err(Interrupt::Cancelled) => {
                info!("Calibration cancelled");
                self.state.send_replace(RunState::Cancelled);
                self.emit(CalibrationEvent::Cancelled);
                CalibrationOutcome::Cancelled
            }
            Err(Interrupt::Failed(phase, error)) => {
                error!("Calibration failed during {}: {}", phase, error);
                self.state.send_replace(RunState::Failed);
                self.emit(CalibrationEvent::Failed {
                    phase,
                    kind: error.kind(),
                    detail: error.to_string(),
                });
                CalibrationOutcome::Failed { phase, error }
            }
        }
    }

    fn run_phases(&self) -> std::result::Result<CalibrationResult, Interrupt> {
        self.enter(Phase::Preparing)?;
        let prepared = self.prepare().map_err(failed(Phase::Preparing))?;
        self.progress(Phase::Preparing, 100.0);

        self.enter(Phase::Detecting)?;
        let table = self.detect(&prepared)?;

        self.enter(Phase::Analyzing)?;
        let coefficients = harmonic::analyze(&table);
        let solution = solve_geometry(
            &coefficients,
            self.request.pixel_size,
            &self.config.solver,
        )
        .map_err(failed(Phase::Analyzing))?;
        for exclusion in &solution.excluded {
            self.emit(CalibrationEvent::BeadExcluded(*exclusion));
        }
        self.progress(Phase::Analyzing, 100.0);

        self.enter(Phase::Aggregating)?;
        let parameters = aggregate(&solution.estimates, prepared.width);
        self.progress(Phase::Aggregating, 100.0);
        log_parameters(&parameters);

        Ok(CalibrationResult {
            parameters,
            excluded: solution.excluded,
            projection_count: prepared.ids.len(),
            raw_beam: prepared.raw_beam,
        })
    }

    fn prepare(&self) -> Result<Prepared> {
        let path = &self.request.path;
        let all = self
            .source
            .list_projections(path)
            .map_err(|source| CalibrationError::ImageRead {
                projection: path.display().to_string(),
                source,
            })?;

        let stride = self.request.projection_stride;
        let ids: Vec<String> = all
            .iter()
            .step_by(stride)
            .take(all.len() / stride)
            .cloned()
            .collect();
        if ids.len() < MIN_SAMPLES {
            return Err(CalibrationError::Precondition(format!(
                "{} projections at stride {} give {} samples, need at least {}",
                all.len(),
                stride,
                ids.len(),
                MIN_SAMPLES
            )));
        }

        let reference_id = &all[all.len() / 2];
        let reference = self.load(reference_id)?;
        let raw_beam = estimate_raw_beam(&reference, &self.config.beam)?;
        info!(
            "{} projections, {} sampled; raw beam {} from {}",
            all.len(),
            ids.len(),
            raw_beam,
            reference_id
        );

        Ok(Prepared {
            ids,
            raw_beam,
            width: reference.width,
        })
    }

    fn detect(&self, prepared: &Prepared) -> std::result::Result<TrajectoryTable, Interrupt> {
        let n = prepared.ids.len();
        // Counted and sent under one lock so percentages arrive in order.
        let done = Mutex::new(0usize);

        let detect_one = |id: &String| -> std::result::Result<Vec<(f64, f64)>, Interrupt> {
            self.check_cancelled()?;
            let image = self.load(id).map_err(failed(Phase::Detecting))?;
            self.check_cancelled()?;

            let positions = self
                .detect_projection(id, &image, prepared.raw_beam)
                .map_err(failed(Phase::Detecting))?;

            let mut finished = done.lock().unwrap_or_else(PoisonError::into_inner);
            *finished += 1;
            self.progress(Phase::Detecting, 100.0 * *finished as f64 / n as f64);
            Ok(positions)
        };

        // Join barrier: every projection is processed before the table is written.
        let positions: Vec<Vec<(f64, f64)>> = if self.config.parallel {
            prepared.ids.par_iter().map(&detect_one).collect::<std::result::Result<_, _>>()?
        } else {
            prepared.ids.iter().map(&detect_one).collect::<std::result::Result<_, _>>()?
        };
        self.check_cancelled()?;

        let mut table = TrajectoryTable::new(self.request.bead_count, n);
        for (index, beads) in positions.iter().enumerate() {
            for (bead, &uv) in beads.iter().enumerate() {
                table.set(bead, index, uv);
            }
        }
        debug_assert!(table.is_complete());
        self.dump_trajectories(&table);
        Ok(table)
    }

    fn detect_projection(
        &self,
        id: &str,
        image: &ProjectionImage,
        raw_beam: u16,
    ) -> Result<Vec<(f64, f64)>> {
        let expected = self.request.bead_count;
        let beads = match detect_beads(id, image, raw_beam, expected, &self.config.detection) {
            Ok(beads) => beads,
            Err(err) => return Err(self.attach_snapshot(err, id, image)),
        };
        if beads.len() != expected {
            let err = CalibrationError::Configuration {
                projection: id.to_string(),
                detected: beads.len(),
                expected,
                snapshot: None,
            };
            return Err(self.attach_snapshot(err, id, image));
        }

        Ok(beads
            .iter()
            .map(|b| b.detector_coords(image.width, image.height, self.request.pixel_size))
            .collect())
    }

    fn load(&self, id: &str) -> Result<ProjectionImage> {
        self.source
            .load_projection(id)
            .and_then(|image| image.check_dimensions().map(|()| image))
            .map_err(|source| CalibrationError::ImageRead {
                projection: id.to_string(),
                source,
            })
    }

    // ── Diagnostics ──

    fn attach_snapshot(
        &self,
        err: CalibrationError,
        id: &str,
        image: &ProjectionImage,
    ) -> CalibrationError {
        let Some(dir) = self.config.diagnostics_dir.as_ref() else {
            return err;
        };
        match err {
            CalibrationError::Configuration {
                projection,
                detected,
                expected,
                ..
            } => {
                let path = dir.join(format!("{}_pixels.raw", file_label(id)));
                let snapshot = match diagnostics::write_pixel_snapshot(&path, &image.pixels) {
                    Ok(()) => {
                        info!(
                            "Wrote {}x{} pixel snapshot to {}",
                            image.width,
                            image.height,
                            path.display()
                        );
                        Some(path)
                    }
                    Err(e) => {
                        warn!("Could not write pixel snapshot: {:#}", e);
                        None
                    }
                };
                CalibrationError::Configuration {
                    projection,
                    detected,
                    expected,
                    snapshot,
                }
            }
            other => other,
        }
    }

    fn dump_trajectories(&self, table: &TrajectoryTable) {
        let Some(dir) = &self.config.diagnostics_dir else {
            return;
        };
        for (name, values) in [("trajectory_u.raw", table.u()), ("trajectory_v.raw", table.v())] {
            if let Err(e) = diagnostics::write_scalar_snapshot(&dir.join(name), values) {
                warn!("Could not write {}: {:#}", name, e);
            }
        }
    }

    // ── State and events ──

    fn enter(&self, phase: Phase) -> std::result::Result<(), Interrupt> {
        self.check_cancelled()?;
        self.state.send_replace(phase.into());
        debug!("Entering {}", phase);
        self.progress(phase, 0.0);
        Ok(())
    }

    fn check_cancelled(&self) -> std::result::Result<(), Interrupt> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(Interrupt::Cancelled)
        } else {
            Ok(())
        }
    }

    fn progress(&self, phase: Phase, percent: f64) {
        self.emit(CalibrationEvent::Progress { phase, percent });
    }

    fn emit(&self, event: CalibrationEvent) {
        // The caller may have dropped the run handle; events are then discarded.
        let _ = self.events.send(event);
    }
}

/// File name of a projection identifier, for naming diagnostic files.
fn file_label(id: &str) -> String {
    Path::new(id)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| id.replace(['/', '\\'], "_"))
}

fn log_parameters(p: &GeometryParameters) {
    info!("Geometry from {} beads:", p.bead_count);
    info!("  skew          {:+.6} ± {:.6} rad", p.skew.mean, p.skew.std_dev);
    info!("  tilt          {:+.6} ± {:.6} rad", p.tilt.mean, p.tilt.std_dev);
    info!("  slant         {:+.6} ± {:.6} rad", p.slant.mean, p.slant.std_dev);
    info!("  width center  {:.3} ± {:.3} px", p.width_center.mean, p.width_center.std_dev);
    info!("  height center {:.3} ± {:.3} px", p.height_center.mean, p.height_center.std_dev);
    info!("  SDD           {:.3} ± {:.3}", p.sdd.mean, p.sdd.std_dev);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_preconditions() {
        assert!(CalibrationRequest::default().validate().is_ok());

        let bad = [
            CalibrationRequest {
                bead_count: 1,
                ..Default::default()
            },
            CalibrationRequest {
                pixel_size: 0.0,
                ..Default::default()
            },
            CalibrationRequest {
                pixel_size: f64::NAN,
                ..Default::default()
            },
            CalibrationRequest {
                projection_stride: 0,
                ..Default::default()
            },
        ];
        for request in bad {
            let err = request.validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Precondition, "{request:?}");
        }
    }

    #[test]
    fn test_run_state_activity() {
        assert!(RunState::Idle.is_active());
        assert!(RunState::Detecting.is_active());
        assert!(!RunState::Completed.is_active());
        assert!(!RunState::Cancelled.is_active());
        assert!(!RunState::Failed.is_active());
        assert_eq!(RunState::from(Phase::Analyzing).phase(), Some(Phase::Analyzing));
        assert_eq!(RunState::Failed.phase(), None);
    }

    #[test]
    fn test_file_label() {
        assert_eq!(file_label("/data/scan/proj_0042.png"), "proj_0042");
        assert_eq!(file_label("p7"), "p7");
    }
}
