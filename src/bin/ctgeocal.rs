//! ctgeocal CLI: calibrate a cone-beam scanner from a directory of projections,
//! or write a synthetic phantom sequence to try it on.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ctgeocal::phantom::{render_projection, PhantomBead, RenderConfig, ScannerGeometry};
use ctgeocal::source::{save_projection, DirectorySource};
use ctgeocal::{
    CalibrationConfig, CalibrationEvent, CalibrationOutcome, CalibrationRequest, Calibrator,
    GeometryParameters,
};

#[derive(Parser)]
#[command(name = "ctgeocal")]
#[command(about = "Geometric calibration of cone-beam CT scanners from bead-phantom projections")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate from a directory of projection images.
    Calibrate(CalibrateArgs),

    /// Write a synthetic bead-phantom sequence as 16-bit PNGs.
    Simulate(SimulateArgs),
}

#[derive(Debug, Clone, Args)]
struct CalibrateArgs {
    /// Directory holding the projections, named in acquisition order.
    dir: PathBuf,

    /// Detector pixel pitch in mm.
    #[arg(long, default_value = "0.273")]
    pixel_size: f64,

    /// Number of beads in the phantom.
    #[arg(long, default_value = "2")]
    beads: usize,

    /// Use every n-th projection.
    #[arg(long, default_value = "1")]
    stride: usize,

    /// Write raw pixel and trajectory dumps here.
    #[arg(long)]
    diagnostics_dir: Option<PathBuf>,

    /// Comma-separated image file extensions to read.
    #[arg(long, default_value = "png,tif,tiff")]
    extension: String,

    /// Detect beads one projection at a time.
    #[arg(long)]
    sequential: bool,
}

#[derive(Debug, Clone, Args)]
struct SimulateArgs {
    /// Output directory.
    out: PathBuf,

    /// Number of projections over one turn.
    #[arg(long, default_value = "360")]
    projections: usize,

    /// Detector skew in radians.
    #[arg(long, default_value = "0.01")]
    skew: f64,

    /// Detector tilt in radians.
    #[arg(long, default_value = "0.02")]
    tilt: f64,

    /// Detector slant in radians.
    #[arg(long, default_value = "0.015")]
    slant: f64,

    /// Source to detector distance in mm.
    #[arg(long, default_value = "1000.0")]
    sdd: f64,

    /// Source to rotation axis distance in mm.
    #[arg(long, default_value = "700.0")]
    source_to_axis: f64,

    /// Horizontal detector offset in mm.
    #[arg(long, default_value = "0.5", allow_hyphen_values = true)]
    dx: f64,

    /// Vertical detector offset in mm.
    #[arg(long, default_value = "64.0", allow_hyphen_values = true)]
    dz: f64,

    /// Detector pixel pitch in mm.
    #[arg(long, default_value = "0.25")]
    pixel_size: f64,

    /// Detector size in pixels (square).
    #[arg(long, default_value = "512")]
    size: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Commands::Calibrate(args) => calibrate(args).await,
        Commands::Simulate(args) => simulate(args),
    }
}

async fn calibrate(args: CalibrateArgs) -> anyhow::Result<()> {
    let source = DirectorySource::with_extensions(args.extension.split(','));
    let config = CalibrationConfig {
        parallel: !args.sequential,
        diagnostics_dir: args.diagnostics_dir,
        ..Default::default()
    };
    let mut run = Calibrator::new(Arc::new(source), config).start(CalibrationRequest {
        path: args.dir,
        pixel_size: args.pixel_size,
        bead_count: args.beads,
        projection_stride: args.stride,
    })?;

    let cancel = run.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling calibration");
            cancel.cancel();
        }
    });

    let mut last_decile = None;
    while let Some(event) = run.next_event().await {
        match event {
            CalibrationEvent::Progress { phase, percent } => {
                let decile = (percent / 10.0) as u32;
                if last_decile != Some((phase, decile)) {
                    info!("{}: {:.0}%", phase, percent);
                    last_decile = Some((phase, decile));
                }
            }
            CalibrationEvent::BeadExcluded(e) => warn!("Bead {} excluded: {}", e.bead, e.reason),
            _ => {}
        }
    }

    match run.outcome().await {
        CalibrationOutcome::Completed(result) => {
            print_parameters(&result.parameters);
            Ok(())
        }
        CalibrationOutcome::Cancelled => {
            warn!("Calibration cancelled, no result");
            Ok(())
        }
        CalibrationOutcome::Failed { phase, error } => {
            Err(anyhow::Error::new(error).context(format!("calibration failed during {phase}")))
        }
    }
}

fn print_parameters(p: &GeometryParameters) {
    println!("Beads used:     {}", p.bead_count);
    println!("Skew angle:     {:+.6} ± {:.6} rad", p.skew.mean, p.skew.std_dev);
    println!("Tilt angle:     {:+.6} ± {:.6} rad", p.tilt.mean, p.tilt.std_dev);
    println!("Slant angle:    {:+.6} ± {:.6} rad", p.slant.mean, p.slant.std_dev);
    println!("Width center:   {:.3} ± {:.3} px", p.width_center.mean, p.width_center.std_dev);
    println!("Height center:  {:.3} ± {:.3} px", p.height_center.mean, p.height_center.std_dev);
    println!("SDD:            {:.3} ± {:.3} mm", p.sdd.mean, p.sdd.std_dev);
}

fn simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let geometry = ScannerGeometry {
        skew: args.skew,
        tilt: args.tilt,
        slant: args.slant,
        sdd: args.sdd,
        dx: args.dx,
        dz: args.dz,
        source_to_axis: args.source_to_axis,
    };
    let beads = [
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
    ];
    let render = RenderConfig {
        width: args.size,
        height: args.size,
        pixel_size: args.pixel_size,
        ..Default::default()
    };

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("Failed to create {}", args.out.display()))?;

    let n = args.projections;
    (0..n).into_par_iter().try_for_each(|i| {
        let image = render_projection(&geometry, &beads, i, n, &render);
        save_projection(&args.out.join(format!("proj_{i:04}.png")), &image)
    })?;

    info!("Wrote {} projections to {}", n, args.out.display());
    info!(
        "Expected width center {:.3} px, height center {:.3} px",
        args.dx / args.pixel_size + (args.size / 2) as f64,
        args.dz / args.pixel_size
    );
    Ok(())
}
