//! pose_overlay - live pose overlay runner
//!
//! Brings the pose model up, opens the configured camera (or the synthetic
//! `stub://` source), and runs the frame pump until the source is exhausted, the
//! frame limit is reached, or Ctrl-C. Each line on stdin toggles front/back camera.
//! With `--svg-dir` the overlay is written out as SVG snapshots.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;

use pose_overlay::ingest::open_source;
use pose_overlay::overlay::SvgDumpSink;
use pose_overlay::startup::{self, AlwaysGranted, DeviceNodePermission, PermissionGate};
use pose_overlay::{
    CameraFacing, CameraSelector, FramePump, OverlayConfig, OverlaySink, PacedScheduler,
    PumpConfig, PumpFault, PumpParts, SharedOverlay, StartupFault,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the live pose overlay pump")]
struct Args {
    /// Config file (.toml or .json).
    #[arg(long, env = "POSE_OVERLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Source URI override (`stub://...` or a V4L2 device path).
    #[arg(long)]
    source: Option<String>,

    /// Initial camera: front or back.
    #[arg(long)]
    facing: Option<String>,

    /// Stop after this many frames.
    #[arg(long)]
    frames: Option<u64>,

    /// Write SVG overlay snapshots into this directory.
    #[arg(long)]
    svg_dir: Option<PathBuf>,

    /// Write one snapshot every N refreshes.
    #[arg(long, default_value = "30")]
    svg_every: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = OverlayConfig::load_from(args.config.as_deref())?;
    if let Some(uri) = args.source {
        cfg.source.uri = uri;
    }
    let geometry = cfg.geometry()?;
    log::info!(
        "display {}x{} ({:?}, {:?}), tensor {}x{}",
        geometry.display_width,
        geometry.display_height,
        cfg.display.platform,
        cfg.display.orientation,
        geometry.tensor_width,
        geometry.tensor_height
    );

    let mut gate: Box<dyn PermissionGate> = if cfg.source.uri.starts_with("stub://") {
        Box::new(AlwaysGranted)
    } else {
        let mut nodes = vec![PathBuf::from(&cfg.source.uri)];
        if let Some(front) = &cfg.source.front_device {
            nodes.push(PathBuf::from(front));
        }
        Box::new(DeviceNodePermission::new(nodes))
    };
    let model = match startup::prepare(gate.as_mut(), &cfg.model) {
        Ok(model) => model,
        Err(err) => {
            if let Some(fault) = err.downcast_ref::<StartupFault>() {
                log::error!("{} [{}]", fault.user_message(), fault.retry_label());
            }
            return Err(err);
        }
    };

    let facing = match args.facing.as_deref() {
        Some(raw) => raw.parse::<CameraFacing>()?,
        None => cfg.source.initial_facing,
    };
    let selector = CameraSelector::new(facing);
    let source = open_source(&cfg.source, &geometry, selector.clone(), args.frames)?;

    let sink: Box<dyn OverlaySink> = match &args.svg_dir {
        Some(dir) => Box::new(SvgDumpSink::new(
            dir,
            geometry.display_width,
            geometry.display_height,
            cfg.overlay.marker.clone(),
            args.svg_every,
        )?),
        None => Box::new(SharedOverlay::new()),
    };

    let parts = PumpParts {
        source,
        model,
        sink,
        scheduler: Box::new(PacedScheduler::new(cfg.pump.target_fps)),
    };
    let mut pump = FramePump::new(parts, PumpConfig::from_config(&cfg, geometry));

    let handle = pump.handle();
    ctrlc::set_handler(move || {
        handle.stop();
    })
    .context("install Ctrl-C handler")?;

    spawn_camera_toggle(selector)?;

    pump.start()?;
    match pump.join() {
        Ok(stats) => {
            log::info!(
                "done: {} iterations, {} poses, {} markers, {} transient faults, {:.1} fps",
                stats.iterations,
                stats.poses_detected,
                stats.markers_published,
                stats.transient_faults,
                stats.fps
            );
            Ok(())
        }
        Err(err) => {
            if let Some(fault) = err.downcast_ref::<PumpFault>() {
                log::error!("pump fault {}", fault.code());
            }
            Err(err)
        }
    }
}

/// Each line on stdin flips the camera. Detached: exits with the process.
fn spawn_camera_toggle(selector: CameraSelector) -> Result<()> {
    std::thread::Builder::new()
        .name("camera-toggle".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                if line.is_err() {
                    break;
                }
                let facing = selector.toggle();
                log::info!("camera switched to {:?}", facing);
            }
        })
        .context("spawn camera toggle thread")?;
    Ok(())
}
