//! Frame pump.
//!
//! A single worker thread pulls one frame at a time from a `FrameSource`, runs the
//! `PoseModel` on it, hands the frame back, maps the first pose into display space
//! and publishes the overlay. Iterations never overlap.
//!
//! The pump's lifecycle is `Idle -> Running -> Stopped` (or `Idle -> Stopped`) and
//! never goes back. `stop` only flips the state; the worker notices at the top of the
//! next iteration or right after a blocking call returns. An in-flight inference is
//! never interrupted.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::{DisplayGeometry, MirrorPolicy, OverlayConfig};
use crate::frame::FrameLease;
use crate::ingest::FrameSource;
use crate::mapper::CoordinateMapper;
use crate::model::{PoseFault, PoseModel};
use crate::overlay::OverlaySink;

const DEFAULT_SLOW_INFERENCE: Duration = Duration::from_millis(250);
const DEFAULT_HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

// ----------------------------------------------------------------------------
// State
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PumpState {
    Idle = 0,
    Running = 1,
    Stopped = 2,
}

impl PumpState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PumpState::Idle,
            1 => PumpState::Running,
            _ => PumpState::Stopped,
        }
    }
}

/// Counters kept by the worker. Snapshots are cheap clones.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PumpStats {
    pub iterations: u64,
    pub frames_acquired: u64,
    pub frames_released: u64,
    pub release_failures: u64,
    pub transient_faults: u64,
    pub slow_inferences: u64,
    pub poses_detected: u64,
    pub markers_published: u64,
    pub refreshes: u64,
    pub last_latency: Option<Duration>,
    /// Smoothed iterations per second.
    pub fps: f32,
}

#[derive(Debug)]
struct PumpShared {
    state: AtomicU8,
    stats: Mutex<PumpStats>,
}

impl PumpShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(PumpState::Idle as u8),
            stats: Mutex::new(PumpStats::default()),
        }
    }

    fn state(&self) -> PumpState {
        PumpState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn is_stopped(&self) -> bool {
        self.state() == PumpState::Stopped
    }

    /// Returns true when this call performed the transition.
    fn stop(&self) -> bool {
        self.state.swap(PumpState::Stopped as u8, Ordering::SeqCst) != PumpState::Stopped as u8
    }

    fn try_begin(&self) -> std::result::Result<(), PumpState> {
        self.state
            .compare_exchange(
                PumpState::Idle as u8,
                PumpState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(PumpState::from_u8)
    }

    fn stats(&self) -> PumpStats {
        self.stats_mut().clone()
    }

    fn stats_mut(&self) -> std::sync::MutexGuard<'_, PumpStats> {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable control handle. Safe to use from any thread, including signal handlers
/// and UI callbacks.
#[derive(Clone, Debug)]
pub struct PumpHandle {
    shared: Arc<PumpShared>,
}

impl PumpHandle {
    /// Request the pump to stop. Non-blocking. Returns false if it was already
    /// stopped.
    pub fn stop(&self) -> bool {
        let changed = self.shared.stop();
        if changed {
            log::info!("frame pump stop requested");
        }
        changed
    }

    pub fn state(&self) -> PumpState {
        self.shared.state()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    pub fn stats(&self) -> PumpStats {
        self.shared.stats()
    }
}

// ----------------------------------------------------------------------------
// Faults
// ----------------------------------------------------------------------------

/// Why a pump terminated abnormally. Returned inside `anyhow::Error` from `join`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PumpFault {
    /// The model reported it can no longer run.
    ModelUnusable(String),
    /// A frame could not be handed back to its source.
    ReleaseFailed { sequence: u64, message: String },
    /// The source failed to produce a frame.
    SourceFailed(String),
    /// The display refresh failed.
    RefreshFailed(String),
}

impl PumpFault {
    pub fn code(&self) -> &'static str {
        match self {
            PumpFault::ModelUnusable(_) => "PUMP_MODEL_UNUSABLE",
            PumpFault::ReleaseFailed { .. } => "PUMP_RELEASE_FAILED",
            PumpFault::SourceFailed(_) => "PUMP_SOURCE_FAILED",
            PumpFault::RefreshFailed(_) => "PUMP_REFRESH_FAILED",
        }
    }
}

impl std::fmt::Display for PumpFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PumpFault::ModelUnusable(msg) => write!(f, "{}: {}", self.code(), msg),
            PumpFault::ReleaseFailed { sequence, message } => {
                write!(f, "{}: frame {}: {}", self.code(), sequence, message)
            }
            PumpFault::SourceFailed(msg) => write!(f, "{}: {}", self.code(), msg),
            PumpFault::RefreshFailed(msg) => write!(f, "{}: {}", self.code(), msg),
        }
    }
}

impl std::error::Error for PumpFault {}

// ----------------------------------------------------------------------------
// Scheduling
// ----------------------------------------------------------------------------

/// Waits for the next display tick between iterations.
pub trait FrameScheduler: Send {
    fn wait_for_next_tick(&mut self);
}

/// Fixed-rate ticks. Late ticks are not made up.
#[derive(Debug)]
pub struct PacedScheduler {
    interval: Option<Duration>,
    next_tick: Option<Instant>,
}

impl PacedScheduler {
    /// Tick at `fps`. Zero means unpaced.
    pub fn new(fps: u32) -> Self {
        Self {
            interval: (fps > 0).then(|| Duration::from_secs(1) / fps),
            next_tick: None,
        }
    }

    pub fn unpaced() -> Self {
        Self::new(0)
    }
}

impl FrameScheduler for PacedScheduler {
    fn wait_for_next_tick(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        let now = Instant::now();
        let deadline = self.next_tick.unwrap_or(now);
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        self.next_tick = Some(deadline.max(now) + interval);
    }
}

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// The collaborators a pump drives. All are moved onto the worker thread.
pub struct PumpParts {
    pub source: Box<dyn FrameSource>,
    pub model: Box<dyn PoseModel>,
    pub sink: Box<dyn OverlaySink>,
    pub scheduler: Box<dyn FrameScheduler>,
}

#[derive(Clone, Debug)]
pub struct PumpConfig {
    pub mapper: CoordinateMapper,
    pub mirror: MirrorPolicy,
    /// Inference slower than this is logged. Never aborted.
    pub slow_inference: Duration,
    pub health_log_interval: Duration,
}

impl PumpConfig {
    pub fn new(geometry: DisplayGeometry) -> Self {
        Self {
            mapper: CoordinateMapper::new(geometry),
            mirror: MirrorPolicy::default(),
            slow_inference: DEFAULT_SLOW_INFERENCE,
            health_log_interval: DEFAULT_HEALTH_LOG_INTERVAL,
        }
    }

    pub fn from_config(cfg: &OverlayConfig, geometry: DisplayGeometry) -> Self {
        Self {
            mapper: CoordinateMapper::new(geometry).with_min_score(cfg.overlay.min_score),
            mirror: cfg.overlay.mirror,
            slow_inference: cfg.pump.slow_inference,
            health_log_interval: cfg.pump.health_log_interval,
        }
    }
}

// ----------------------------------------------------------------------------
// FramePump
// ----------------------------------------------------------------------------

pub struct FramePump {
    shared: Arc<PumpShared>,
    pending: Option<(PumpParts, PumpConfig)>,
    join: Option<JoinHandle<Result<PumpStats>>>,
}

impl FramePump {
    pub fn new(parts: PumpParts, config: PumpConfig) -> Self {
        Self {
            shared: Arc::new(PumpShared::new()),
            pending: Some((parts, config)),
            join: None,
        }
    }

    pub fn handle(&self) -> PumpHandle {
        PumpHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> PumpState {
        self.shared.state()
    }

    /// Start the worker thread. A second call while running does nothing; a stopped
    /// pump cannot be restarted.
    pub fn start(&mut self) -> Result<()> {
        let Some((parts, config)) = self.begin()? else {
            return Ok(());
        };
        let core = PumpCore::new(parts, config, self.shared.clone());
        let spawned = std::thread::Builder::new()
            .name("frame-pump".to_string())
            .spawn(move || core.run());
        match spawned {
            Ok(join) => {
                self.join = Some(join);
                Ok(())
            }
            Err(err) => {
                self.shared.stop();
                Err(err).context("spawn frame pump thread")
            }
        }
    }

    /// Request stop. Non-blocking.
    pub fn stop(&self) -> bool {
        self.handle().stop()
    }

    /// Wait for the worker to finish and return the final counters, or the fault
    /// that ended it.
    pub fn join(mut self) -> Result<PumpStats> {
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("frame pump thread panicked"))?,
            None => {
                // Never started: nothing ran, but the model still gets disposed.
                self.shared.stop();
                if let Some((mut parts, _)) = self.pending.take() {
                    dispose_model(parts.model.as_mut());
                }
                Ok(self.shared.stats())
            }
        }
    }

    /// Run the pump on the calling thread until it stops.
    pub fn run_blocking(mut self) -> Result<PumpStats> {
        let (parts, config) = self
            .begin()?
            .ok_or_else(|| anyhow!("frame pump is already running"))?;
        PumpCore::new(parts, config, self.shared.clone()).run()
    }

    /// Idle -> Running. `Ok(None)` when already running.
    fn begin(&mut self) -> Result<Option<(PumpParts, PumpConfig)>> {
        match self.shared.try_begin() {
            Ok(()) => {}
            Err(PumpState::Running) => {
                log::debug!("frame pump already running");
                return Ok(None);
            }
            Err(_) => return Err(anyhow!("frame pump is stopped and cannot be restarted")),
        }
        match self.pending.take() {
            Some(pending) => Ok(Some(pending)),
            None => {
                self.shared.stop();
                Err(anyhow!("frame pump has no parts to run"))
            }
        }
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        // The worker winds down on its own; dropping never blocks.
        self.shared.stop();
    }
}

// ----------------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------------

enum Step {
    Continue,
    Finished,
}

struct PumpCore {
    parts: PumpParts,
    config: PumpConfig,
    shared: Arc<PumpShared>,
    started: Instant,
    last_tick: Option<Instant>,
    last_health_log: Instant,
}

impl PumpCore {
    fn new(parts: PumpParts, config: PumpConfig, shared: Arc<PumpShared>) -> Self {
        let now = Instant::now();
        Self {
            parts,
            config,
            shared,
            started: now,
            last_tick: None,
            last_health_log: now,
        }
    }

    fn run(mut self) -> Result<PumpStats> {
        log::info!(
            "frame pump running (source={}, model={})",
            self.parts.source.name(),
            self.parts.model.name()
        );
        let outcome = loop {
            if self.shared.is_stopped() {
                break Ok(());
            }
            match self.step() {
                Ok(Step::Continue) => {}
                Ok(Step::Finished) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        self.shared.stop();

        let stats = self.shared.stats();
        match &outcome {
            Ok(()) => log::info!(
                "frame pump stopped after {} iterations ({} frames released)",
                stats.iterations,
                stats.frames_released
            ),
            Err(err) => log::error!("frame pump stopped on fault: {:#}", err),
        }
        outcome.map(|()| stats)
    }

    fn step(&mut self) -> Result<Step> {
        let PumpParts {
            source,
            model,
            sink,
            scheduler,
        } = &mut self.parts;
        let shared = &self.shared;

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("source {} exhausted", source.name());
                return Ok(Step::Finished);
            }
            Err(err) => {
                return Err(PumpFault::SourceFailed(format!("{}: {:#}", source.name(), err)).into())
            }
        };
        shared.stats_mut().frames_acquired += 1;

        let lease = FrameLease::new(source.as_mut(), frame);
        if shared.is_stopped() {
            release(lease, shared)?;
            return Ok(Step::Finished);
        }

        let sequence = lease.frame().sequence;
        let mirror = self.config.mirror.applies_to(lease.frame().facing);
        let timestamp = self.started.elapsed();
        let began = Instant::now();
        let estimated = model.estimate(&lease.frame().view(), timestamp);
        let latency = began.elapsed();

        release(lease, shared)?;

        let poses = match estimated {
            Ok(poses) => poses,
            Err(err) if PoseFault::is_fatal(&err) => {
                return Err(PumpFault::ModelUnusable(format!("{:#}", err)).into());
            }
            Err(err) => {
                shared.stats_mut().transient_faults += 1;
                log::warn!("inference on frame {} failed: {:#}", sequence, err);
                Vec::new()
            }
        };
        if latency > self.config.slow_inference {
            shared.stats_mut().slow_inferences += 1;
            log::warn!(
                "slow inference on frame {}: {} ms",
                sequence,
                latency.as_millis()
            );
        }

        let overlay = self.config.mapper.overlay(sequence, &poses, mirror);
        {
            let now = Instant::now();
            let mut stats = shared.stats_mut();
            stats.iterations += 1;
            stats.poses_detected += poses.len() as u64;
            stats.markers_published += overlay.markers.len() as u64;
            stats.last_latency = Some(latency);
            if let Some(last) = self.last_tick {
                let dt = now.duration_since(last).as_secs_f32();
                if dt > 0.0 {
                    let instant_fps = 1.0 / dt;
                    stats.fps = if stats.fps == 0.0 {
                        instant_fps
                    } else {
                        stats.fps * 0.9 + instant_fps * 0.1
                    };
                }
            }
            self.last_tick = Some(now);
        }
        sink.publish(overlay);

        if shared.is_stopped() {
            return Ok(Step::Finished);
        }
        sink.refresh()
            .map_err(|err| PumpFault::RefreshFailed(format!("{:#}", err)))?;
        shared.stats_mut().refreshes += 1;

        if self.last_health_log.elapsed() >= self.config.health_log_interval {
            let stats = shared.stats();
            log::info!(
                "pump health: iterations={} fps={:.1} poses={} transient_faults={} source_healthy={}",
                stats.iterations,
                stats.fps,
                stats.poses_detected,
                stats.transient_faults,
                source.is_healthy()
            );
            self.last_health_log = Instant::now();
        }

        scheduler.wait_for_next_tick();
        Ok(Step::Continue)
    }
}

impl Drop for PumpCore {
    // Runs when the worker returns, and also when a failed spawn drops the closure
    // that owned the core.
    fn drop(&mut self) {
        dispose_model(self.parts.model.as_mut());
    }
}

fn release(lease: FrameLease<'_>, shared: &PumpShared) -> Result<()> {
    let sequence = lease.frame().sequence;
    match lease.release() {
        Ok(()) => {
            shared.stats_mut().frames_released += 1;
            Ok(())
        }
        Err(err) => {
            shared.stats_mut().release_failures += 1;
            log::error!("frame {} release failed: {:#}", sequence, err);
            Err(PumpFault::ReleaseFailed {
                sequence,
                message: format!("{:#}", err),
            }
            .into())
        }
    }
}

fn dispose_model(model: &mut dyn PoseModel) {
    if let Err(err) = model.dispose() {
        log::warn!("model {} dispose failed: {:#}", model.name(), err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_a_single_transition() {
        let shared = PumpShared::new();
        assert_eq!(shared.state(), PumpState::Idle);
        assert!(shared.stop());
        assert!(!shared.stop());
        assert_eq!(shared.try_begin(), Err(PumpState::Stopped));
    }

    #[test]
    fn begin_only_from_idle() {
        let shared = PumpShared::new();
        assert_eq!(shared.try_begin(), Ok(()));
        assert_eq!(shared.try_begin(), Err(PumpState::Running));
        assert_eq!(shared.state(), PumpState::Running);
    }

    #[test]
    fn paced_scheduler_spaces_ticks() {
        let mut scheduler = PacedScheduler::new(100);
        let began = Instant::now();
        for _ in 0..4 {
            scheduler.wait_for_next_tick();
        }
        // First tick is immediate, the next three wait ~10 ms each.
        assert!(began.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn unpaced_scheduler_never_sleeps() {
        let mut scheduler = PacedScheduler::unpaced();
        let began = Instant::now();
        for _ in 0..1000 {
            scheduler.wait_for_next_tick();
        }
        assert!(began.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn dropping_an_unrun_core_disposes_the_model() {
        use crate::ingest::{CameraSelector, SyntheticConfig, SyntheticSource};
        use crate::model::ScriptedPoseModel;
        use crate::overlay::SharedOverlay;

        let model = ScriptedPoseModel::new();
        let probe = model.probe();
        let source =
            SyntheticSource::new(SyntheticConfig::default(), CameraSelector::default()).unwrap();
        let parts = PumpParts {
            source: Box::new(source),
            model: Box::new(model),
            sink: Box::new(SharedOverlay::new()),
            scheduler: Box::new(PacedScheduler::unpaced()),
        };
        let geometry = DisplayGeometry::new(1080.0, 1440.0, 180.0, 240.0).unwrap();
        let core = PumpCore::new(parts, PumpConfig::new(geometry), Arc::new(PumpShared::new()));

        // Same fate as a core moved into a thread closure that never ran.
        let unspawned = move || core.run();
        drop(unspawned);

        assert!(probe.disposed());
        assert_eq!(probe.calls(), 0);
    }

    #[test]
    fn fault_codes_are_stable() {
        let fault = PumpFault::ReleaseFailed {
            sequence: 3,
            message: "unknown frame".to_string(),
        };
        assert_eq!(fault.code(), "PUMP_RELEASE_FAILED");
        assert_eq!(fault.to_string(), "PUMP_RELEASE_FAILED: frame 3: unknown frame");
    }
}
