use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use pose_overlay::ingest::{SyntheticConfig, SyntheticSource};
use pose_overlay::{
    CameraFacing, CameraSelector, DisplayGeometry, DisplayPoint, Frame, FramePump, FrameSource,
    FrameView, Keypoint, PacedScheduler, Pose, PoseModel, PumpConfig, PumpFault, PumpParts,
    PumpState, ScriptedPoseModel, SharedOverlay, SourceStats, SyntheticPoseModel,
};

#[derive(Clone, Default)]
struct SourceProbe {
    acquired: Arc<AtomicU64>,
    released: Arc<AtomicU64>,
}

impl SourceProbe {
    fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }
}

/// Hands out `limit` tiny frames and tracks every release.
struct CountingSource {
    limit: u64,
    next_sequence: u64,
    reject_release_of: Option<u64>,
    outstanding: HashSet<u64>,
    probe: SourceProbe,
}

impl CountingSource {
    fn new(limit: u64) -> Self {
        Self {
            limit,
            next_sequence: 1,
            reject_release_of: None,
            outstanding: HashSet::new(),
            probe: SourceProbe::default(),
        }
    }

    fn rejecting_release_of(mut self, sequence: u64) -> Self {
        self.reject_release_of = Some(sequence);
        self
    }

    fn probe(&self) -> SourceProbe {
        self.probe.clone()
    }
}

impl FrameSource for CountingSource {
    fn name(&self) -> &str {
        "counting"
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.next_sequence > self.limit {
            return Ok(None);
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let frame = Frame::new(vec![0u8; 4 * 4 * 3], 4, 4, sequence, CameraFacing::Back)?;
        self.outstanding.insert(sequence);
        self.probe.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Some(frame))
    }

    fn release(&mut self, frame: Frame) -> Result<()> {
        if self.reject_release_of == Some(frame.sequence) {
            return Err(anyhow!("buffer pool rejected frame {}", frame.sequence));
        }
        if !self.outstanding.remove(&frame.sequence) {
            return Err(anyhow!("frame {} released twice", frame.sequence));
        }
        self.probe.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.probe.acquired(),
            frames_released: self.probe.released(),
            camera_switches: 0,
        }
    }
}

/// Blocks inside `next_frame` until the test lets it continue, then hands out one
/// frame per call.
struct GatedSource {
    inner: CountingSource,
    entered: mpsc::Sender<()>,
    proceed: mpsc::Receiver<()>,
}

impl FrameSource for GatedSource {
    fn name(&self) -> &str {
        "gated"
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let _ = self.entered.send(());
        self.proceed
            .recv_timeout(Duration::from_secs(10))
            .map_err(|_| anyhow!("gate never opened"))?;
        self.inner.next_frame()
    }

    fn release(&mut self, frame: Frame) -> Result<()> {
        self.inner.release(frame)
    }

    fn stats(&self) -> SourceStats {
        self.inner.stats()
    }
}

/// Blocks inside `estimate` until the test lets it continue.
struct GatedModel {
    entered: mpsc::Sender<u64>,
    proceed: mpsc::Receiver<()>,
    calls: Arc<AtomicU64>,
}

impl PoseModel for GatedModel {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn estimate(&mut self, frame: &FrameView<'_>, _timestamp: Duration) -> Result<Vec<Pose>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.entered.send(frame.sequence());
        self.proceed
            .recv_timeout(Duration::from_secs(10))
            .map_err(|_| anyhow!("gate never opened"))?;
        Ok(vec![nose_pose()])
    }
}

fn geometry() -> DisplayGeometry {
    DisplayGeometry::new(1080.0, 1440.0, 180.0, 240.0).unwrap()
}

fn nose_pose() -> Pose {
    Pose::new(vec![Keypoint::new("nose", 90.0, 120.0, 0.9)])
}

fn parts(
    source: impl FrameSource + 'static,
    model: impl PoseModel + 'static,
    sink: SharedOverlay,
) -> PumpParts {
    PumpParts {
        source: Box::new(source),
        model: Box::new(model),
        sink: Box::new(sink),
        scheduler: Box::new(PacedScheduler::unpaced()),
    }
}

#[test]
fn every_frame_is_released_once_across_outcomes() -> Result<()> {
    let source = CountingSource::new(3);
    let source_probe = source.probe();
    let model = ScriptedPoseModel::new()
        .then_poses(vec![nose_pose()])
        .then_transient("dropped tensor")
        .then_poses(vec![nose_pose()]);
    let model_probe = model.probe();
    let sink = SharedOverlay::new();
    let reader = sink.clone();

    let mut pump = FramePump::new(parts(source, model, sink), PumpConfig::new(geometry()));
    pump.start()?;
    let stats = pump.join()?;

    assert_eq!(source_probe.acquired(), 3);
    assert_eq!(source_probe.released(), 3);
    assert_eq!(stats.frames_acquired, 3);
    assert_eq!(stats.frames_released, 3);
    assert_eq!(stats.iterations, 3);
    assert_eq!(stats.transient_faults, 1);
    assert_eq!(stats.refreshes, 3);
    assert_eq!(model_probe.calls(), 3);
    assert!(model_probe.disposed());

    let latest = reader.latest();
    assert_eq!(latest.frame_sequence, 3);
    assert_eq!(latest.markers.len(), 1);
    assert_eq!(latest.markers[0].center, DisplayPoint { x: 540.0, y: 720.0 });
    assert_eq!(reader.publishes(), 3);
    Ok(())
}

#[test]
fn transient_fault_publishes_empty_overlay() -> Result<()> {
    let source = CountingSource::new(1);
    let model = ScriptedPoseModel::new().then_transient("dropped tensor");
    let sink = SharedOverlay::new();
    let reader = sink.clone();

    let pump = FramePump::new(parts(source, model, sink), PumpConfig::new(geometry()));
    let stats = pump.run_blocking()?;

    assert_eq!(stats.transient_faults, 1);
    assert_eq!(reader.publishes(), 1);
    assert!(reader.latest().is_empty());
    Ok(())
}

#[test]
fn fatal_model_fault_stops_pump_and_surfaces() {
    let source = CountingSource::new(10);
    let source_probe = source.probe();
    let model = ScriptedPoseModel::new()
        .then_poses(vec![nose_pose()])
        .then_fatal("delegate lost");
    let model_probe = model.probe();

    let mut pump = FramePump::new(
        parts(source, model, SharedOverlay::new()),
        PumpConfig::new(geometry()),
    );
    let handle = pump.handle();
    pump.start().unwrap();
    let err = pump.join().unwrap_err();

    match err.downcast_ref::<PumpFault>() {
        Some(PumpFault::ModelUnusable(message)) => assert!(message.contains("delegate lost")),
        other => panic!("expected ModelUnusable, got {:?}", other),
    }
    assert_eq!(source_probe.acquired(), 2);
    assert_eq!(source_probe.released(), 2);
    assert!(model_probe.disposed());
    assert_eq!(handle.state(), PumpState::Stopped);
}

#[test]
fn stop_during_inference_finishes_in_flight_call_only() -> Result<()> {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (proceed_tx, proceed_rx) = mpsc::channel();
    let calls = Arc::new(AtomicU64::new(0));
    let model = GatedModel {
        entered: entered_tx,
        proceed: proceed_rx,
        calls: calls.clone(),
    };
    let source = CountingSource::new(100);
    let source_probe = source.probe();
    let sink = SharedOverlay::new();
    let reader = sink.clone();

    let mut pump = FramePump::new(parts(source, model, sink), PumpConfig::new(geometry()));
    let handle = pump.handle();
    pump.start()?;

    let sequence = entered_rx.recv_timeout(Duration::from_secs(5))?;
    assert_eq!(sequence, 1);
    assert!(handle.stop());
    assert!(!handle.stop());
    proceed_tx.send(())?;

    let stats = pump.join()?;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(source_probe.acquired(), 1);
    assert_eq!(source_probe.released(), 1);
    assert_eq!(stats.frames_released, 1);
    assert_eq!(reader.refreshes(), 0);
    Ok(())
}

#[test]
fn stop_during_acquisition_releases_without_inference() -> Result<()> {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (proceed_tx, proceed_rx) = mpsc::channel();
    let inner = CountingSource::new(100);
    let source_probe = inner.probe();
    let source = GatedSource {
        inner,
        entered: entered_tx,
        proceed: proceed_rx,
    };
    let model = ScriptedPoseModel::new().then_poses(vec![nose_pose()]);
    let model_probe = model.probe();
    let sink = SharedOverlay::new();
    let reader = sink.clone();

    let mut pump = FramePump::new(parts(source, model, sink), PumpConfig::new(geometry()));
    let handle = pump.handle();
    pump.start()?;

    entered_rx.recv_timeout(Duration::from_secs(5))?;
    assert!(handle.stop());
    proceed_tx.send(())?;

    let stats = pump.join()?;
    assert_eq!(model_probe.calls(), 0);
    assert!(model_probe.disposed());
    assert_eq!(source_probe.acquired(), 1);
    assert_eq!(source_probe.released(), 1);
    assert_eq!(stats.frames_acquired, 1);
    assert_eq!(stats.frames_released, 1);
    assert_eq!(stats.iterations, 0);
    assert_eq!(reader.publishes(), 0);
    Ok(())
}

#[test]
fn start_is_idempotent_while_running() -> Result<()> {
    let source = CountingSource::new(3);
    let model = ScriptedPoseModel::new().with_latency(Duration::from_millis(50));
    let model_probe = model.probe();

    let mut pump = FramePump::new(
        parts(source, model, SharedOverlay::new()),
        PumpConfig::new(geometry()),
    );
    pump.start()?;
    assert_eq!(pump.state(), PumpState::Running);
    pump.start()?;
    let stats = pump.join()?;

    assert_eq!(stats.iterations, 3);
    assert_eq!(model_probe.calls(), 3);
    Ok(())
}

#[test]
fn stopped_pump_cannot_start() {
    let source = CountingSource::new(3);
    let source_probe = source.probe();
    let model = ScriptedPoseModel::new();
    let model_probe = model.probe();

    let mut pump = FramePump::new(
        parts(source, model, SharedOverlay::new()),
        PumpConfig::new(geometry()),
    );
    assert!(pump.stop());
    assert!(pump.start().is_err());
    assert_eq!(pump.state(), PumpState::Stopped);

    let stats = pump.join().unwrap();
    assert_eq!(stats.iterations, 0);
    assert_eq!(source_probe.acquired(), 0);
    assert!(model_probe.disposed());
}

#[test]
fn release_failure_stops_pump() {
    let source = CountingSource::new(5).rejecting_release_of(2);
    let source_probe = source.probe();
    let model = ScriptedPoseModel::new();

    let mut pump = FramePump::new(
        parts(source, model, SharedOverlay::new()),
        PumpConfig::new(geometry()),
    );
    let handle = pump.handle();
    pump.start().unwrap();
    let err = pump.join().unwrap_err();

    match err.downcast_ref::<PumpFault>() {
        Some(PumpFault::ReleaseFailed { sequence, .. }) => assert_eq!(*sequence, 2),
        other => panic!("expected ReleaseFailed, got {:?}", other),
    }
    assert_eq!(source_probe.acquired(), 2);
    assert_eq!(source_probe.released(), 1);
    assert_eq!(handle.stats().release_failures, 1);
}

#[test]
fn synthetic_pipeline_runs_to_frame_limit() -> Result<()> {
    let geometry = geometry();
    let (tensor_width, tensor_height) = geometry.tensor_dims();
    let config = SyntheticConfig {
        output_width: tensor_width,
        output_height: tensor_height,
        frame_limit: Some(5),
        ..SyntheticConfig::default()
    };
    let selector = CameraSelector::new(CameraFacing::Front);
    let mut source = SyntheticSource::new(config, selector)?;
    source.connect()?;
    let mut model = SyntheticPoseModel::new().deterministic();
    model.warm_up()?;
    let sink = SharedOverlay::new();
    let reader = sink.clone();

    let pump = FramePump::new(parts(source, model, sink), PumpConfig::new(geometry));
    let stats = pump.run_blocking()?;

    assert_eq!(stats.iterations, 5);
    assert_eq!(stats.frames_released, 5);
    let latest = reader.latest();
    assert_eq!(latest.frame_sequence, 5);
    // Ears score below the threshold.
    assert_eq!(latest.markers.len(), 15);
    for marker in &latest.markers {
        assert!(marker.center.x >= 0.0 && marker.center.x <= 1080.0);
        assert!(marker.center.y >= 0.0 && marker.center.y <= 1440.0);
    }
    Ok(())
}
