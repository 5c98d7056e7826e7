use anyhow::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::frame::FrameView;
use crate::model::backend::{PoseFault, PoseModel};
use crate::model::result::Pose;

enum Step {
    Poses(Vec<Pose>),
    Fault(PoseFault),
}

/// Replays a fixed script of results, one step per `estimate` call.
///
/// Once the script runs out every call returns no poses. Used for replay runs and
/// for exercising the pump's fault handling.
pub struct ScriptedPoseModel {
    steps: VecDeque<Step>,
    latency: Duration,
    probe: ModelProbe,
}

/// Counters shared with whoever built the model, readable after it moves into a pump.
#[derive(Clone, Debug, Default)]
pub struct ModelProbe {
    calls: Arc<AtomicU64>,
    disposed: Arc<AtomicBool>,
}

impl ModelProbe {
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl ScriptedPoseModel {
    pub fn new() -> Self {
        Self {
            steps: VecDeque::new(),
            latency: Duration::ZERO,
            probe: ModelProbe::default(),
        }
    }

    pub fn then_poses(mut self, poses: Vec<Pose>) -> Self {
        self.steps.push_back(Step::Poses(poses));
        self
    }

    pub fn then_transient(mut self, message: &str) -> Self {
        self.steps.push_back(Step::Fault(PoseFault::transient(message)));
        self
    }

    pub fn then_fatal(mut self, message: &str) -> Self {
        self.steps.push_back(Step::Fault(PoseFault::fatal(message)));
        self
    }

    /// Block each call for `latency`, standing in for a slow model.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn probe(&self) -> ModelProbe {
        self.probe.clone()
    }
}

impl Default for ScriptedPoseModel {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseModel for ScriptedPoseModel {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn estimate(&mut self, _frame: &FrameView<'_>, _timestamp: Duration) -> Result<Vec<Pose>> {
        self.probe.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        match self.steps.pop_front() {
            Some(Step::Poses(poses)) => Ok(poses),
            Some(Step::Fault(fault)) => Err(fault.into()),
            None => Ok(Vec::new()),
        }
    }

    fn dispose(&mut self) -> Result<()> {
        self.steps.clear();
        self.probe.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::ingest::CameraFacing;
    use crate::model::result::Keypoint;

    #[test]
    fn replays_steps_in_order() {
        let frame = Frame::new(vec![0u8; 3], 1, 1, 1, CameraFacing::Back).unwrap();
        let mut model = ScriptedPoseModel::new()
            .then_poses(vec![Pose::new(vec![Keypoint::new("nose", 1.0, 1.0, 0.9)])])
            .then_transient("dropped frame")
            .then_fatal("context lost");
        let probe = model.probe();

        assert_eq!(model.estimate(&frame.view(), Duration::ZERO).unwrap().len(), 1);
        let err = model.estimate(&frame.view(), Duration::ZERO).unwrap_err();
        assert!(!PoseFault::is_fatal(&err));
        let err = model.estimate(&frame.view(), Duration::ZERO).unwrap_err();
        assert!(PoseFault::is_fatal(&err));
        assert!(model.estimate(&frame.view(), Duration::ZERO).unwrap().is_empty());

        assert_eq!(probe.calls(), 4);
        model.dispose().unwrap();
        assert!(probe.disposed());
    }
}
