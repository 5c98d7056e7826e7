use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::time::Duration;

use crate::frame::FrameView;
use crate::model::backend::PoseModel;
use crate::model::result::Pose;

/// Weight of the newest observation.
pub const DEFAULT_SMOOTHING_ALPHA: f32 = 0.5;

/// Gaps longer than this reset the filter instead of blending across them.
const MAX_SMOOTHING_GAP: Duration = Duration::from_millis(500);

/// Exponential smoothing of keypoint positions across calls.
///
/// State is keyed by (pose index, keypoint name) and lives entirely inside the
/// wrapper; the pump only ever sees the smoothed output.
pub struct Smoothed<M> {
    inner: M,
    alpha: f32,
    history: HashMap<(usize, String), (f32, f32)>,
    last_timestamp: Option<Duration>,
}

impl<M: PoseModel> Smoothed<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            alpha: DEFAULT_SMOOTHING_ALPHA,
            history: HashMap::new(),
            last_timestamp: None,
        }
    }

    pub fn with_alpha(mut self, alpha: f32) -> Result<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(anyhow!("smoothing alpha must be in (0, 1], got {}", alpha));
        }
        self.alpha = alpha;
        Ok(self)
    }

    fn apply(&mut self, poses: &mut [Pose], timestamp: Duration) {
        let stale = self
            .last_timestamp
            .map_or(true, |last| timestamp.saturating_sub(last) > MAX_SMOOTHING_GAP);
        if stale || poses.is_empty() {
            self.history.clear();
        }
        self.last_timestamp = Some(timestamp);

        let mut next = HashMap::with_capacity(self.history.len());
        for (index, pose) in poses.iter_mut().enumerate() {
            for kp in pose.keypoints.iter_mut() {
                let key = (index, kp.name.clone());
                if let Some(&(px, py)) = self.history.get(&key) {
                    kp.x = self.alpha * kp.x + (1.0 - self.alpha) * px;
                    kp.y = self.alpha * kp.y + (1.0 - self.alpha) * py;
                }
                next.insert(key, (kp.x, kp.y));
            }
        }
        self.history = next;
    }
}

impl<M: PoseModel> PoseModel for Smoothed<M> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn warm_up(&mut self) -> Result<()> {
        self.inner.warm_up()
    }

    fn estimate(&mut self, frame: &FrameView<'_>, timestamp: Duration) -> Result<Vec<Pose>> {
        let mut poses = self.inner.estimate(frame, timestamp)?;
        self.apply(&mut poses, timestamp);
        Ok(poses)
    }

    fn dispose(&mut self) -> Result<()> {
        self.history.clear();
        self.inner.dispose()
    }
}
