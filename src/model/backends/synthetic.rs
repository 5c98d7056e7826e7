use anyhow::{anyhow, Result};
use rand::Rng;
use std::time::Duration;

use crate::frame::FrameView;
use crate::model::backend::PoseModel;
use crate::model::result::{Keypoint, Pose, COCO_KEYPOINTS};

/// Standing figure in unit coordinates (x, y), one entry per COCO keypoint.
const STANDING_FIGURE: [(f32, f32); 17] = [
    (0.50, 0.12),
    (0.47, 0.10),
    (0.53, 0.10),
    (0.44, 0.11),
    (0.56, 0.11),
    (0.38, 0.24),
    (0.62, 0.24),
    (0.33, 0.38),
    (0.67, 0.38),
    (0.31, 0.50),
    (0.69, 0.50),
    (0.42, 0.54),
    (0.58, 0.54),
    (0.42, 0.72),
    (0.58, 0.72),
    (0.42, 0.90),
    (0.58, 0.90),
];

/// Built-in model that reports a gently swaying figure.
///
/// Ears come back below the overlay threshold so the filter path is visible in
/// demo output. Positions are in the frame's pixel space, like a real backend.
pub struct SyntheticPoseModel {
    jitter: f32,
    ready: bool,
}

impl SyntheticPoseModel {
    pub fn new() -> Self {
        Self {
            jitter: 0.004,
            ready: false,
        }
    }

    /// Disable random jitter for reproducible output.
    pub fn deterministic(mut self) -> Self {
        self.jitter = 0.0;
        self
    }
}

impl Default for SyntheticPoseModel {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseModel for SyntheticPoseModel {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn warm_up(&mut self) -> Result<()> {
        self.ready = true;
        Ok(())
    }

    fn estimate(&mut self, frame: &FrameView<'_>, _timestamp: Duration) -> Result<Vec<Pose>> {
        if !self.ready {
            return Err(anyhow!("synthetic model used before warm-up"));
        }
        let width = frame.width() as f32;
        let height = frame.height() as f32;
        let phase = frame.sequence() as f32 * 0.15;
        let sway = phase.sin() * 0.03;
        let mut rng = rand::thread_rng();

        let keypoints = COCO_KEYPOINTS
            .iter()
            .zip(STANDING_FIGURE.iter())
            .map(|(name, &(ux, uy))| {
                let (jx, jy) = if self.jitter > 0.0 {
                    (
                        rng.gen_range(-self.jitter..=self.jitter),
                        rng.gen_range(-self.jitter..=self.jitter),
                    )
                } else {
                    (0.0, 0.0)
                };
                // Upper body sways more than the feet.
                let lean = sway * (1.0 - uy);
                let score = if name.ends_with("_ear") { 0.3 } else { 0.85 };
                Keypoint::new(
                    *name,
                    (ux + lean + jx) * width,
                    (uy + jy) * height,
                    score,
                )
            })
            .collect();

        Ok(vec![Pose {
            keypoints,
            score: Some(0.8),
        }])
    }
}
