//! Tensor-space to display-space mapping.
//!
//! Keypoints come back from the model in the coordinate system of the resized
//! inference tensor. The preview surface is larger and may be mirrored, so every
//! keypoint is filtered by score, optionally reflected, then scaled per axis.
//!
//! No rotation is applied here. Orientation is handled upstream by choosing the
//! tensor shape (see `DisplayGeometry::for_device`).

use crate::config::DisplayGeometry;
use crate::model::{Keypoint, Pose};
use crate::overlay::{Marker, Overlay};

/// Keypoints scoring at or below this are not drawn.
pub const MIN_KEYPOINT_SCORE: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayPoint {
    pub x: f32,
    pub y: f32,
}

/// Map a tensor-space point into display space.
pub fn map_point(x: f32, y: f32, geometry: &DisplayGeometry, mirror: bool) -> DisplayPoint {
    let x = if mirror { geometry.tensor_width - x } else { x };
    DisplayPoint {
        x: x / geometry.tensor_width * geometry.display_width,
        y: y / geometry.tensor_height * geometry.display_height,
    }
}

/// Stateless keypoint mapper with a fixed score threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoordinateMapper {
    geometry: DisplayGeometry,
    min_score: f32,
}

impl CoordinateMapper {
    pub fn new(geometry: DisplayGeometry) -> Self {
        Self {
            geometry,
            min_score: MIN_KEYPOINT_SCORE,
        }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn geometry(&self) -> &DisplayGeometry {
        &self.geometry
    }

    /// Map one keypoint, or `None` when its score does not clear the threshold.
    pub fn map_keypoint(&self, keypoint: &Keypoint, mirror: bool) -> Option<Marker> {
        // Written as "exceeds" so a NaN score never passes.
        let clears_threshold = keypoint.score_or_zero() > self.min_score;
        if !clears_threshold {
            return None;
        }
        Some(Marker {
            key: format!("skeletonkp_{}", keypoint.name),
            center: map_point(keypoint.x, keypoint.y, &self.geometry, mirror),
        })
    }

    pub fn map_pose(&self, pose: &Pose, mirror: bool) -> Vec<Marker> {
        pose.keypoints
            .iter()
            .filter_map(|kp| self.map_keypoint(kp, mirror))
            .collect()
    }

    /// Overlay for one tick. Only the first pose is drawn.
    pub fn overlay(&self, frame_sequence: u64, poses: &[Pose], mirror: bool) -> Overlay {
        let markers = poses
            .first()
            .map(|pose| self.map_pose(pose, mirror))
            .unwrap_or_default();
        Overlay {
            frame_sequence,
            markers,
        }
    }
}
