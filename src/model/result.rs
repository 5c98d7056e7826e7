/// Keypoint names produced by MoveNet, in output order (COCO-17).
pub const COCO_KEYPOINTS: [&str; 17] = [
    "nose",
    "left_eye",
    "right_eye",
    "left_ear",
    "right_ear",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
];

/// A named landmark in inference-tensor coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Keypoint {
    pub name: String,
    pub x: f32,
    pub y: f32,
    /// Confidence in [0, 1]. Some models omit it; a missing score counts as zero.
    pub score: Option<f32>,
}

impl Keypoint {
    pub fn new(name: impl Into<String>, x: f32, y: f32, score: f32) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            score: Some(score),
        }
    }

    pub fn score_or_zero(&self) -> f32 {
        self.score.unwrap_or(0.0)
    }
}

/// One detected subject.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pose {
    pub keypoints: Vec<Keypoint>,
    pub score: Option<f32>,
}

impl Pose {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self {
            keypoints,
            score: None,
        }
    }

    pub fn keypoint(&self, name: &str) -> Option<&Keypoint> {
        self.keypoints.iter().find(|k| k.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_score_reads_as_zero() {
        let kp = Keypoint {
            name: "nose".to_string(),
            x: 1.0,
            y: 2.0,
            score: None,
        };
        assert_eq!(kp.score_or_zero(), 0.0);
        assert_eq!(Keypoint::new("nose", 1.0, 2.0, 0.7).score_or_zero(), 0.7);
    }

    #[test]
    fn keypoint_lookup_by_name() {
        let pose = Pose::new(vec![
            Keypoint::new("nose", 1.0, 1.0, 0.9),
            Keypoint::new("left_wrist", 5.0, 6.0, 0.8),
        ]);
        assert_eq!(pose.keypoint("left_wrist").map(|k| k.x), Some(5.0));
        assert!(pose.keypoint("right_wrist").is_none());
    }
}
