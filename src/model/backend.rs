use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::frame::FrameView;
use crate::model::result::Pose;

/// Pose model trait.
///
/// The model is an external capability: the pump calls `estimate` once per tick and
/// never looks at whatever state the model keeps between calls (smoothing, tracking).
///
/// Implementations must not keep the pixel slice past the `estimate` call.
pub trait PoseModel: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Optional warm-up hook, run once during startup.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Estimate poses on one frame.
    ///
    /// `timestamp` is monotonic time since the pump started; models that smooth
    /// across calls may use it. Keypoints come back in the frame's pixel space.
    ///
    /// Return a [`PoseFault`] with `fatal = true` when the model can no longer run at
    /// all; any other error is treated as a missed tick.
    fn estimate(&mut self, frame: &FrameView<'_>, timestamp: Duration) -> Result<Vec<Pose>>;

    /// Release model resources. Called once when the pump winds down.
    fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<M: PoseModel + ?Sized> PoseModel for Box<M> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }

    fn estimate(&mut self, frame: &FrameView<'_>, timestamp: Duration) -> Result<Vec<Pose>> {
        (**self).estimate(frame, timestamp)
    }

    fn dispose(&mut self) -> Result<()> {
        (**self).dispose()
    }
}

// ----------------------------------------------------------------------------
// Faults
// ----------------------------------------------------------------------------

/// Classified model failure, carried inside `anyhow::Error`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoseFault {
    pub fatal: bool,
    pub message: String,
}

impl PoseFault {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            fatal: false,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            fatal: true,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        if self.fatal {
            "MODEL_UNUSABLE"
        } else {
            "MODEL_TRANSIENT"
        }
    }

    /// True when any error in the chain is a fatal `PoseFault`.
    pub fn is_fatal(err: &anyhow::Error) -> bool {
        err.chain()
            .filter_map(|cause| cause.downcast_ref::<PoseFault>())
            .any(|fault| fault.fatal)
    }
}

impl std::fmt::Display for PoseFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message)
    }
}

impl std::error::Error for PoseFault {}

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Pose model variants.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ModelVariant {
    /// MoveNet single-pose, fastest.
    #[default]
    SinglePoseLightning,
    /// MoveNet single-pose, more accurate.
    SinglePoseThunder,
    /// MoveNet multi-pose (up to six subjects).
    MultiPoseLightning,
}

impl ModelVariant {
    /// Model input size as (width, height).
    pub fn input_size(self) -> (u32, u32) {
        match self {
            ModelVariant::SinglePoseLightning => (192, 192),
            ModelVariant::SinglePoseThunder => (256, 256),
            ModelVariant::MultiPoseLightning => (256, 256),
        }
    }

    pub fn max_poses(self) -> usize {
        match self {
            ModelVariant::MultiPoseLightning => 6,
            _ => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelVariant::SinglePoseLightning => "singlepose_lightning",
            ModelVariant::SinglePoseThunder => "singlepose_thunder",
            ModelVariant::MultiPoseLightning => "multipose_lightning",
        }
    }
}

impl FromStr for ModelVariant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "singlepose_lightning" | "lightning" => Ok(ModelVariant::SinglePoseLightning),
            "singlepose_thunder" | "thunder" => Ok(ModelVariant::SinglePoseThunder),
            "multipose_lightning" | "multipose" => Ok(ModelVariant::MultiPoseLightning),
            other => Err(anyhow!("unknown model variant '{}'", other)),
        }
    }
}

/// Fixed model configuration, chosen once at startup.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelConfig {
    pub variant: ModelVariant,
    pub enable_smoothing: bool,
    /// Local ONNX model file. `None` selects the built-in synthetic model.
    pub model_path: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            variant: ModelVariant::SinglePoseLightning,
            enable_smoothing: true,
            model_path: None,
        }
    }
}
