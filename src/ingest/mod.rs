//! Frame ingestion sources.
//!
//! This module provides the sources the pump pulls frames from:
//! - Synthetic source (`stub://` URIs, demos and tests)
//! - USB/V4L2 cameras (feature: ingest-v4l2)
//!
//! Every source produces frames already resized to the inference tensor dimensions,
//! so pose models see tensor-space pixels and return tensor-space keypoints.
//!
//! Sources are responsible for:
//! - Honouring the shared `CameraSelector` at acquisition time
//! - Tracking which frames are outstanding and rejecting unknown releases
//!
//! Sources MUST NOT:
//! - Retain a frame after it is handed out
//! - Switch cameras in the middle of producing a frame

mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::config::{DisplayGeometry, SourceSettings};
use crate::frame::Frame;

pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

/// A supplier of frames for the pump.
///
/// `next_frame` may block until a frame is available. `Ok(None)` means the source is
/// exhausted and the pump should wind down.
pub trait FrameSource: Send {
    /// Source identifier for logs.
    fn name(&self) -> &str;

    /// Acquire the next frame.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Take back a frame previously returned by `next_frame`.
    fn release(&mut self, frame: Frame) -> Result<()>;

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;
}

/// Counters common to all sources.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub frames_released: u64,
    pub camera_switches: u64,
}

impl SourceStats {
    /// Frames handed out and not yet released.
    pub fn outstanding(&self) -> u64 {
        self.frames_captured.saturating_sub(self.frames_released)
    }
}

// ----------------------------------------------------------------------------
// Camera selection
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    Front,
    #[default]
    Back,
}

impl CameraFacing {
    pub fn toggled(self) -> Self {
        match self {
            CameraFacing::Front => CameraFacing::Back,
            CameraFacing::Back => CameraFacing::Front,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CameraFacing::Front => 0,
            CameraFacing::Back => 1,
        }
    }

    fn from_u8(value: u8) -> Self {
        if value == 0 {
            CameraFacing::Front
        } else {
            CameraFacing::Back
        }
    }
}

impl FromStr for CameraFacing {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" | "user" => Ok(CameraFacing::Front),
            "back" | "rear" | "environment" => Ok(CameraFacing::Back),
            other => Err(anyhow!("unknown camera facing '{}'", other)),
        }
    }
}

/// Shared camera toggle.
///
/// The control surface flips it; sources read it when acquiring the next frame, so
/// a toggle never lands in the middle of an iteration.
#[derive(Clone, Debug)]
pub struct CameraSelector {
    facing: Arc<AtomicU8>,
}

impl CameraSelector {
    pub fn new(initial: CameraFacing) -> Self {
        Self {
            facing: Arc::new(AtomicU8::new(initial.as_u8())),
        }
    }

    pub fn current(&self) -> CameraFacing {
        CameraFacing::from_u8(self.facing.load(Ordering::SeqCst))
    }

    pub fn set(&self, facing: CameraFacing) {
        self.facing.store(facing.as_u8(), Ordering::SeqCst);
    }

    /// Swap front/back and return the newly selected camera.
    pub fn toggle(&self) -> CameraFacing {
        let mut current = self.facing.load(Ordering::SeqCst);
        loop {
            let next = CameraFacing::from_u8(current).toggled().as_u8();
            match self
                .facing
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return CameraFacing::from_u8(next),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for CameraSelector {
    fn default() -> Self {
        Self::new(CameraFacing::default())
    }
}

// ----------------------------------------------------------------------------
// Source construction
// ----------------------------------------------------------------------------

/// Open the source named by the settings, producing frames at tensor resolution.
pub fn open_source(
    settings: &SourceSettings,
    geometry: &DisplayGeometry,
    selector: CameraSelector,
    frame_limit: Option<u64>,
) -> Result<Box<dyn FrameSource>> {
    let (tensor_width, tensor_height) = geometry.tensor_dims();
    if settings.uri.starts_with("stub://") {
        let config = SyntheticConfig {
            uri: settings.uri.clone(),
            capture_width: settings.capture_width,
            capture_height: settings.capture_height,
            output_width: tensor_width,
            output_height: tensor_height,
            frame_limit,
        };
        let mut source = SyntheticSource::new(config, selector)?;
        source.connect()?;
        return Ok(Box::new(source));
    }

    #[cfg(feature = "ingest-v4l2")]
    {
        let config = V4l2Config {
            front_device: settings.front_device.clone(),
            back_device: settings.uri.clone(),
            target_fps: settings.capture_fps,
            capture_width: settings.capture_width,
            capture_height: settings.capture_height,
            output_width: tensor_width,
            output_height: tensor_height,
            frame_limit,
        };
        let mut source = V4l2Source::new(config, selector)?;
        source.connect()?;
        Ok(Box::new(source))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(anyhow!(
            "camera source '{}' requires the ingest-v4l2 feature",
            settings.uri
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_toggle_flips_and_is_shared() {
        let selector = CameraSelector::new(CameraFacing::Back);
        let ui_side = selector.clone();
        assert_eq!(ui_side.toggle(), CameraFacing::Front);
        assert_eq!(selector.current(), CameraFacing::Front);
        assert_eq!(ui_side.toggle(), CameraFacing::Back);
        assert_eq!(selector.current(), CameraFacing::Back);
    }

    #[test]
    fn facing_parses_aliases() -> Result<()> {
        assert_eq!("user".parse::<CameraFacing>()?, CameraFacing::Front);
        assert_eq!("Rear".parse::<CameraFacing>()?, CameraFacing::Back);
        assert!("side".parse::<CameraFacing>().is_err());
        Ok(())
    }

    #[test]
    fn outstanding_counts_unreleased_frames() {
        let stats = SourceStats {
            frames_captured: 5,
            frames_released: 3,
            camera_switches: 0,
        };
        assert_eq!(stats.outstanding(), 2);
    }
}
