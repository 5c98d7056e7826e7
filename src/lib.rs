//! Pose overlay pump
//!
//! This crate drives a live pose overlay: camera frames go through a pretrained pose
//! model, detected keypoints are mapped from inference-tensor space into the preview
//! surface's pixel space, and the mapped points are published as overlay markers.
//!
//! # Architecture
//!
//! The pump is a strict single-stepper. Each tick it:
//!
//! 1. Acquires exactly one frame from a [`FrameSource`].
//! 2. Runs the [`PoseModel`] on a read-only [`FrameView`].
//! 3. Releases the frame back to its source on every exit path.
//! 4. Maps the first pose through the [`CoordinateMapper`] and publishes an [`Overlay`].
//! 5. Refreshes the display and waits for the next scheduler tick.
//!
//! # Module Structure
//!
//! - `frame`: Frame ownership (Frame, FrameView, FrameLease)
//! - `ingest`: Frame sources (synthetic, V4L2) and the camera selector
//! - `model`: Pose model trait, keypoint types, smoothing, backends
//! - `mapper`: Tensor-space to display-space mapping
//! - `overlay`: Marker styling, overlay sinks, SVG rendering
//! - `pump`: The frame pump state machine
//! - `startup`: Permission, backend and model bring-up
//! - `config`: Display geometry and runtime configuration

pub mod config;
pub mod frame;
pub mod ingest;
pub mod mapper;
pub mod model;
pub mod overlay;
pub mod pump;
pub mod startup;

pub use config::{DisplayGeometry, MirrorPolicy, Orientation, OverlayConfig, Platform};
pub use frame::{Frame, FrameLease, FrameView};
pub use ingest::{CameraFacing, CameraSelector, FrameSource, SourceStats, SyntheticSource};
pub use mapper::{CoordinateMapper, DisplayPoint, MIN_KEYPOINT_SCORE};
pub use model::{
    Keypoint, ModelConfig, ModelVariant, Pose, PoseFault, PoseModel, ScriptedPoseModel,
    Smoothed, SyntheticPoseModel,
};
pub use overlay::{Marker, MarkerStyle, Overlay, OverlaySink, SharedOverlay};
pub use pump::{
    FramePump, FrameScheduler, PacedScheduler, PumpConfig, PumpFault, PumpHandle, PumpParts,
    PumpState, PumpStats,
};
pub use startup::{PermissionGate, PermissionStatus, StartupFault};
