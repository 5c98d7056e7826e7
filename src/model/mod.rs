//! Pose models.
//!
//! The pose model is an injected capability. This module defines the trait the pump
//! calls, the keypoint types it returns, a smoothing wrapper, and the backends that
//! ship with the crate:
//! - `synthetic`: built-in moving figure (default when no model file is configured)
//! - `scripted`: replays canned results and faults
//! - `tract`: MoveNet ONNX via tract (feature: backend-tract)

mod backend;
pub mod backends;
mod result;
mod smoothing;

use anyhow::{anyhow, Result};
use std::path::PathBuf;

pub use backend::{ModelConfig, ModelVariant, PoseFault, PoseModel};
pub use backends::{ModelProbe, ScriptedPoseModel, SyntheticPoseModel};
#[cfg(feature = "backend-tract")]
pub use backends::TractPoseModel;
pub use result::{Keypoint, Pose, COCO_KEYPOINTS};
pub use smoothing::{Smoothed, DEFAULT_SMOOTHING_ALPHA};

/// Which inference backend a configuration resolves to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelBackend {
    Synthetic,
    Tract(PathBuf),
}

/// Resolve and check the inference backend for a configuration.
///
/// Fails when the configured model file is unreadable or the backend was not
/// compiled in.
pub fn init_backend(cfg: &ModelConfig) -> Result<ModelBackend> {
    let Some(path) = cfg.model_path.as_ref() else {
        return Ok(ModelBackend::Synthetic);
    };
    let meta = std::fs::metadata(path)
        .map_err(|e| anyhow!("model file {} unreadable: {}", path.display(), e))?;
    if !meta.is_file() {
        return Err(anyhow!("model path {} is not a file", path.display()));
    }
    if cfg!(feature = "backend-tract") {
        Ok(ModelBackend::Tract(path.clone()))
    } else {
        Err(anyhow!(
            "model file {} requires the backend-tract feature",
            path.display()
        ))
    }
}

/// Construct the model for a resolved backend, wrapped in smoothing when enabled.
pub fn create_model(cfg: &ModelConfig, backend: &ModelBackend) -> Result<Box<dyn PoseModel>> {
    let model: Box<dyn PoseModel> = match backend {
        ModelBackend::Synthetic => Box::new(SyntheticPoseModel::new()),
        #[cfg(feature = "backend-tract")]
        ModelBackend::Tract(path) => Box::new(TractPoseModel::new(path, cfg.variant)?),
        #[cfg(not(feature = "backend-tract"))]
        ModelBackend::Tract(path) => {
            return Err(anyhow!(
                "model file {} requires the backend-tract feature",
                path.display()
            ))
        }
    };
    if cfg.enable_smoothing {
        Ok(Box::new(Smoothed::new(model)))
    } else {
        Ok(model)
    }
}
