//! Startup sequence.
//!
//! Camera permission, inference backend, model construction, warm-up. Any failure
//! here is fatal: no pump is built and the caller shows the fault's user message
//! with a retry affordance.

use anyhow::Result;
use std::fs::File;
use std::path::PathBuf;

use crate::model::{create_model, init_backend, ModelConfig, PoseModel};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Asks the platform for camera access.
pub trait PermissionGate {
    fn request(&mut self) -> Result<PermissionStatus>;
}

/// Gate for sources that need no permission (synthetic frames).
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysGranted;

impl PermissionGate for AlwaysGranted {
    fn request(&mut self) -> Result<PermissionStatus> {
        Ok(PermissionStatus::Granted)
    }
}

/// Granted when the camera device node can be opened by this process.
#[derive(Clone, Debug)]
pub struct DeviceNodePermission {
    paths: Vec<PathBuf>,
}

impl DeviceNodePermission {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl PermissionGate for DeviceNodePermission {
    fn request(&mut self) -> Result<PermissionStatus> {
        for path in &self.paths {
            if let Err(err) = File::open(path) {
                log::warn!("camera device {} not accessible: {}", path.display(), err);
                return Ok(PermissionStatus::Denied);
            }
        }
        Ok(PermissionStatus::Granted)
    }
}

/// Fatal startup failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartupFault {
    PermissionDenied(String),
    BackendInit(String),
    ModelConstruction(String),
}

impl StartupFault {
    pub fn code(&self) -> &'static str {
        match self {
            StartupFault::PermissionDenied(_) => "CAMERA_PERMISSION_DENIED",
            StartupFault::BackendInit(_) => "BACKEND_INIT_FAILED",
            StartupFault::ModelConstruction(_) => "MODEL_CONSTRUCTION_FAILED",
        }
    }

    /// Message suitable for showing to the person holding the camera.
    pub fn user_message(&self) -> &'static str {
        match self {
            StartupFault::PermissionDenied(_) => {
                "Camera access is needed to show the pose overlay."
            }
            StartupFault::BackendInit(_) => "The pose detector could not be started.",
            StartupFault::ModelConstruction(_) => "The pose model could not be loaded.",
        }
    }

    pub fn retry_label(&self) -> &'static str {
        match self {
            StartupFault::PermissionDenied(_) => "Grant access",
            StartupFault::BackendInit(_) | StartupFault::ModelConstruction(_) => "Retry",
        }
    }

    fn detail(&self) -> &str {
        match self {
            StartupFault::PermissionDenied(detail)
            | StartupFault::BackendInit(detail)
            | StartupFault::ModelConstruction(detail) => detail,
        }
    }
}

impl std::fmt::Display for StartupFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.detail())
    }
}

impl std::error::Error for StartupFault {}

/// Bring the pose model up, or fail with a `StartupFault`.
pub fn prepare(gate: &mut dyn PermissionGate, cfg: &ModelConfig) -> Result<Box<dyn PoseModel>> {
    match gate.request() {
        Ok(PermissionStatus::Granted) => {}
        Ok(PermissionStatus::Denied) => {
            return Err(StartupFault::PermissionDenied("camera access denied".to_string()).into())
        }
        Err(err) => return Err(StartupFault::PermissionDenied(format!("{:#}", err)).into()),
    }

    let backend =
        init_backend(cfg).map_err(|err| StartupFault::BackendInit(format!("{:#}", err)))?;
    let mut model = create_model(cfg, &backend)
        .map_err(|err| StartupFault::ModelConstruction(format!("{:#}", err)))?;
    model
        .warm_up()
        .map_err(|err| StartupFault::BackendInit(format!("{}: {:#}", model.name(), err)))?;

    log::info!(
        "pose model ready (backend={}, variant={}, smoothing={})",
        model.name(),
        cfg.variant.as_str(),
        cfg.enable_smoothing
    );
    Ok(model)
}
